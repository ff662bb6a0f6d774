//! Shamir secret sharing over GF(2^8)
//!
//! Parts use the HashiCorp Vault layout that sops writes: the y-values for
//! every secret byte, followed by a single trailing x-coordinate byte.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use thiserror::Error;

/// Errors from splitting or combining parts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShamirError {
    /// Fewer than two parts supplied to combine
    #[error("less than two parts cannot be used to reconstruct the secret")]
    TooFewParts,
    /// A part has no room for both a y-value and the x-coordinate
    #[error("parts must be at least two bytes")]
    PartTooShort,
    /// Parts differ in length
    #[error("all parts must be the same length")]
    LengthMismatch,
    /// Two parts share an x-coordinate
    #[error("duplicate part detected")]
    DuplicatePart,
    /// Split parameters out of range
    #[error("invalid split parameters: {0}")]
    InvalidParameters(&'static str),
}

/// Multiply in GF(2^8) with the AES reduction polynomial, constant time
fn mult(a: u8, b: u8) -> u8 {
    let mut r: u8 = 0;
    for i in (0..8).rev() {
        r = (0u8.wrapping_sub((b >> i) & 1) & a)
            ^ (0u8.wrapping_sub(r >> 7) & 0x1B)
            ^ r.wrapping_add(r);
    }
    r
}

fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// a^254 = a^-1 for a != 0
fn inverse(a: u8) -> u8 {
    let mut b = mult(a, a);
    let mut c = mult(a, b);
    b = mult(c, c);
    b = mult(b, b);
    c = mult(b, c);
    b = mult(b, b);
    b = mult(b, b);
    b = mult(b, c);
    b = mult(b, b);
    b = mult(a, b);
    mult(b, b)
}

fn div(a: u8, b: u8) -> u8 {
    mult(a, inverse(b))
}

/// Evaluate the polynomial with the given coefficients at `x` (Horner)
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    if x == 0 {
        return coefficients.first().copied().unwrap_or(0);
    }
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &c| add(mult(acc, x), c))
}

/// Lagrange interpolation of the samples at `x`
fn interpolate(x_samples: &[u8], y_samples: &[u8], x: u8) -> u8 {
    let mut result = 0u8;
    for (i, (&xi, &yi)) in x_samples.iter().zip(y_samples).enumerate() {
        let mut basis = 1u8;
        for (j, &xj) in x_samples.iter().enumerate() {
            if i == j {
                continue;
            }
            let num = add(x, xj);
            let denom = add(xi, xj);
            basis = mult(basis, div(num, denom));
        }
        result = add(result, mult(yi, basis));
    }
    result
}

/// Reconstruct a secret from parts.
///
/// Any number of parts at or above the original threshold reconstructs the
/// same secret; fewer yields unrelated bytes rather than an error.
pub fn combine(parts: &[Vec<u8>]) -> Result<Vec<u8>, ShamirError> {
    if parts.len() < 2 {
        return Err(ShamirError::TooFewParts);
    }
    let first_len = parts[0].len();
    if first_len < 2 {
        return Err(ShamirError::PartTooShort);
    }
    if parts.iter().any(|p| p.len() != first_len) {
        return Err(ShamirError::LengthMismatch);
    }

    let mut x_samples = Vec::with_capacity(parts.len());
    for part in parts {
        let x = part[first_len - 1];
        if x_samples.contains(&x) {
            return Err(ShamirError::DuplicatePart);
        }
        x_samples.push(x);
    }

    let secret_len = first_len - 1;
    let mut secret = Vec::with_capacity(secret_len);
    let mut y_samples = vec![0u8; parts.len()];
    for idx in 0..secret_len {
        for (y, part) in y_samples.iter_mut().zip(parts) {
            *y = part[idx];
        }
        secret.push(interpolate(&x_samples, &y_samples, 0));
    }
    Ok(secret)
}

/// Split `secret` into `parts` shares, any `threshold` of which recombine it
pub fn split(secret: &[u8], parts: usize, threshold: usize) -> Result<Vec<Vec<u8>>, ShamirError> {
    split_with_rng(secret, parts, threshold, &mut rand::thread_rng())
}

/// [`split`] with a caller-provided RNG
pub fn split_with_rng<R: RngCore>(
    secret: &[u8],
    parts: usize,
    threshold: usize,
    rng: &mut R,
) -> Result<Vec<Vec<u8>>, ShamirError> {
    if parts < threshold {
        return Err(ShamirError::InvalidParameters("parts cannot be less than threshold"));
    }
    if parts > 255 {
        return Err(ShamirError::InvalidParameters("parts cannot exceed 255"));
    }
    if threshold < 2 {
        return Err(ShamirError::InvalidParameters("threshold must be at least 2"));
    }
    if secret.is_empty() {
        return Err(ShamirError::InvalidParameters("cannot split an empty secret"));
    }

    // Unique non-zero x-coordinates
    let mut x_coordinates: Vec<u8> = (1..=255).collect();
    x_coordinates.shuffle(rng);

    let mut out: Vec<Vec<u8>> = x_coordinates[..parts]
        .iter()
        .map(|&x| {
            let mut part = vec![0u8; secret.len() + 1];
            part[secret.len()] = x;
            part
        })
        .collect();

    let mut coefficients = vec![0u8; threshold];
    for (idx, &byte) in secret.iter().enumerate() {
        coefficients[0] = byte;
        rng.fill(&mut coefficients[1..]);
        for part in &mut out {
            let x = part[secret.len()];
            part[idx] = evaluate(&coefficients, x);
        }
    }
    Ok(out)
}
