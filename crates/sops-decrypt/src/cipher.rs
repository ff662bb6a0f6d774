//! AES-256-GCM leaf cipher
//!
//! Each leaf is stored as
//! `ENC[AES256_GCM,data:<b64>,iv:<b64>,tag:<b64>,type:<type>]` and is bound to
//! its position in the document through the additional authenticated data.

use aes_gcm::aead::consts::U32;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

use crate::tree::TreeValue;

/// sops writes 256-bit IVs
type SopsAesGcm = AesGcm<Aes256, U32>;

const SOPS_IV_LEN: usize = 32;
const STANDARD_IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors from a single leaf
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The value is not an `ENC[...]` string
    #[error("input string does not match sops' data format")]
    Format,
    /// A component of the envelope is not valid base64
    #[error("error base64-decoding {field}: {message}")]
    Base64 {
        /// Envelope field name
        field: &'static str,
        /// Decoder message
        message: String,
    },
    /// IV length is neither 32 nor 12 bytes
    #[error("unsupported IV length {0}")]
    IvLength(usize),
    /// Authentication tag is not 16 bytes
    #[error("unsupported tag length {0}")]
    TagLength(usize),
    /// Data key is not 32 bytes
    #[error("data key must be 32 bytes, got {0}")]
    KeyLength(usize),
    /// Authentication failed (wrong key, tampered ciphertext or moved leaf)
    #[error("could not decrypt with AES_GCM")]
    Authentication,
    /// Unknown `type:` marker
    #[error("unknown datatype: {0}")]
    UnknownType(String),
    /// Plaintext does not parse as the declared type
    #[error("could not parse {kind} value: {message}")]
    InvalidPlaintext {
        /// Declared type
        kind: &'static str,
        /// Parser message
        message: String,
    },
}

struct Envelope<'a> {
    data: &'a str,
    iv: &'a str,
    tag: &'a str,
    kind: &'a str,
}

fn parse_envelope(value: &str) -> Result<Envelope<'_>, CipherError> {
    let inner = value
        .strip_prefix("ENC[AES256_GCM,")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(CipherError::Format)?;

    let mut fields = inner.split(',');
    let mut take = |name: &str| {
        fields
            .next()
            .and_then(|f| f.strip_prefix(name))
            .and_then(|f| f.strip_prefix(':'))
            .filter(|v| !v.is_empty())
            .ok_or(CipherError::Format)
    };
    let envelope = Envelope {
        data: take("data")?,
        iv: take("iv")?,
        tag: take("tag")?,
        kind: take("type")?,
    };
    if fields.next().is_some() {
        return Err(CipherError::Format);
    }
    Ok(envelope)
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD.decode(value).map_err(|e| CipherError::Base64 {
        field,
        message: e.to_string(),
    })
}

/// True for strings carrying the `ENC[AES256_GCM,...]` envelope
pub fn is_encrypted(value: &str) -> bool {
    parse_envelope(value).is_ok()
}

/// Decrypt a single leaf.
///
/// `additional_data` is the leaf's key path joined with `:` plus a trailing
/// `:`. An empty ciphertext decrypts to an empty string.
pub fn decrypt_value(
    ciphertext: &str,
    key: &[u8],
    additional_data: &str,
) -> Result<TreeValue, CipherError> {
    if ciphertext.is_empty() {
        return Ok(TreeValue::String(String::new()));
    }

    let envelope = parse_envelope(ciphertext)?;
    let data = decode("data", envelope.data)?;
    let iv = decode("iv", envelope.iv)?;
    let tag = decode("tag", envelope.tag)?;
    if tag.len() != TAG_LEN {
        return Err(CipherError::TagLength(tag.len()));
    }

    let mut sealed = data;
    sealed.extend_from_slice(&tag);
    let payload = Payload {
        msg: &sealed,
        aad: additional_data.as_bytes(),
    };

    let plaintext = match iv.len() {
        SOPS_IV_LEN => SopsAesGcm::new_from_slice(key)
            .map_err(|_| CipherError::KeyLength(key.len()))?
            .decrypt(GenericArray::from_slice(&iv), payload),
        STANDARD_IV_LEN => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CipherError::KeyLength(key.len()))?
            .decrypt(GenericArray::from_slice(&iv), payload),
        other => return Err(CipherError::IvLength(other)),
    }
    .map_err(|_| CipherError::Authentication)?;

    typed_value(envelope.kind, plaintext)
}

fn typed_value(kind: &str, plaintext: Vec<u8>) -> Result<TreeValue, CipherError> {
    let as_text = |kind: &'static str, bytes: Vec<u8>| {
        String::from_utf8(bytes).map_err(|e| CipherError::InvalidPlaintext {
            kind,
            message: e.to_string(),
        })
    };

    match kind {
        "str" | "comment" => Ok(TreeValue::String(as_text("str", plaintext)?)),
        "bytes" => Ok(TreeValue::Bytes(plaintext)),
        "int" => {
            let text = as_text("int", plaintext)?;
            text.parse()
                .map(TreeValue::Int)
                .map_err(|e: std::num::ParseIntError| CipherError::InvalidPlaintext {
                    kind: "int",
                    message: e.to_string(),
                })
        }
        "float" => {
            let text = as_text("float", plaintext)?;
            text.parse()
                .map(TreeValue::Float)
                .map_err(|e: std::num::ParseFloatError| CipherError::InvalidPlaintext {
                    kind: "float",
                    message: e.to_string(),
                })
        }
        "bool" => {
            let text = as_text("bool", plaintext)?;
            parse_bool(&text)
                .map(TreeValue::Bool)
                .ok_or_else(|| CipherError::InvalidPlaintext {
                    kind: "bool",
                    message: format!("invalid syntax {:?}", text),
                })
        }
        other => Err(CipherError::UnknownType(other.to_string())),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Encrypt a single leaf with a fresh random IV.
///
/// Branches, sequences and nulls are not leaves and are rejected.
pub fn encrypt_value(
    value: &TreeValue,
    key: &[u8],
    additional_data: &str,
) -> Result<String, CipherError> {
    let (plaintext, kind): (Vec<u8>, &str) = match value {
        TreeValue::String(s) if s.is_empty() => return Ok(String::new()),
        TreeValue::String(s) => (s.as_bytes().to_vec(), "str"),
        TreeValue::Int(i) => (i.to_string().into_bytes(), "int"),
        TreeValue::Float(f) => (f.to_string().into_bytes(), "float"),
        TreeValue::Bool(b) => ((if *b { "True" } else { "False" }).as_bytes().to_vec(), "bool"),
        TreeValue::Bytes(b) => (b.clone(), "bytes"),
        TreeValue::Branch(_) | TreeValue::Sequence(_) | TreeValue::Null => {
            return Err(CipherError::UnknownType("non-leaf".to_string()))
        }
    };

    let mut iv = [0u8; SOPS_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut sealed = SopsAesGcm::new_from_slice(key)
        .map_err(|_| CipherError::KeyLength(key.len()))?
        .encrypt(
            GenericArray::from_slice(&iv),
            Payload {
                msg: &plaintext,
                aad: additional_data.as_bytes(),
            },
        )
        .map_err(|_| CipherError::Authentication)?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(format!(
        "ENC[AES256_GCM,data:{},iv:{},tag:{},type:{}]",
        STANDARD.encode(&sealed),
        STANDARD.encode(iv),
        STANDARD.encode(tag),
        kind
    ))
}
