//! Error types for the decryption pipeline
//!
//! [`DecryptError`] is the single error surfaced by [`crate::decrypt`]. Its
//! [`kind`](DecryptError::kind) is a stable tag for callers that branch on the
//! failure class; [`user_report`](DecryptError::user_report) renders the
//! multi-line diagnosis when one exists.

use std::fmt;

use thiserror::Error;

use crate::cipher::CipherError;
use crate::shamir::ShamirError;
use crate::stores::CodecError;

const REPORT_HEADER: &str = "Failed to get the data key required to decrypt the SOPS file.";
const REASON_WIDTH: usize = 60;
const TRAILER_WIDTH: usize = 75;

/// Why one master key could not produce its share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    /// Display identity of the master key (fingerprint, ARN, ...)
    pub key: String,
    /// Failure reason reported by the unlocker
    pub reason: String,
}

impl KeyFailure {
    fn render(&self) -> String {
        let lines = wrap(&self.reason, REASON_WIDTH);
        let mut out = format!("{}: FAILED", self.key);
        for (i, line) in lines.iter().enumerate() {
            let marker = if i == 0 { "- | " } else { "  | " };
            out.push_str(&format!("\n  {}{}", marker, line));
        }
        out
    }
}

/// Result of resolving one key group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// At least one share in the group decrypted
    Success,
    /// Every share failed; one entry per share, in order
    Failed(Vec<KeyFailure>),
}

impl GroupOutcome {
    /// True for [`GroupOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Not enough key groups produced their share of the data key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AggregateKeyError {
    /// Successful groups needed
    pub required: usize,
    /// One outcome per key group, in document order
    pub groups: Vec<GroupOutcome>,
}

impl fmt::Display for AggregateKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error getting data key: {} successful groups required, got {}",
            self.required,
            self.successful()
        )
    }
}

impl AggregateKeyError {
    /// Number of groups that recovered their share
    pub fn successful(&self) -> usize {
        self.groups.iter().filter(|g| g.is_success()).count()
    }

    /// Multi-level, human-readable diagnosis
    pub fn report(&self) -> String {
        let mut out = format!("{}\n\n", REPORT_HEADER);
        for (index, group) in self.groups.iter().enumerate() {
            match group {
                GroupOutcome::Success => out.push_str(&format!("Group {}: SUCCESS\n", index)),
                GroupOutcome::Failed(failures) => {
                    out.push_str(&format!("Group {}: FAILED\n", index));
                    for failure in failures {
                        for line in failure.render().lines() {
                            out.push_str("  ");
                            out.push_str(line);
                            out.push('\n');
                        }
                    }
                }
            }
            out.push('\n');
        }
        out.push_str(&wrap(&self.trailer(), TRAILER_WIDTH).join("\n"));
        out
    }

    fn trailer(&self) -> String {
        if self.groups.len() <= 1 {
            "Recovery failed because no master key was able to decrypt the file. In order \
             for SOPS to recover the file, at least one key has to be successful, but none \
             were."
                .to_string()
        } else {
            format!(
                "Recovery failed because the file was encrypted with a Shamir threshold of {}, \
                 but only {} part(s) were successfully recovered, one for each successful key \
                 group. In order for SOPS to recover the file, at least {} groups have to be \
                 successful. In order for a group to be successful, decryption has to succeed \
                 with any of the keys in that key group.",
                self.required,
                self.successful(),
                self.required
            )
        }
    }
}

/// Failure to obtain the data key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataKeyError {
    /// Threshold not met
    #[error(transparent)]
    Threshold(#[from] AggregateKeyError),
    /// Enough parts were recovered but they do not combine
    #[error("could not get data key from shamir parts: {0}")]
    Combine(#[from] ShamirError),
}

/// Stable classification of a [`DecryptError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptErrorKind {
    /// Document or metadata could not be read or written
    Codec,
    /// The data key could not be recovered
    DataKey,
    /// A leaf failed to decrypt
    Leaf,
}

/// Error returned by the decryption pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// Document could not be parsed or serialized
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Data key recovery failed
    #[error(transparent)]
    DataKey(#[from] DataKeyError),
    /// A selected leaf did not decrypt
    #[error("failed to decrypt value at {path:?}: {source}")]
    Leaf {
        /// Colon-joined key path of the leaf
        path: String,
        /// Cipher failure
        #[source]
        source: CipherError,
    },
    /// A leaf selected for decryption is not an encrypted string
    #[error("value at {path:?} should be encrypted but is not an encrypted string")]
    NotEncrypted {
        /// Colon-joined key path of the leaf
        path: String,
    },
}

impl From<AggregateKeyError> for DecryptError {
    fn from(err: AggregateKeyError) -> Self {
        Self::DataKey(DataKeyError::Threshold(err))
    }
}

impl DecryptError {
    /// Failure class
    pub fn kind(&self) -> DecryptErrorKind {
        match self {
            Self::Codec(_) => DecryptErrorKind::Codec,
            Self::DataKey(_) => DecryptErrorKind::DataKey,
            Self::Leaf { .. } | Self::NotEncrypted { .. } => DecryptErrorKind::Leaf,
        }
    }

    /// Threshold diagnosis, when the data key could not be recovered
    pub fn aggregate(&self) -> Option<&AggregateKeyError> {
        match self {
            Self::DataKey(DataKeyError::Threshold(err)) => Some(err),
            _ => None,
        }
    }

    /// Full report for logs; falls back to the one-line message
    pub fn user_report(&self) -> String {
        match self.aggregate() {
            Some(err) => err.report(),
            None => self.to_string(),
        }
    }
}

/// Greedy word wrap; words longer than `width` get their own line
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}
