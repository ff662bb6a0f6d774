//! Secret-tree codec
//!
//! Parses an encrypted document into a [`Tree`] and serializes decrypted
//! branches back into the same container format. Only leaves are ever
//! ciphertext; keys and nesting are kept in the clear and in source order.

mod dotenv;
mod json;
mod yaml;

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::metadata::{Metadata, StoredMetadata};
use crate::tree::{Tree, TreeBranch};

/// Root key holding the encryption metadata
pub const METADATA_KEY: &str = "sops";

/// Errors raised while reading or writing a document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The document has no `sops` block
    #[error("sops metadata not found")]
    MetadataNotFound,
    /// The `sops` block is malformed
    #[error("invalid sops metadata: {0}")]
    InvalidMetadata(String),
    /// The document does not parse in the requested format
    #[error("error unmarshalling {format} input: {message}")]
    Parse {
        /// Requested format
        format: Format,
        /// Parser message
        message: String,
    },
    /// The tree cannot be expressed in the requested format
    #[error("error marshalling {format} output: {message}")]
    Emit {
        /// Requested format
        format: Format,
        /// Reason
        message: String,
    },
}

impl CodecError {
    fn parse(format: Format, message: impl fmt::Display) -> Self {
        Self::Parse {
            format,
            message: message.to_string(),
        }
    }

    fn emit(format: Format, message: impl fmt::Display) -> Self {
        Self::Emit {
            format,
            message: message.to_string(),
        }
    }
}

/// Container format of an encrypted document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// JSON object
    Json,
    /// One or more YAML documents
    Yaml,
    /// `KEY=VALUE` lines
    Dotenv,
    /// Opaque payload stored under `data` in a JSON envelope
    #[default]
    Binary,
}

impl Format {
    /// Resolve a format name; unknown or empty names select [`Format::Binary`]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "dotenv" | "env" => Self::Dotenv,
            _ => Self::Binary,
        }
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Dotenv => "dotenv",
            Self::Binary => "binary",
        }
    }
}

impl FromStr for Format {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse an encrypted document
pub fn parse(data: &[u8], format: Format) -> Result<Tree, CodecError> {
    match format {
        Format::Json | Format::Binary => json::load_encrypted(data, format),
        Format::Yaml => yaml::load_encrypted(data),
        Format::Dotenv => dotenv::load_encrypted(data),
    }
}

/// Serialize decrypted branches; the metadata block is never emitted
pub fn serialize(branches: &[TreeBranch], format: Format) -> Result<Vec<u8>, CodecError> {
    match format {
        Format::Json => json::emit_plain(branches),
        Format::Binary => json::emit_binary(branches),
        Format::Yaml => yaml::emit_plain(branches),
        Format::Dotenv => dotenv::emit_plain(branches),
    }
}

/// Validate the stored metadata taken from a document root
fn metadata_from_json(value: serde_json::Value) -> Result<Metadata, CodecError> {
    let stored: StoredMetadata = serde_json::from_value(value)
        .map_err(|e| CodecError::InvalidMetadata(e.to_string()))?;
    Metadata::try_from(stored)
}
