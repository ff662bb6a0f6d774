//! Error types for the SOPS operator

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Decryption pipeline error
    #[error("decryption error: {0}")]
    Decrypt(#[from] sops_decrypt::DecryptError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Child secret could not be derived from the decrypted template
    #[error("child secret error: {0}")]
    ChildSecret(String),

    /// Private key import error
    #[error("key import error: {0}")]
    KeyImport(String),

    /// Invalid operator configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Admission webhook server error
    #[error("webhook error: {0}")]
    Webhook(String),
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a child secret error with the given message
    pub fn child_secret(msg: impl Into<String>) -> Self {
        Self::ChildSecret(msg.into())
    }

    /// Create a key import error with the given message
    pub fn key_import(msg: impl Into<String>) -> Self {
        Self::KeyImport(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a webhook error with the given message
    pub fn webhook(msg: impl Into<String>) -> Self {
        Self::Webhook(msg.into())
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
