//! GpgKey Custom Resource Definition
//!
//! A GpgKey holds an armored private key and the passphrase that unlocks it.
//! SopsSecrets reference it by name from the same namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status message written after a successful import
pub const IMPORTED: &str = "Imported";
/// Status message written after a failed import
pub const FAILED: &str = "Failed";

/// Specification for a GpgKey
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "secrets.sops-operator.io",
    version = "v1alpha1",
    kind = "GpgKey",
    plural = "gpgkeys",
    shortname = "gpg",
    status = "GpgKeyStatus",
    namespaced,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct GpgKeySpec {
    /// Body of an ASCII-armored private key, without the BEGIN/END lines
    #[serde(default)]
    pub armored_private_key: String,

    /// Passphrase protecting the private key
    #[serde(default)]
    pub passphrase: String,
}

/// Status for a GpgKey
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct GpgKeyStatus {
    /// `Imported` or `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GpgKeyStatus {
    /// Status with the given message
    pub fn with_message(msg: impl Into<String>) -> Self {
        Self {
            message: Some(msg.into()),
        }
    }
}
