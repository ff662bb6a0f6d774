//! Shared types used by the CRD definitions

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Secret types the API server recognizes; anything else becomes `Opaque`
pub const KNOWN_SECRET_TYPES: &[&str] = &[
    "Opaque",
    "kubernetes.io/service-account-token",
    "kubernetes.io/dockercfg",
    "kubernetes.io/dockerconfigjson",
    "kubernetes.io/basic-auth",
    "kubernetes.io/ssh-auth",
    "kubernetes.io/tls",
    "bootstrap.kubernetes.io/token",
];

/// Default secret type
pub const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// Shape of the Secret to produce once the template is decrypted
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    /// Secret name; defaults to the SopsSecret's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Labels added on top of the SopsSecret's labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Annotations added on top of the SopsSecret's annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Secret type (e.g. `kubernetes.io/tls`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Base64-encoded values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,

    /// Plain string values; win over `data` on key collision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_data: Option<BTreeMap<String, String>>,
}

impl SecretTemplate {
    /// The template's type if it is a known secret type, otherwise `Opaque`
    pub fn effective_type(&self) -> &str {
        match self.type_.as_deref() {
            Some(t) if KNOWN_SECRET_TYPES.contains(&t) => t,
            _ => OPAQUE_SECRET_TYPE,
        }
    }

    /// True when neither `data` nor `stringData` carries an entry
    pub fn is_empty(&self) -> bool {
        self.data.as_ref().map_or(true, BTreeMap::is_empty)
            && self.string_data.as_ref().map_or(true, BTreeMap::is_empty)
    }
}

/// Coarse health reported on a SopsSecret
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Health {
    /// Child secret matches the decrypted template
    Healthy,
    /// The last pass stopped before the child secret converged
    #[default]
    Unhealthy,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}
