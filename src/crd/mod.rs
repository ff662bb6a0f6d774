//! Custom Resource Definitions for the SOPS operator
//!
//! This module contains all CRD definitions used by the operator.

mod gpg_key;
mod sops_secret;
mod types;

pub use gpg_key::{GpgKey, GpgKeySpec, GpgKeyStatus, FAILED, IMPORTED};
pub use sops_secret::{SopsSecret, SopsSecretSpec, SopsSecretStatus};
pub use types::{Health, SecretTemplate, KNOWN_SECRET_TYPES, OPAQUE_SECRET_TYPE};

/// API group of every operator resource
pub const GROUP: &str = "secrets.sops-operator.io";

/// API version of every operator resource
pub const VERSION: &str = "v1alpha1";

/// Annotation that grants the operator cooperative management of an existing Secret
pub const MANAGED_ANNOTATION: &str = "secrets.sops-operator.io/managed";
