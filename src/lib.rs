//! SOPS operator - decrypts SOPS-encrypted SopsSecret resources into Secrets
//!
//! A SopsSecret carries a Secret template whose values are encrypted with a
//! SOPS data key, plus the SOPS metadata describing how that data key was
//! wrapped. The operator unlocks the data key with the GpgKey the object
//! references, decrypts the template, and keeps a child Secret in sync.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (SopsSecret, GpgKey)
//! - [`controller`] - Reconciliation logic for both resources
//! - [`controller_runner`] - Controller wiring (watches, concurrency)
//! - [`gpg`] - GnuPG-backed key unlocking and private key import
//! - [`webhook`] - Validating admission webhook
//! - [`config`] - Command-line and environment configuration
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types for the operator
//!
//! The decryption pipeline itself lives in the `sops-decrypt` crate.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod crd;
pub mod error;
pub mod gpg;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
