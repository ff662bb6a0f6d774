//! Integration tests for the SOPS operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how users interact with SopsSecrets and GpgKeys in a live cluster.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and reading SopsSecret and
//!   GpgKey resources through the Kubernetes API
//!
//! - `reconciliation`: Stories about the controller producing, adopting and
//!   refusing child Secrets, run in-process against the live API server with
//!   a fixed data key in place of gpg
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
mod reconciliation;
