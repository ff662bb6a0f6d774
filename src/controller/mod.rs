//! Controller implementations for the operator CRDs
//!
//! This module contains the reconciliation logic for SopsSecret and GpgKey.
//! Controllers follow the Kubernetes controller pattern with observe-diff-act loops.

mod context;
pub mod gpg_key;
pub mod sops_secret;

pub use context::{
    Context, ContextBuilder, KubeClient, KubeClientImpl, DEFAULT_REQUEUE_AFTER, FIELD_MANAGER,
};
#[cfg(test)]
pub use context::MockKubeClient;
pub use sops_secret::{derive_child, error_policy, reconcile, ReconcileOutcome};
