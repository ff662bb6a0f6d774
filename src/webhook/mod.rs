//! Validating Admission Webhook for the operator resources
//!
//! Rejects SopsSecrets without a key reference or payload and GpgKeys whose
//! passphrase or armored key is unusable. Deletes are always allowed.

pub mod gpg_key;
pub mod sops_secret;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::Error;

pub use gpg_key::PassphrasePolicy;

/// Certificate file expected in the webhook certificate directory
pub const TLS_CERT_FILE: &str = "tls.crt";
/// Private key file expected in the webhook certificate directory
pub const TLS_KEY_FILE: &str = "tls.key";

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The request carried no object to validate
    #[error("admission request has no object")]
    MissingObject,

    /// The object could not be read as the expected resource
    #[error("invalid object: {0}")]
    InvalidObject(#[from] serde_json::Error),
}

/// Shared state for webhook handlers
#[derive(Clone, Debug, Default)]
pub struct WebhookState {
    /// Rules applied to GpgKey passphrases
    pub passphrase_policy: PassphrasePolicy,
}

impl WebhookState {
    /// Create a webhook state with the given passphrase policy
    pub fn new(passphrase_policy: PassphrasePolicy) -> Self {
        Self { passphrase_policy }
    }
}

/// Create the webhook router with all validation endpoints
///
/// - POST /validate/sopssecrets
/// - POST /validate/gpgkeys
/// - GET /healthz
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate/sopssecrets", post(sops_secret::validate_handler))
        .route("/validate/gpgkeys", post(gpg_key::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook over TLS using `tls.crt` and `tls.key` from `cert_dir`
pub async fn serve(addr: SocketAddr, cert_dir: &Path, state: Arc<WebhookState>) -> Result<(), Error> {
    let tls = RustlsConfig::from_pem_file(cert_dir.join(TLS_CERT_FILE), cert_dir.join(TLS_KEY_FILE))
        .await
        .map_err(|e| Error::webhook(format!("failed to load TLS material: {e}")))?;

    info!(%addr, "Starting admission webhook");
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::webhook(format!("webhook server error: {e}")))
}

/// Shared front half of every handler
///
/// Returns the allow response to send as-is for deletes and object-less
/// requests, otherwise the decoded object.
fn decode_object<T: DeserializeOwned>(
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<T>, WebhookError> {
    if request.operation == Operation::Delete {
        debug!(uid = %request.uid, "Delete request, allowing");
        return Ok(None);
    }
    let obj = request.object.as_ref().ok_or(WebhookError::MissingObject)?;
    let value = serde_json::to_value(obj)?;
    Ok(Some(serde_json::from_value(value)?))
}

/// Turn a validation result into an admission response
fn respond(request: &AdmissionRequest<DynamicObject>, verdict: Result<(), String>) -> AdmissionResponse {
    match verdict {
        Ok(()) => AdmissionResponse::from(request),
        Err(msg) => {
            info!(uid = %request.uid, name = %request.name, reason = %msg, "Denying admission");
            AdmissionResponse::from(request).deny(msg)
        }
    }
}
