//! SopsSecret validation

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde::Deserialize;
use tracing::error;

use super::{decode_object, respond, WebhookState};
use crate::crd::SopsSecretSpec;

/// The part of a SopsSecret the webhook looks at
///
/// The `sops` metadata block is left alone; the decryption pipeline owns it.
#[derive(Debug, Deserialize)]
struct SpecOnly {
    spec: SopsSecretSpec,
}

/// Validate a SopsSecret spec on create or update
pub fn validate(spec: &SopsSecretSpec) -> Result<(), String> {
    if spec.gpg_key_ref_name.is_empty() {
        return Err("gpg_key_ref_name can't be empty in SopsSecret object".into());
    }
    if spec.secret_template.is_empty() {
        return Err("stringData can't be empty in SopsSecret object".into());
    }
    Ok(())
}

/// Handle validating admission review for SopsSecrets
pub async fn validate_handler(
    State(_state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = match decode_object::<SpecOnly>(&req) {
        Ok(None) => AdmissionResponse::from(&req),
        Ok(Some(obj)) => respond(&req, validate(&obj.spec)),
        Err(e) => AdmissionResponse::invalid(e.to_string()),
    };
    Json(response.into_review())
}
