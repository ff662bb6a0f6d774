//! GpgKey validation

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::error;

use super::{decode_object, respond, WebhookState};
use crate::crd::GpgKey;

/// Shortest accepted passphrase
pub const MIN_PASSPHRASE_LEN: usize = 14;
/// Longest accepted passphrase
pub const MAX_PASSPHRASE_LEN: usize = 100;
/// Shortest accepted armored key body after trimming
pub const MIN_ARMORED_KEY_LEN: usize = 1024;

const COMMON_PASSPHRASES: &str = include_str!("common_passphrases.txt");

/// Passphrase length bounds plus a deny-list of well-known passphrases
#[derive(Clone, Debug)]
pub struct PassphrasePolicy {
    min_len: usize,
    max_len: usize,
    common: Arc<HashSet<String>>,
}

impl Default for PassphrasePolicy {
    fn default() -> Self {
        let common = COMMON_PASSPHRASES
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self {
            min_len: MIN_PASSPHRASE_LEN,
            max_len: MAX_PASSPHRASE_LEN,
            common: Arc::new(common),
        }
    }
}

impl PassphrasePolicy {
    /// Check a passphrase, returning the denial message on failure
    pub fn check(&self, passphrase: &str) -> Result<(), String> {
        let len = passphrase.chars().count();
        if len < self.min_len || len > self.max_len {
            return Err(format!(
                "passphrase length should be greater equal to {} and lower equal to {}",
                self.min_len, self.max_len
            ));
        }
        if self.common.contains(&passphrase.to_lowercase()) {
            return Err("passphrase is so common, please use another more complex password".into());
        }
        Ok(())
    }
}

/// Validate a GpgKey on create or update
pub fn validate(key: &GpgKey, policy: &PassphrasePolicy) -> Result<(), String> {
    policy.check(&key.spec.passphrase)?;

    let armored = key.spec.armored_private_key.trim();
    if armored.len() < MIN_ARMORED_KEY_LEN {
        return Err("armored key length can't be empty".into());
    }
    if armored.starts_with("----") || armored.ends_with("----") {
        return Err(
            "object GPGKey on field ArmoredPrivateKey should not have prefix or suffix of dashes"
                .into(),
        );
    }
    Ok(())
}

/// Handle validating admission review for GpgKeys
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = match decode_object::<GpgKey>(&req) {
        Ok(None) => AdmissionResponse::from(&req),
        Ok(Some(key)) => respond(&req, validate(&key, &state.passphrase_policy)),
        Err(e) => AdmissionResponse::invalid(e.to_string()),
    };
    Json(response.into_review())
}
