//! SopsSecret controller implementation
//!
//! Each pass re-fetches the SopsSecret, resolves its GpgKey, decrypts the
//! template and converges the child Secret. Every exit point except a
//! vanished SopsSecret publishes a [`ReconcileOutcome`] as the status message.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde::Deserialize;
use sops_decrypt::Format;
use tracing::{debug, error, info, instrument, warn};

use super::Context;
use crate::crd::{
    GpgKey, Health, SecretTemplate, SopsSecret, SopsSecretSpec, SopsSecretStatus,
    MANAGED_ANNOTATION,
};
use crate::Error;

/// Terminal state of one reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Child secret matches the decrypted template
    Healthy,
    /// `spec.suspend` is set
    Suspended,
    /// The referenced GpgKey could not be fetched
    KeyRefFetchFailed,
    /// The template could not be decrypted
    DecryptionFailed,
    /// The child secret could not be built from the template
    ChildCreationFailed,
    /// No controller reference could be built for the child secret
    OwnershipFailed,
    /// Looking up or creating the child secret failed
    UnknownError,
    /// A same-named Secret exists that this SopsSecret does not manage
    NotOwned,
    /// Writing the refreshed child secret failed
    UpdateFailed,
}

impl ReconcileOutcome {
    /// Status message published for this outcome
    pub fn message(&self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Suspended => "Reconciliation is suspended",
            Self::KeyRefFetchFailed => "Err fetching GPGKeyRefName",
            Self::DecryptionFailed => "Decryption error",
            Self::ChildCreationFailed => "New child secret creation error",
            Self::OwnershipFailed => "Setting controller ownership of the child secret error",
            Self::UnknownError => "Unknown Error",
            Self::NotOwned => "Child secret is not owned by controller error",
            Self::UpdateFailed => "Child secret update error",
        }
    }

    /// Health reported beside the message
    pub fn health(&self) -> Health {
        match self {
            Self::Healthy => Health::Healthy,
            _ => Health::Unhealthy,
        }
    }

    /// Whether the pass should be retried after the configured delay
    pub fn should_requeue(&self) -> bool {
        !matches!(self, Self::Healthy | Self::Suspended)
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Reconcile a SopsSecret
///
/// Store errors while fetching the SopsSecret or writing its status are
/// returned so [`error_policy`] can requeue; every other failure becomes a
/// status message and a requeue decided here.
#[instrument(
    skip(obj, ctx),
    fields(sopssecret = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default())
)]
pub async fn reconcile(obj: Arc<SopsSecret>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    info!("reconciling SopsSecret");

    let Some(current) = ctx.kube.get_sops_secret(&namespace, &name).await? else {
        debug!("SopsSecret no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    let outcome = converge(&current, &ctx).await;
    update_status(&current, outcome, &ctx).await?;

    if outcome.should_requeue() {
        info!(outcome = %outcome, delay = ?ctx.requeue_after, "requeueing SopsSecret");
        Ok(Action::requeue(ctx.requeue_after))
    } else {
        info!(outcome = %outcome, "SopsSecret reconciled");
        Ok(Action::await_change())
    }
}

/// Error policy for the SopsSecret controller
///
/// Requeues after the configured delay; there is no backoff growth.
pub fn error_policy(obj: Arc<SopsSecret>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        sopssecret = %obj.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue_after)
}

/// Walk the pass from key lookup to refresh, stopping at the first failure
async fn converge(obj: &SopsSecret, ctx: &Context) -> ReconcileOutcome {
    let namespace = obj.namespace().unwrap_or_default();

    let key = match ctx.kube.get_gpg_key(&namespace, &obj.spec.gpg_key_ref_name).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            warn!(gpgkey = %obj.spec.gpg_key_ref_name, "referenced GpgKey not found");
            return ReconcileOutcome::KeyRefFetchFailed;
        }
        Err(e) => {
            warn!(gpgkey = %obj.spec.gpg_key_ref_name, error = %e, "failed to fetch GpgKey");
            return ReconcileOutcome::KeyRefFetchFailed;
        }
    };

    if obj.spec.suspend {
        info!("reconciliation is suspended for this object");
        return ReconcileOutcome::Suspended;
    }

    let template = match decrypt_template(obj, &key, ctx).await {
        Ok(template) => template,
        Err(outcome) => return outcome,
    };

    let mut desired = match derive_child(obj, &template) {
        Ok(secret) => secret,
        Err(e) => {
            warn!(error = %e, "failed to build child secret");
            return ReconcileOutcome::ChildCreationFailed;
        }
    };

    match obj.controller_owner_ref(&()) {
        Some(owner) => desired.metadata.owner_references = Some(vec![owner]),
        None => {
            warn!("SopsSecret has no uid, cannot own the child secret");
            return ReconcileOutcome::OwnershipFailed;
        }
    }

    let child_name = desired.name_any();
    let current = match ctx.kube.get_secret(&namespace, &child_name).await {
        Ok(Some(existing)) => existing,
        Ok(None) => {
            info!(secret = %child_name, "creating child secret");
            match ctx.kube.create_secret(&namespace, &desired).await {
                Ok(created) => created,
                Err(e) => {
                    warn!(secret = %child_name, error = %e, "failed to create child secret");
                    return ReconcileOutcome::UnknownError;
                }
            }
        }
        Err(e) => {
            warn!(secret = %child_name, error = %e, "failed to fetch child secret");
            return ReconcileOutcome::UnknownError;
        }
    };

    if !is_controlled_by(&current, obj) && !is_annotated_to_be_managed(&current) {
        warn!(
            secret = %child_name,
            "child secret is not owned by this SopsSecret; it pre-existed or is claimed by another SopsSecret"
        );
        return ReconcileOutcome::NotOwned;
    }

    if let Some(refreshed) = refresh(&current, &desired) {
        info!(secret = %child_name, "child secret needs to be refreshed");
        if let Err(e) = ctx.kube.replace_secret(&namespace, &refreshed).await {
            warn!(secret = %child_name, error = %e, "failed to update child secret");
            return ReconcileOutcome::UpdateFailed;
        }
        info!(secret = %child_name, "child secret refreshed");
    }

    ReconcileOutcome::Healthy
}

#[derive(Deserialize)]
struct PlainDocument {
    spec: SopsSecretSpec,
}

/// Decrypt the SopsSecret's template with the GpgKey's passphrase
async fn decrypt_template(
    obj: &SopsSecret,
    key: &GpgKey,
    ctx: &Context,
) -> Result<SecretTemplate, ReconcileOutcome> {
    let document = obj
        .encrypted_document()
        .and_then(|doc| serde_json::to_vec(&doc).map_err(Error::from))
        .map_err(|e| {
            warn!(error = %e, "failed to serialize SopsSecret for decryption");
            ReconcileOutcome::DecryptionFailed
        })?;

    let plain = ctx
        .decryptor
        .decrypt(&document, Format::Json, &key.spec.passphrase)
        .await
        .map_err(|e| {
            warn!(kind = ?e.kind(), report = %e.user_report(), "failed to decrypt SopsSecret");
            ReconcileOutcome::DecryptionFailed
        })?;

    let plain: PlainDocument = serde_json::from_slice(&plain).map_err(|e| {
        warn!(error = %e, "decrypted SopsSecret is not a valid spec");
        ReconcileOutcome::DecryptionFailed
    })?;
    Ok(plain.spec.secret_template)
}

/// Build the desired child Secret from the decrypted template
///
/// Owner references are left empty; the caller attaches the controller
/// reference.
pub fn derive_child(parent: &SopsSecret, template: &SecretTemplate) -> Result<Secret, Error> {
    let mut labels = parent.labels().clone();
    labels.extend(template.labels.clone().unwrap_or_default());
    let mut annotations = parent.annotations().clone();
    annotations.extend(template.annotations.clone().unwrap_or_default());

    let mut data = BTreeMap::new();
    for (key, encoded) in template.data.iter().flatten() {
        let bytes = STANDARD.decode(encoded).map_err(|e| {
            Error::child_secret(format!("secretTemplate.data[{key:?}] is not valid base64: {e}"))
        })?;
        data.insert(key.clone(), ByteString(bytes));
    }
    for (key, value) in template.string_data.iter().flatten() {
        data.insert(key.clone(), ByteString(value.clone().into_bytes()));
    }

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(template.name.clone().unwrap_or_else(|| parent.name_any())),
            namespace: parent.namespace(),
            labels: non_empty(labels),
            annotations: non_empty(annotations),
            ..Default::default()
        },
        data: non_empty(data),
        type_: Some(template.effective_type().to_string()),
        ..Default::default()
    })
}

fn non_empty<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// The live Secret with the desired fields applied, or `None` when it already matches
fn refresh(current: &Secret, desired: &Secret) -> Option<Secret> {
    let mut refreshed = current.clone();
    refreshed.data = desired.data.clone();
    refreshed.string_data = None;
    refreshed.type_ = desired.type_.clone();
    refreshed.metadata.labels = desired.metadata.labels.clone();
    refreshed.metadata.annotations = desired.metadata.annotations.clone();
    if is_annotated_to_be_managed(current) {
        refreshed.metadata.owner_references = desired.metadata.owner_references.clone();
    }

    (refreshed != *current).then_some(refreshed)
}

/// True when `secret` carries a controller reference to `owner`
fn is_controlled_by(secret: &Secret, owner: &SopsSecret) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    secret
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// True when the managed annotation is exactly `"true"`
fn is_annotated_to_be_managed(secret: &Secret) -> bool {
    secret.annotations().get(MANAGED_ANNOTATION).map(String::as_str) == Some("true")
}

/// Publish `outcome`, skipping the write when the status would not change
async fn update_status(
    obj: &SopsSecret,
    outcome: ReconcileOutcome,
    ctx: &Context,
) -> Result<(), Error> {
    let status = SopsSecretStatus {
        message: Some(outcome.message().to_string()),
        health: Some(outcome.health()),
        last_reconciled: Some(chrono::Utc::now().to_rfc3339()),
    };

    if obj
        .status
        .as_ref()
        .is_some_and(|current| current.same_outcome(&status))
    {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.kube
        .patch_sops_secret_status(
            &obj.namespace().unwrap_or_default(),
            &obj.name_any(),
            &status,
        )
        .await
}
