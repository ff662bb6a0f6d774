//! GpgKey controller implementation
//!
//! Imports each GpgKey's private key into the local keyring so SopsSecrets
//! referencing it can be decrypted.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::Context;
use crate::crd::{GpgKey, GpgKeyStatus, FAILED, IMPORTED};
use crate::Error;

/// Reconcile a GpgKey
#[instrument(
    skip(key, ctx),
    fields(gpgkey = %key.name_any(), namespace = %key.namespace().unwrap_or_default())
)]
pub async fn reconcile(key: Arc<GpgKey>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = key.name_any();
    let namespace = key.namespace().unwrap_or_default();

    let Some(current) = ctx.kube.get_gpg_key(&namespace, &name).await? else {
        debug!("GpgKey no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    let imported = match ctx
        .importer
        .import(&namespace, &name, &current.spec.armored_private_key)
        .await
    {
        Ok(()) => {
            info!("private key imported");
            true
        }
        Err(e) => {
            warn!(error = %e, "failed to import private key");
            false
        }
    };

    let status = GpgKeyStatus::with_message(if imported { IMPORTED } else { FAILED });
    if current.status.as_ref() != Some(&status) {
        ctx.kube
            .patch_gpg_key_status(&namespace, &name, &status)
            .await?;
    }

    if imported {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.requeue_after))
    }
}

/// Error policy for the GpgKey controller
pub fn error_policy(key: Arc<GpgKey>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        gpgkey = %key.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.requeue_after)
}
