//! Controller runner - builds the controller futures
//!
//! Returns boxed futures that the caller joins. This keeps controller
//! construction separate from process wiring.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use crate::controller::{gpg_key, sops_secret, Context};
use crate::crd::{GpgKey, SopsSecret};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the SopsSecret and GpgKey controller futures
///
/// `concurrency` bounds parallel passes per controller; 0 means unbounded.
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let sops_secrets: Api<SopsSecret> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let gpg_keys: Api<GpgKey> = Api::all(client);

    let sops_ctrl = Controller::new(
        sops_secrets,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = sops_ctrl.store();
    let sops_ctrl = sops_ctrl
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .owns(secrets, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .watches(
            gpg_keys.clone(),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |key| referencing_sops_secrets(&store, &key),
        )
        .shutdown_on_signal()
        .run(sops_secret::reconcile, sops_secret::error_policy, ctx.clone())
        .for_each(log_reconcile_result("SopsSecret"));

    let key_ctrl = Controller::new(gpg_keys, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(gpg_key::reconcile, gpg_key::error_policy, ctx)
        .for_each(log_reconcile_result("GpgKey"));

    tracing::info!("- SopsSecret controller");
    tracing::info!("- GpgKey controller");

    vec![Box::pin(sops_ctrl), Box::pin(key_ctrl)]
}

/// SopsSecrets in the key's namespace whose `gpg_key_ref_name` names it
fn referencing_sops_secrets(store: &Store<SopsSecret>, key: &GpgKey) -> Vec<ObjectRef<SopsSecret>> {
    let namespace = key.namespace();
    let name = key.name_any();

    let affected: Vec<ObjectRef<SopsSecret>> = store
        .state()
        .iter()
        .filter(|s| s.namespace() == namespace && s.spec.gpg_key_ref_name == name)
        .map(|s| ObjectRef::from_obj(s.as_ref()))
        .collect();

    tracing::debug!(
        gpgkey = %name,
        affected_count = affected.len(),
        "Triggering re-reconciliation of SopsSecrets referencing GpgKey"
    );
    affected
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GpgKeySpec, SopsSecretSpec};
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher::Event;

    fn sops_secret(namespace: &str, name: &str, key_ref: &str) -> SopsSecret {
        let mut obj = SopsSecret::new(
            name,
            SopsSecretSpec {
                gpg_key_ref_name: key_ref.into(),
                ..Default::default()
            },
        );
        obj.metadata.namespace = Some(namespace.into());
        obj
    }

    #[test]
    fn gpg_key_change_maps_to_referencing_sops_secrets_in_namespace() {
        let mut writer: Writer<SopsSecret> = Writer::default();
        for obj in [
            sops_secret("apps", "db", "team-key"),
            sops_secret("apps", "cache", "other-key"),
            sops_secret("billing", "db", "team-key"),
        ] {
            writer.apply_watcher_event(&Event::Apply(obj));
        }
        let store = writer.as_reader();

        let mut key = GpgKey::new("team-key", GpgKeySpec::default());
        key.metadata.namespace = Some("apps".into());

        let refs = referencing_sops_secrets(&store, &key);
        assert_eq!(refs, vec![ObjectRef::new("db").within("apps")]);
    }
}
