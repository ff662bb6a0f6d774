//! SOPS operator - decrypts SopsSecret resources into Kubernetes Secrets

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use sops_operator::config::Config;
use sops_operator::controller::{Context, FIELD_MANAGER};
use sops_operator::controller_runner::build_controllers;
use sops_operator::crd::{GpgKey, SopsSecret};
use sops_operator::telemetry::init_telemetry;
use sops_operator::webhook::{self, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client and the webhook server both need a process-wide provider.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let config = Config::parse();

    if config.crd {
        let sops_secret = serde_yaml::to_string(&SopsSecret::crd()?)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        let gpg_key = serde_yaml::to_string(&GpgKey::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{sops_secret}---\n{gpg_key}");
        return Ok(());
    }

    init_telemetry(config.log_format)?;
    config.validate()?;
    run_operator(config).await
}

/// Run the controllers and, when certificates are configured, the webhook
async fn run_operator(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting SOPS operator");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(
        Context::builder(client.clone())
            .gpg(config.gpg_binary())
            .requeue_after(config.requeue_after())
            .build(),
    );

    tracing::info!(
        requeue_after_minutes = config.requeue_after_minutes,
        concurrency = config.concurrency,
        "Starting controllers"
    );
    let mut tasks: Vec<Pin<Box<dyn Future<Output = ()> + Send>>> =
        build_controllers(client, ctx, config.concurrency);

    match config.webhook_cert_dir.clone() {
        Some(cert_dir) => {
            let addr = config.webhook_addr;
            tasks.push(Box::pin(async move {
                if let Err(e) =
                    webhook::serve(addr, &cert_dir, Arc::new(WebhookState::default())).await
                {
                    tracing::error!(error = %e, "Admission webhook stopped");
                }
            }));
        }
        None => tracing::info!("No webhook certificate directory configured, webhook disabled"),
    }

    futures::future::join_all(tasks).await;

    tracing::info!("Shutting down");
    Ok(())
}

/// Ensure both CRDs are installed, using server-side apply
///
/// Keeps the installed CRD versions in step with the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing SopsSecret CRD...");
    let sops_secret = SopsSecret::crd()?;
    crds.patch(
        "sopssecrets.secrets.sops-operator.io",
        &params,
        &Patch::Apply(&sops_secret),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install SopsSecret CRD: {}", e))?;

    tracing::info!("Installing GpgKey CRD...");
    crds.patch(
        "gpgkeys.secrets.sops-operator.io",
        &params,
        &Patch::Apply(&GpgKey::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install GpgKey CRD: {}", e))?;

    Ok(())
}
