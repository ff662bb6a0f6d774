//! Shared controller context
//!
//! Holds the capabilities every reconciler needs behind trait objects so the
//! reconcilers can be exercised against mocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use sops_decrypt::{DecryptionProvider, KeyUnlocker, SopsDecryptor};

#[cfg(test)]
use mockall::automock;

use crate::crd::{GpgKey, GpgKeyStatus, SopsSecret, SopsSecretStatus};
use crate::gpg::{GpgBinary, KeyImporter};
use crate::Error;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "sops-operator";

/// Default delay before a failed pass is retried
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Trait abstracting the Kubernetes API operations used by the reconcilers
///
/// Lookups return `Ok(None)` when the object does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a SopsSecret
    async fn get_sops_secret(&self, namespace: &str, name: &str)
        -> Result<Option<SopsSecret>, Error>;

    /// Merge-patch the status of a SopsSecret
    async fn patch_sops_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsSecretStatus,
    ) -> Result<(), Error>;

    /// Fetch a GpgKey
    async fn get_gpg_key(&self, namespace: &str, name: &str) -> Result<Option<GpgKey>, Error>;

    /// Merge-patch the status of a GpgKey
    async fn patch_gpg_key_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GpgKeyStatus,
    ) -> Result<(), Error>;

    /// Fetch a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;

    /// Replace a Secret; the object's resourceVersion guards the write
    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_sops_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SopsSecret>, Error> {
        let api: Api<SopsSecret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_sops_secret_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SopsSecretStatus,
    ) -> Result<(), Error> {
        let api: Api<SopsSecret> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn get_gpg_key(&self, namespace: &str, name: &str) -> Result<Option<GpgKey>, Error> {
        let api: Api<GpgKey> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_gpg_key_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GpgKeyStatus,
    ) -> Result<(), Error> {
        let api: Api<GpgKey> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), secret).await?)
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = secret
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::child_secret("secret has no name"))?;
        Ok(api.replace(name, &PostParams::default(), secret).await?)
    }
}

/// Controller context containing shared state and capabilities
///
/// Use [`Context::builder`] to construct; every capability defaults to the
/// production implementation.
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .gpg(GpgBinary::new("gpg", "/var/lib/sops-operator/keys"))
///     .requeue_after(Duration::from_secs(300))
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Turns encrypted SopsSecret documents into plaintext
    pub decryptor: Arc<dyn DecryptionProvider>,
    /// Imports GpgKey private keys into the local keyring
    pub importer: Arc<dyn KeyImporter>,
    /// Delay before a failed pass is retried
    pub requeue_after: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock capabilities
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        decryptor: Arc<dyn DecryptionProvider>,
        importer: Arc<dyn KeyImporter>,
    ) -> Self {
        Self {
            kube,
            decryptor,
            importer,
            requeue_after: DEFAULT_REQUEUE_AFTER,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    gpg: GpgBinary,
    decryptor: Option<Arc<dyn DecryptionProvider>>,
    importer: Option<Arc<dyn KeyImporter>>,
    requeue_after: Duration,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            gpg: GpgBinary::default(),
            decryptor: None,
            importer: None,
            requeue_after: DEFAULT_REQUEUE_AFTER,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// gpg invocation backing the default decryptor and importer
    pub fn gpg(mut self, gpg: GpgBinary) -> Self {
        self.gpg = gpg;
        self
    }

    /// Override the decryption provider
    pub fn decryptor(mut self, decryptor: Arc<dyn DecryptionProvider>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Override the key importer
    pub fn key_importer(mut self, importer: Arc<dyn KeyImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Set the retry delay for failed passes
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = delay;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let gpg = Arc::new(self.gpg);
        let unlocker: Arc<dyn KeyUnlocker> = gpg.clone();
        let importer: Arc<dyn KeyImporter> = gpg;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            decryptor: self
                .decryptor
                .unwrap_or_else(|| Arc::new(SopsDecryptor::new(unlocker))),
            importer: self.importer.unwrap_or(importer),
            requeue_after: self.requeue_after,
        }
    }
}
