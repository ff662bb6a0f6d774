//! Decryption of SOPS-encrypted documents
//!
//! The pipeline is parse → recover data key → decrypt leaves → serialize:
//!
//! - [`stores`] turns JSON, YAML, dotenv or binary envelopes into a [`Tree`]
//! - [`keyservice`] recovers the data key from the metadata's key groups,
//!   Shamir-combining parts when several groups are present
//! - [`cipher`] decrypts individual AES-256-GCM leaves
//!
//! Whole-document MAC verification is not performed: callers decrypt live
//! objects whose non-encrypted fields are routinely rewritten. Every leaf is
//! still authenticated, bound to its key path.

#![deny(missing_docs)]

pub mod cipher;
pub mod error;
pub mod keyservice;
pub mod metadata;
pub mod shamir;
pub mod stores;
pub mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub use error::{
    AggregateKeyError, DataKeyError, DecryptError, DecryptErrorKind, GroupOutcome, KeyFailure,
};
pub use keyservice::{DataKey, KeyUnlocker, UnlockError};
pub use metadata::{MasterKey, MasterKeyKind, Metadata};
pub use stores::{CodecError, Format};
pub use tree::{Tree, TreeBranch, TreeValue};

/// Result type for decryption operations
pub type Result<T, E = DecryptError> = std::result::Result<T, E>;

/// Decrypt an encrypted document into its plaintext serialization
pub async fn decrypt(
    data: &[u8],
    format: Format,
    passphrase: &str,
    unlocker: &dyn KeyUnlocker,
) -> Result<Vec<u8>> {
    let mut tree = stores::parse(data, format)?;
    debug!(
        %format,
        groups = tree.metadata.key_groups.len(),
        branches = tree.branches.len(),
        "parsed encrypted document"
    );

    let key = keyservice::resolve(&tree.metadata, passphrase, unlocker).await?;
    decrypt_tree(&mut tree, &key)?;
    Ok(stores::serialize(&tree.branches, format)?)
}

/// Decrypt every selected leaf of `tree` in place
pub fn decrypt_tree(tree: &mut Tree, key: &[u8]) -> Result<()> {
    let selector = tree.metadata.selector.clone();
    tree.walk_leaves(|path, value| {
        if !selector.is_encrypted(path) {
            return Ok(());
        }
        match value {
            TreeValue::String(ciphertext) => {
                let additional_data = format!("{}:", path.join(":"));
                *value = cipher::decrypt_value(ciphertext, key, &additional_data).map_err(
                    |source| DecryptError::Leaf {
                        path: path.join(":"),
                        source,
                    },
                )?;
                Ok(())
            }
            TreeValue::Null => Ok(()),
            _ => Err(DecryptError::NotEncrypted {
                path: path.join(":"),
            }),
        }
    })
}

/// A component able to turn encrypted bytes into plaintext bytes
#[async_trait]
pub trait DecryptionProvider: Send + Sync {
    /// Decrypt `data` in `format`, unlocking key shares with `passphrase`
    async fn decrypt(&self, data: &[u8], format: Format, passphrase: &str) -> Result<Vec<u8>>;
}

/// [`DecryptionProvider`] backed by this crate's pipeline
#[derive(Clone)]
pub struct SopsDecryptor {
    unlocker: Arc<dyn KeyUnlocker>,
}

impl SopsDecryptor {
    /// Create a decryptor that unlocks shares with `unlocker`
    pub fn new(unlocker: Arc<dyn KeyUnlocker>) -> Self {
        Self { unlocker }
    }
}

#[async_trait]
impl DecryptionProvider for SopsDecryptor {
    async fn decrypt(&self, data: &[u8], format: Format, passphrase: &str) -> Result<Vec<u8>> {
        decrypt(data, format, passphrase, self.unlocker.as_ref()).await
    }
}
