//! Threshold key resolution
//!
//! Recovers the data key from the metadata's key groups. Each group is tried
//! share by share until one unlocks; with several groups the recovered
//! parts are Shamir-combined once enough of them succeed.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

#[cfg(test)]
use mockall::automock;

use crate::error::{AggregateKeyError, DataKeyError, GroupOutcome, KeyFailure};
use crate::metadata::{KeyGroup, MasterKey, MasterKeyKind, Metadata};
use crate::shamir;

/// Symmetric data key, wiped on drop
pub type DataKey = Zeroizing<Vec<u8>>;

/// Failure to unlock a single share
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnlockError {
    /// The unlocker cannot handle this provider
    #[error("unsupported master key type {0}")]
    Unsupported(MasterKeyKind),
    /// The provider rejected the share (wrong key, wrong passphrase, ...)
    #[error("{0}")]
    Failed(String),
}

/// Decrypts one encrypted key share with a locally available private key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyUnlocker: Send + Sync {
    /// Return the plaintext share for `key`, unlocking the private key with `passphrase`
    async fn unlock(&self, key: &MasterKey, passphrase: &str) -> Result<Vec<u8>, UnlockError>;
}

/// Recover the data key for `metadata`.
///
/// Every group is attempted so the error, if any, describes all of them.
pub async fn resolve(
    metadata: &Metadata,
    passphrase: &str,
    unlocker: &dyn KeyUnlocker,
) -> Result<DataKey, DataKeyError> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    let mut outcomes = Vec::with_capacity(metadata.key_groups.len());

    for (index, group) in metadata.key_groups.iter().enumerate() {
        match resolve_group(group, passphrase, unlocker).await {
            Ok(part) => {
                debug!(group = index, "key group recovered");
                parts.push(part);
                outcomes.push(GroupOutcome::Success);
            }
            Err(failures) => {
                debug!(group = index, failures = failures.len(), "key group failed");
                outcomes.push(GroupOutcome::Failed(failures));
            }
        }
    }

    let required = metadata.required_groups();
    let result = match metadata.key_groups.len() {
        0 => Err(threshold_error(required, outcomes)),
        1 => match parts.pop() {
            Some(part) => Ok(Zeroizing::new(part)),
            None => Err(threshold_error(required, outcomes)),
        },
        _ if parts.len() < required => Err(threshold_error(required, outcomes)),
        _ => shamir::combine(&parts)
            .map(Zeroizing::new)
            .map_err(DataKeyError::from),
    };
    parts.zeroize();

    if let Err(DataKeyError::Threshold(err)) = &result {
        warn!(
            required = err.required,
            successful = err.successful(),
            groups = err.groups.len(),
            "data key recovery failed"
        );
    }
    result
}

fn threshold_error(required: usize, groups: Vec<GroupOutcome>) -> DataKeyError {
    DataKeyError::Threshold(AggregateKeyError { required, groups })
}

/// First share that unlocks wins; otherwise every share's failure is returned
async fn resolve_group(
    group: &KeyGroup,
    passphrase: &str,
    unlocker: &dyn KeyUnlocker,
) -> Result<Vec<u8>, Vec<KeyFailure>> {
    let mut failures = Vec::new();
    for key in group {
        match unlocker.unlock(key, passphrase).await {
            Ok(part) => return Ok(part),
            Err(e) => {
                debug!(key = %key, kind = %key.kind, error = %e, "share unlock failed");
                failures.push(KeyFailure {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Err(failures)
}
