//! SOPS metadata block
//!
//! [`StoredMetadata`] mirrors the `sops` key as it appears on disk.
//! [`Metadata`] is the validated form used by the resolver and cipher walk.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::stores::CodecError;

/// Suffix that marks a key as plaintext when no other selector is configured
pub const DEFAULT_UNENCRYPTED_SUFFIX: &str = "_unencrypted";

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// PGP master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PgpKey {
    /// Key fingerprint
    #[serde(default)]
    pub fp: String,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Armored, encrypted data key (or Shamir part)
    #[serde(default)]
    pub enc: String,
}

/// AWS KMS master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct KmsKey {
    /// Key ARN
    #[serde(default)]
    pub arn: String,
    /// Optional IAM role to assume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Encrypted data key
    #[serde(default)]
    pub enc: String,
    /// AWS profile name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,
}

/// GCP KMS master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GcpKmsKey {
    /// CryptoKey resource ID
    #[serde(default)]
    pub resource_id: String,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Encrypted data key
    #[serde(default)]
    pub enc: String,
}

/// Azure Key Vault master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AzureKvKey {
    /// Vault URL
    #[serde(default)]
    pub vault_url: String,
    /// Key name
    #[serde(default)]
    pub name: String,
    /// Key version
    #[serde(default)]
    pub version: String,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Encrypted data key
    #[serde(default)]
    pub enc: String,
}

/// HashiCorp Vault transit master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct VaultKey {
    /// Vault address
    #[serde(default)]
    pub vault_address: String,
    /// Transit engine mount path
    #[serde(default)]
    pub engine_path: String,
    /// Transit key name
    #[serde(default)]
    pub key_name: String,
    /// Creation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Encrypted data key
    #[serde(default)]
    pub enc: String,
}

/// age master key entry
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AgeKey {
    /// age recipient
    #[serde(default)]
    pub recipient: String,
    /// Encrypted data key
    #[serde(default)]
    pub enc: String,
}

/// One key group as stored: a list per provider
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StoredKeyGroup {
    /// AWS KMS keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kms: Vec<KmsKey>,
    /// GCP KMS keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gcp_kms: Vec<GcpKmsKey>,
    /// Azure Key Vault keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azure_kv: Vec<AzureKvKey>,
    /// HashiCorp Vault keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hc_vault: Vec<VaultKey>,
    /// age keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<AgeKey>,
    /// PGP keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgp: Vec<PgpKey>,
}

impl StoredKeyGroup {
    fn is_empty(&self) -> bool {
        self.kms.is_empty()
            && self.gcp_kms.is_empty()
            && self.azure_kv.is_empty()
            && self.hc_vault.is_empty()
            && self.age.is_empty()
            && self.pgp.is_empty()
    }

    /// Master keys in provider order: kms, gcp_kms, azure_kv, hc_vault, age, pgp
    fn master_keys(&self) -> Vec<MasterKey> {
        let mut keys = Vec::new();
        keys.extend(self.kms.iter().map(|k| MasterKey {
            kind: MasterKeyKind::Kms,
            identity: match &k.role {
                Some(role) if !role.is_empty() => format!("{}+{}", k.arn, role),
                _ => k.arn.clone(),
            },
            encrypted_key: k.enc.clone(),
            created_at: k.created_at.clone(),
        }));
        keys.extend(self.gcp_kms.iter().map(|k| MasterKey {
            kind: MasterKeyKind::GcpKms,
            identity: k.resource_id.clone(),
            encrypted_key: k.enc.clone(),
            created_at: k.created_at.clone(),
        }));
        keys.extend(self.azure_kv.iter().map(|k| MasterKey {
            kind: MasterKeyKind::AzureKv,
            identity: format!("{}/keys/{}/{}", k.vault_url, k.name, k.version),
            encrypted_key: k.enc.clone(),
            created_at: k.created_at.clone(),
        }));
        keys.extend(self.hc_vault.iter().map(|k| MasterKey {
            kind: MasterKeyKind::HcVault,
            identity: format!("{}/v1/{}/keys/{}", k.vault_address, k.engine_path, k.key_name),
            encrypted_key: k.enc.clone(),
            created_at: k.created_at.clone(),
        }));
        keys.extend(self.age.iter().map(|k| MasterKey {
            kind: MasterKeyKind::Age,
            identity: k.recipient.clone(),
            encrypted_key: k.enc.clone(),
            created_at: None,
        }));
        keys.extend(self.pgp.iter().map(|k| MasterKey {
            kind: MasterKeyKind::Pgp,
            identity: k.fp.clone(),
            encrypted_key: k.enc.clone(),
            created_at: k.created_at.clone(),
        }));
        keys
    }
}

/// The `sops` block exactly as serialized in an encrypted document
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StoredMetadata {
    /// Number of key groups required to reconstruct the data key
    #[serde(default, skip_serializing_if = "is_zero")]
    pub shamir_threshold: usize,
    /// Explicit key groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_groups: Vec<StoredKeyGroup>,
    /// Flat key lists, used when `key_groups` is absent
    #[serde(flatten)]
    pub keys: StoredKeyGroup,
    /// Last modification timestamp
    #[serde(rename = "lastmodified", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Encrypted document MAC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// sops version that wrote the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Keys ending with this suffix are left in plaintext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_suffix: Option<String>,
    /// Only keys ending with this suffix are encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_suffix: Option<String>,
    /// Keys matching this regex are left in plaintext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_regex: Option<String>,
    /// Only keys matching this regex are encrypted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_regex: Option<String>,
}

/// Provider of a master key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MasterKeyKind {
    /// OpenPGP
    Pgp,
    /// AWS KMS
    Kms,
    /// GCP KMS
    GcpKms,
    /// Azure Key Vault
    AzureKv,
    /// HashiCorp Vault transit
    HcVault,
    /// age
    Age,
}

impl fmt::Display for MasterKeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pgp => "pgp",
            Self::Kms => "kms",
            Self::GcpKms => "gcp_kms",
            Self::AzureKv => "azure_kv",
            Self::HcVault => "hc_vault",
            Self::Age => "age",
        };
        f.write_str(name)
    }
}

/// One encrypted copy of the data key (or a Shamir part of it)
#[derive(Clone, Debug, PartialEq)]
pub struct MasterKey {
    /// Provider
    pub kind: MasterKeyKind,
    /// Human-readable identity (fingerprint, ARN, recipient, ...)
    pub identity: String,
    /// Provider-specific ciphertext of the key share
    pub encrypted_key: String,
    /// Creation timestamp, when recorded
    pub created_at: Option<String>,
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// An ordered set of key shares; succeeds if any share decrypts
pub type KeyGroup = Vec<MasterKey>;

/// Rule deciding which leaves carry ciphertext
#[derive(Clone, Debug)]
pub enum FieldSelector {
    /// Every leaf is encrypted unless a path key ends with the suffix
    UnencryptedSuffix(String),
    /// Only leaves under a key ending with the suffix are encrypted
    EncryptedSuffix(String),
    /// Every leaf is encrypted unless a path key matches
    UnencryptedRegex(Regex),
    /// Only leaves under a matching key are encrypted
    EncryptedRegex(Regex),
}

impl Default for FieldSelector {
    fn default() -> Self {
        Self::UnencryptedSuffix(DEFAULT_UNENCRYPTED_SUFFIX.to_string())
    }
}

impl FieldSelector {
    /// Whether the leaf at `path` is expected to be ciphertext
    pub fn is_encrypted(&self, path: &[String]) -> bool {
        match self {
            Self::UnencryptedSuffix(suffix) => !path.iter().any(|k| k.ends_with(suffix.as_str())),
            Self::EncryptedSuffix(suffix) => path.iter().any(|k| k.ends_with(suffix.as_str())),
            Self::UnencryptedRegex(re) => !path.iter().any(|k| re.is_match(k)),
            Self::EncryptedRegex(re) => path.iter().any(|k| re.is_match(k)),
        }
    }
}

/// Validated metadata
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    /// Key groups in document order
    pub key_groups: Vec<KeyGroup>,
    /// Threshold as written; see [`Metadata::required_groups`]
    pub shamir_threshold: usize,
    /// Leaf selection rule
    pub selector: FieldSelector,
    /// Document MAC (not verified)
    pub mac: Option<String>,
    /// Writer version
    pub version: Option<String>,
    /// Last modification timestamp
    pub last_modified: Option<String>,
}

impl Metadata {
    /// Number of successful groups needed to recover the data key.
    ///
    /// A single group must succeed on its own. With several groups an unset
    /// threshold means every group is required.
    pub fn required_groups(&self) -> usize {
        match self.key_groups.len() {
            0 | 1 => 1,
            n if self.shamir_threshold == 0 => n,
            _ => self.shamir_threshold,
        }
    }
}

impl TryFrom<StoredMetadata> for Metadata {
    type Error = CodecError;

    fn try_from(stored: StoredMetadata) -> Result<Self, Self::Error> {
        let selector = selector_from(&stored)?;

        let key_groups = if stored.key_groups.is_empty() {
            if stored.keys.is_empty() {
                Vec::new()
            } else {
                vec![stored.keys.master_keys()]
            }
        } else {
            stored.key_groups.iter().map(StoredKeyGroup::master_keys).collect()
        };

        Ok(Self {
            key_groups,
            shamir_threshold: stored.shamir_threshold,
            selector,
            mac: stored.mac,
            version: stored.version,
            last_modified: stored.last_modified,
        })
    }
}

fn selector_from(stored: &StoredMetadata) -> Result<FieldSelector, CodecError> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    let candidates = [
        non_empty(&stored.unencrypted_suffix),
        non_empty(&stored.encrypted_suffix),
        non_empty(&stored.unencrypted_regex),
        non_empty(&stored.encrypted_regex),
    ];
    if candidates.iter().filter(|c| c.is_some()).count() > 1 {
        return Err(CodecError::InvalidMetadata(
            "cannot use more than one of unencrypted_suffix, encrypted_suffix, \
             unencrypted_regex or encrypted_regex in the same file"
                .to_string(),
        ));
    }

    let compile = |pattern: &str| {
        Regex::new(pattern).map_err(|e| {
            CodecError::InvalidMetadata(format!("invalid regex {:?}: {}", pattern, e))
        })
    };

    let [unenc_suffix, enc_suffix, unenc_regex, enc_regex] = candidates;
    Ok(if let Some(s) = unenc_suffix {
        FieldSelector::UnencryptedSuffix(s)
    } else if let Some(s) = enc_suffix {
        FieldSelector::EncryptedSuffix(s)
    } else if let Some(p) = unenc_regex {
        FieldSelector::UnencryptedRegex(compile(&p)?)
    } else if let Some(p) = enc_regex {
        FieldSelector::EncryptedRegex(compile(&p)?)
    } else {
        FieldSelector::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn path(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn flat_key_lists_form_a_single_group() {
        let stored: StoredMetadata = serde_json::from_value(serde_json::json!({
            "pgp": [{"fp": "AAAA", "enc": "x", "created_at": "2024-01-01T00:00:00Z"}],
            "age": [{"recipient": "age1abc", "enc": "y"}],
            "version": "3.8.1"
        }))
        .unwrap();

        let metadata = Metadata::try_from(stored).unwrap();
        assert_eq!(metadata.key_groups.len(), 1);
        let kinds: Vec<_> = metadata.key_groups[0].iter().map(|k| k.kind).collect();
        assert_eq!(kinds, vec![MasterKeyKind::Age, MasterKeyKind::Pgp]);
        assert_eq!(metadata.key_groups[0][1].identity, "AAAA");
        assert_eq!(metadata.required_groups(), 1);
    }

    #[test]
    fn explicit_key_groups_take_precedence() {
        let stored: StoredMetadata = serde_json::from_value(serde_json::json!({
            "key_groups": [
                {"pgp": [{"fp": "A", "enc": "1"}]},
                {"pgp": [{"fp": "B", "enc": "2"}, {"fp": "C", "enc": "3"}]},
                {"hc_vault": [{"vault_address": "https://v", "engine_path": "transit", "key_name": "k", "enc": "4"}]}
            ],
            "shamir_threshold": 2
        }))
        .unwrap();

        let metadata = Metadata::try_from(stored).unwrap();
        assert_eq!(metadata.key_groups.len(), 3);
        assert_eq!(metadata.key_groups[1].len(), 2);
        assert_eq!(metadata.key_groups[2][0].identity, "https://v/v1/transit/keys/k");
        assert_eq!(metadata.required_groups(), 2);
    }

    #[test]
    fn unset_threshold_with_many_groups_requires_all() {
        let metadata = Metadata {
            key_groups: vec![vec![], vec![], vec![]],
            ..Default::default()
        };
        assert_eq!(metadata.required_groups(), 3);
    }

    #[test]
    fn kms_identity_includes_role() {
        let group = StoredKeyGroup {
            kms: vec![KmsKey {
                arn: "arn:aws:kms:eu-west-1:1:key/k".into(),
                role: Some("arn:aws:iam::1:role/r".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            group.master_keys()[0].to_string(),
            "arn:aws:kms:eu-west-1:1:key/k+arn:aws:iam::1:role/r"
        );
    }

    #[test]
    fn conflicting_selectors_are_rejected() {
        let stored = StoredMetadata {
            encrypted_suffix: Some("_enc".into()),
            encrypted_regex: Some("^data$".into()),
            ..Default::default()
        };
        assert!(matches!(
            Metadata::try_from(stored),
            Err(CodecError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let stored = StoredMetadata {
            encrypted_regex: Some("([".into()),
            ..Default::default()
        };
        assert!(Metadata::try_from(stored).is_err());
    }

    #[rstest]
    #[case::default_suffix(FieldSelector::default(), &["spec", "password"], true)]
    #[case::default_suffix_skips(FieldSelector::default(), &["spec", "name_unencrypted", "x"], false)]
    #[case::encrypted_suffix(FieldSelector::EncryptedSuffix("_enc".into()), &["a", "b_enc"], true)]
    #[case::encrypted_suffix_other(FieldSelector::EncryptedSuffix("_enc".into()), &["a", "b"], false)]
    #[case::encrypted_regex(
        FieldSelector::EncryptedRegex(Regex::new("^(data|stringData)$").unwrap()),
        &["spec", "secretTemplate", "stringData", "password"],
        true
    )]
    #[case::encrypted_regex_other(
        FieldSelector::EncryptedRegex(Regex::new("^(data|stringData)$").unwrap()),
        &["spec", "gpg_key_ref_name"],
        false
    )]
    #[case::unencrypted_regex(FieldSelector::UnencryptedRegex(Regex::new("^public").unwrap()), &["public_key"], false)]
    fn selector_decides_encrypted_leaves(
        #[case] selector: FieldSelector,
        #[case] keys: &[&str],
        #[case] expected: bool,
    ) {
        assert_eq!(selector.is_encrypted(&path(keys)), expected);
    }
}
