//! End-to-end decryption through the public API

use std::collections::HashMap;

use async_trait::async_trait;
use sops_decrypt::cipher::encrypt_value;
use sops_decrypt::shamir;
use sops_decrypt::{
    decrypt, DecryptErrorKind, Format, KeyUnlocker, MasterKey, TreeValue, UnlockError,
};

const DATA_KEY: [u8; 32] = [0x5A; 32];
const PASSPHRASE: &str = "correct horse battery staple";

/// Holds one private key per fingerprint, all protected by the same passphrase
struct Keyring {
    shares: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl KeyUnlocker for Keyring {
    async fn unlock(&self, key: &MasterKey, passphrase: &str) -> Result<Vec<u8>, UnlockError> {
        if passphrase != PASSPHRASE {
            return Err(UnlockError::Failed("gpg: decryption failed: Bad passphrase".into()));
        }
        self.shares
            .get(&key.identity)
            .cloned()
            .ok_or_else(|| UnlockError::Failed("gpg: decryption failed: No secret key".into()))
    }
}

fn enc(value: &str, path: &str) -> String {
    encrypt_value(&TreeValue::String(value.into()), &DATA_KEY, path).unwrap()
}

// =============================================================================
// YAML with Shamir key groups
// =============================================================================

fn shamir_yaml() -> (String, Vec<Vec<u8>>) {
    let parts = shamir::split(&DATA_KEY, 3, 2).unwrap();
    let yaml = format!(
        "\
apiVersion: v1
kind: Config
database:
  user: {user}
  password: {password}
  port: 5432
sops:
  shamir_threshold: 2
  encrypted_regex: ^(user|password)$
  key_groups:
    - pgp:
        - fp: FP-A
          enc: share-a
    - pgp:
        - fp: FP-B1
          enc: share-b1
        - fp: FP-B2
          enc: share-b2
    - age:
        - recipient: age1xyz
          enc: share-c
  version: 3.8.1
",
        user = enc("admin", "database:user:"),
        password = enc("s3cr3t", "database:password:"),
    );
    (yaml, parts)
}

#[tokio::test]
async fn story_two_of_three_groups_decrypt_yaml() {
    let (yaml, parts) = shamir_yaml();
    // Group B recovers through its second key; group C (age) is unsupported
    let keyring = Keyring {
        shares: HashMap::from([
            ("FP-A".to_string(), parts[0].clone()),
            ("FP-B2".to_string(), parts[1].clone()),
        ]),
    };

    let plain = decrypt(yaml.as_bytes(), Format::Yaml, PASSPHRASE, &keyring)
        .await
        .unwrap();
    let plain = String::from_utf8(plain).unwrap();

    assert!(plain.starts_with("apiVersion: v1\nkind: Config\ndatabase:\n"));
    assert!(plain.contains("user: admin"));
    assert!(plain.contains("password: s3cr3t"));
    assert!(plain.contains("port: 5432"));
    assert!(!plain.contains("sops"));
}

#[tokio::test]
async fn story_one_of_three_groups_reports_each_group() {
    let (yaml, parts) = shamir_yaml();
    let keyring = Keyring {
        shares: HashMap::from([("FP-B1".to_string(), parts[1].clone())]),
    };

    let err = decrypt(yaml.as_bytes(), Format::Yaml, PASSPHRASE, &keyring)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), DecryptErrorKind::DataKey);
    let aggregate = err.aggregate().unwrap();
    assert_eq!(aggregate.required, 2);
    assert_eq!(aggregate.groups.len(), 3);
    assert_eq!(aggregate.successful(), 1);

    let report = err.user_report();
    assert!(report.contains("Group 0: FAILED\n  FP-A: FAILED\n"));
    assert!(report.contains("Group 1: SUCCESS\n"));
    assert!(report.contains("Group 2: FAILED\n  age1xyz: FAILED\n"));
}

#[tokio::test]
async fn story_wrong_passphrase_fails_every_share() {
    let (yaml, parts) = shamir_yaml();
    let keyring = Keyring {
        shares: HashMap::from([
            ("FP-A".to_string(), parts[0].clone()),
            ("FP-B1".to_string(), parts[1].clone()),
        ]),
    };

    let err = decrypt(yaml.as_bytes(), Format::Yaml, "wrong", &keyring)
        .await
        .unwrap_err();

    assert_eq!(err.aggregate().unwrap().successful(), 0);
    assert!(err.user_report().contains("Bad passphrase"));
}

// =============================================================================
// dotenv with a single group
// =============================================================================

#[tokio::test]
async fn story_dotenv_single_group() {
    let dotenv = format!(
        "API_TOKEN={}\nGREETING_unencrypted=hello\\nworld\nsops_pgp__list_0__map_fp=FP-A\nsops_pgp__list_0__map_enc=share\nsops_version=3.8.1\n",
        enc("tok", "API_TOKEN:")
    );
    let keyring = Keyring {
        shares: HashMap::from([("FP-A".to_string(), DATA_KEY.to_vec())]),
    };

    let plain = decrypt(dotenv.as_bytes(), Format::Dotenv, PASSPHRASE, &keyring)
        .await
        .unwrap();

    assert_eq!(
        String::from_utf8(plain).unwrap(),
        "API_TOKEN=tok\nGREETING_unencrypted=hello\\nworld\n"
    );
}
