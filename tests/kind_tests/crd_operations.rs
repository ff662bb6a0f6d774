//! Integration tests for CRD operations
//!
//! These tests tell the story of how users store SopsSecrets and GpgKeys
//! through the Kubernetes API.

use kube::api::{Api, PostParams};
use kube::ResourceExt;
use serde_json::json;

use sops_operator::crd::{GpgKey, GpgKeySpec, SopsSecret};

use super::helpers::{create_namespace, delete_namespace, ensure_test_cluster};

/// Story: the API server keeps the `sops` block verbatim next to the spec
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_sops_metadata_survives_a_round_trip_through_the_api_server() {
    let client = ensure_test_cluster()
        .await
        .expect("Failed to setup test cluster");
    let ns = "crd-sops-metadata";
    create_namespace(&client, ns).await.unwrap();

    let object: SopsSecret = serde_json::from_value(json!({
        "apiVersion": "secrets.sops-operator.io/v1alpha1",
        "kind": "SopsSecret",
        "metadata": {"name": "db", "namespace": ns},
        "spec": {
            "gpg_key_ref_name": "team-key",
            "secretTemplate": {"stringData": {"password": "ENC[AES256_GCM,data:Zm9v,iv:YmFy,tag:YmF6,type:str]"}}
        },
        "sops": {
            "pgp": [{"fp": "FBC7B9E2A4F9289AC0C1D4843D16CEE4A27381B4", "enc": "-----BEGIN PGP MESSAGE-----"}],
            "encrypted_regex": "^(data|stringData)$",
            "lastmodified": "2024-03-01T10:00:00Z",
            "version": "3.8.1"
        }
    }))
    .unwrap();

    let api: Api<SopsSecret> = Api::namespaced(client.clone(), ns);
    api.create(&PostParams::default(), &object).await.unwrap();

    let stored = api.get("db").await.unwrap();
    assert_eq!(stored.spec.gpg_key_ref_name, "team-key");
    assert_eq!(stored.sops, object.sops);

    delete_namespace(&client, ns).await;
}

/// Story: a GpgKey is created and listed by its short name's kind
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_gpg_key_is_stored_and_listed() {
    let client = ensure_test_cluster()
        .await
        .expect("Failed to setup test cluster");
    let ns = "crd-gpg-key";
    create_namespace(&client, ns).await.unwrap();

    let api: Api<GpgKey> = Api::namespaced(client.clone(), ns);
    let key = GpgKey::new(
        "team-key",
        GpgKeySpec {
            armored_private_key: "lQdGBGE4a9ABEADq3fVz".repeat(60),
            passphrase: "tangerine orbit lantern 42".into(),
        },
    );
    api.create(&PostParams::default(), &key).await.unwrap();

    let keys = api.list(&Default::default()).await.unwrap();
    assert_eq!(
        keys.items.iter().map(|k| k.name_any()).collect::<Vec<_>>(),
        vec!["team-key".to_string()]
    );

    delete_namespace(&client, ns).await;
}
