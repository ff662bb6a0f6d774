//! SopsSecret Custom Resource Definition
//!
//! A SopsSecret is a Secret template encrypted with `sops`. The `sops`
//! metadata block sits at the root of the object, beside `spec`, exactly
//! where `sops --encrypt` writes it. `#[derive(CustomResource)]` only knows
//! about `spec` and `status`, so the [`Resource`] impl and the CRD are
//! written out here.

use std::borrow::Cow;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::TypeMeta;
use kube::Resource;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sops_decrypt::metadata::StoredMetadata;

use super::types::{Health, SecretTemplate};
use super::{GROUP, VERSION};
use crate::Error;

const KIND: &str = "SopsSecret";
const PLURAL: &str = "sopssecrets";

/// Specification for a SopsSecret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SopsSecretSpec {
    /// Secret to produce; its `data` and `stringData` are normally encrypted
    #[serde(rename = "secretTemplate", default)]
    pub secret_template: SecretTemplate,

    /// Name of the GpgKey, in the same namespace, that unlocks this object
    pub gpg_key_ref_name: String,

    /// Stop reconciling without touching the child secret
    #[serde(default, skip_serializing_if = "is_false")]
    pub suspend: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Status for a SopsSecret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretStatus {
    /// Outcome of the last reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Whether the child secret is in sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,

    /// RFC 3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,
}

impl SopsSecretStatus {
    /// True when `other` reports the same outcome, ignoring the timestamp
    pub fn same_outcome(&self, other: &Self) -> bool {
        self.message == other.message && self.health == other.health
    }
}

/// An encrypted Secret template plus its `sops` metadata
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SopsSecret {
    /// apiVersion and kind
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Desired state
    pub spec: SopsSecretSpec,

    /// Observed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SopsSecretStatus>,

    /// Encryption metadata written by `sops`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sops: Option<StoredMetadata>,
}

impl Resource for SopsSecret {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        KIND.into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        PLURAL.into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl SopsSecret {
    /// Create an unencrypted SopsSecret with the given name and spec
    pub fn new(name: &str, spec: SopsSecretSpec) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: Self::api_version(&()).into_owned(),
                kind: KIND.to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec,
            status: None,
            sops: None,
        }
    }

    /// The document handed to the decryption pipeline: `spec` and `sops` only
    pub fn encrypted_document(&self) -> Result<serde_json::Value, Error> {
        let sops = self
            .sops
            .as_ref()
            .ok_or_else(|| Error::serialization("object carries no sops metadata"))?;
        Ok(serde_json::json!({
            "spec": serde_json::to_value(&self.spec)?,
            "sops": serde_json::to_value(sops)?,
        }))
    }

    /// CustomResourceDefinition for SopsSecret
    pub fn crd() -> Result<CustomResourceDefinition, Error> {
        let spec = structural_schema::<SopsSecretSpec>()?;
        let status = structural_schema::<SopsSecretStatus>()?;

        let crd = serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": format!("{PLURAL}.{GROUP}") },
            "spec": {
                "group": GROUP,
                "names": {
                    "kind": KIND,
                    "listKind": format!("{KIND}List"),
                    "plural": PLURAL,
                    "singular": "sopssecret",
                    "shortNames": ["sops"],
                },
                "scope": "Namespaced",
                "versions": [{
                    "name": VERSION,
                    "served": true,
                    "storage": true,
                    "subresources": { "status": {} },
                    "additionalPrinterColumns": [
                        {"name": "Health", "type": "string", "jsonPath": ".status.health"},
                        {"name": "Message", "type": "string", "jsonPath": ".status.message"},
                        {"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"},
                    ],
                    "schema": {
                        "openAPIV3Schema": {
                            "description": "Secret template encrypted with sops",
                            "type": "object",
                            "required": ["spec"],
                            "properties": {
                                "spec": spec,
                                "status": status,
                                "sops": {
                                    "description": "Encryption metadata written by sops",
                                    "type": "object",
                                    "x-kubernetes-preserve-unknown-fields": true,
                                },
                            },
                        },
                    },
                }],
            },
        });
        Ok(serde_json::from_value(crd)?)
    }
}

/// OpenAPI v3 schema for `T`, rewritten to satisfy structural-schema rules
fn structural_schema<T: JsonSchema>() -> Result<serde_json::Value, Error> {
    let schema = SchemaSettings::openapi3()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .with_visitor(kube::core::schema::StructuralSchemaRewriter)
        .into_generator()
        .into_root_schema_for::<T>();
    let mut value = serde_json::to_value(schema)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("title");
    }
    Ok(value)
}
