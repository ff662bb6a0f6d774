//! YAML store, one branch per document

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{metadata_from_json, CodecError, Format, METADATA_KEY};
use crate::metadata::Metadata;
use crate::tree::{Tree, TreeBranch, TreeValue};

pub(super) fn load_encrypted(data: &[u8]) -> Result<Tree, CodecError> {
    let mut branches = Vec::new();
    let mut metadata: Option<Metadata> = None;

    for document in serde_yaml::Deserializer::from_slice(data) {
        let value = Value::deserialize(document).map_err(|e| CodecError::parse(Format::Yaml, e))?;
        let mut mapping = match value {
            Value::Null => continue,
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(CodecError::parse(
                    Format::Yaml,
                    "document root is not a mapping",
                ))
            }
        };

        if let Some(stored) = mapping.shift_remove(METADATA_KEY) {
            if metadata.is_none() {
                let json = serde_json::to_value(&stored)
                    .map_err(|e| CodecError::InvalidMetadata(e.to_string()))?;
                metadata = Some(metadata_from_json(json)?);
            }
        }
        branches.push(branch_from_mapping(mapping)?);
    }

    Ok(Tree {
        branches,
        metadata: metadata.ok_or(CodecError::MetadataNotFound)?,
    })
}

pub(super) fn emit_plain(branches: &[TreeBranch]) -> Result<Vec<u8>, CodecError> {
    let mut out = String::new();
    for (index, branch) in branches.iter().enumerate() {
        if index > 0 {
            out.push_str("---\n");
        }
        let text = serde_yaml::to_string(&mapping_from_branch(branch))
            .map_err(|e| CodecError::emit(Format::Yaml, e))?;
        out.push_str(&text);
    }
    Ok(out.into_bytes())
}

fn branch_from_mapping(mapping: Mapping) -> Result<TreeBranch, CodecError> {
    let mut branch = TreeBranch::default();
    for (key, value) in mapping {
        branch.push(key_string(key)?, tree_value(value)?);
    }
    Ok(branch)
}

fn key_string(key: Value) -> Result<String, CodecError> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Tagged(tagged) => key_string(tagged.value),
        _ => Err(CodecError::parse(
            Format::Yaml,
            "mapping keys must be scalars",
        )),
    }
}

fn tree_value(value: Value) -> Result<TreeValue, CodecError> {
    Ok(match value {
        Value::Null => TreeValue::Null,
        Value::Bool(b) => TreeValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => TreeValue::Int(i),
            None => TreeValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => TreeValue::String(s),
        Value::Sequence(items) => TreeValue::Sequence(
            items
                .into_iter()
                .map(tree_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(mapping) => TreeValue::Branch(branch_from_mapping(mapping)?),
        Value::Tagged(tagged) => tree_value(tagged.value)?,
    })
}

fn mapping_from_branch(branch: &TreeBranch) -> Value {
    let mut mapping = Mapping::with_capacity(branch.len());
    for item in &branch.0 {
        mapping.insert(Value::String(item.key.clone()), yaml_value(&item.value));
    }
    Value::Mapping(mapping)
}

fn yaml_value(value: &TreeValue) -> Value {
    match value {
        TreeValue::Branch(branch) => mapping_from_branch(branch),
        TreeValue::Sequence(items) => Value::Sequence(items.iter().map(yaml_value).collect()),
        TreeValue::String(s) => Value::String(s.clone()),
        TreeValue::Int(i) => Value::Number((*i).into()),
        TreeValue::Float(f) => Value::Number((*f).into()),
        TreeValue::Bool(b) => Value::Bool(*b),
        TreeValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        TreeValue::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use crate::stores::{parse, serialize, CodecError, Format};
    use crate::tree::TreeValue;

    const MULTI_DOC: &str = "\
b: ENC[AES256_GCM,data:AA==,iv:AA==,tag:AA==,type:str]
a:
  - one
  - 2
sops:
  encrypted_suffix: _secret
  pgp:
    - fp: FP1
      enc: x
---
second: true
sops:
  encrypted_suffix: _secret
  pgp:
    - fp: FP1
      enc: x
";

    #[test]
    fn every_document_becomes_a_branch() {
        let tree = parse(MULTI_DOC.as_bytes(), Format::Yaml).unwrap();
        assert_eq!(tree.branches.len(), 2);
        assert!(tree.branches.iter().all(|b| b.get("sops").is_none()));
        assert_eq!(tree.branches[1].get("second"), Some(&TreeValue::Bool(true)));
        assert_eq!(tree.metadata.key_groups[0][0].identity, "FP1");
    }

    #[test]
    fn documents_serialize_in_order_with_separator() {
        let tree = parse(MULTI_DOC.as_bytes(), Format::Yaml).unwrap();
        let text = String::from_utf8(serialize(&tree.branches, Format::Yaml).unwrap()).unwrap();

        assert!(text.starts_with("b: "));
        assert!(text.find("b: ").unwrap() < text.find("a:").unwrap());
        assert!(text.contains("---\nsecond: true"));
        assert!(!text.contains("sops"));
    }

    #[test]
    fn numeric_keys_become_strings() {
        let tree = parse(b"1: one\nsops:\n  version: 3.8.1\n", Format::Yaml).unwrap();
        assert_eq!(tree.branches[0].0[0].key, "1");
    }

    #[test]
    fn document_without_metadata_is_rejected() {
        assert_eq!(
            parse(b"a: b\n", Format::Yaml).unwrap_err(),
            CodecError::MetadataNotFound
        );
    }
}
