//! dotenv store
//!
//! Metadata lives in the same flat namespace as the data, as `sops_`-prefixed
//! keys whose nesting is spelled with `__map_` and `__list_<index>`.

use serde_json::{Map, Value};

use super::{metadata_from_json, CodecError, Format};
use crate::tree::{Tree, TreeBranch, TreeValue};

const METADATA_PREFIX: &str = "sops_";
const MAP_SEPARATOR: &str = "__map_";
const LIST_SEPARATOR: &str = "__list_";

pub(super) fn load_encrypted(data: &[u8]) -> Result<Tree, CodecError> {
    let text = std::str::from_utf8(data).map_err(|e| CodecError::parse(Format::Dotenv, e))?;

    let mut branch = TreeBranch::default();
    let mut flat_metadata = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            CodecError::parse(Format::Dotenv, format!("invalid dotenv input line: {}", line))
        })?;
        let value = value.replace("\\n", "\n");
        match key.strip_prefix(METADATA_PREFIX) {
            Some(meta_key) => flat_metadata.push((meta_key.to_string(), value)),
            None => branch.push(key, TreeValue::String(value)),
        }
    }

    if flat_metadata.is_empty() {
        return Err(CodecError::MetadataNotFound);
    }
    let mut metadata = unflatten(flat_metadata)?;
    decode_non_strings(&mut metadata);

    Ok(Tree {
        branches: vec![branch],
        metadata: metadata_from_json(Value::Object(metadata))?,
    })
}

pub(super) fn emit_plain(branches: &[TreeBranch]) -> Result<Vec<u8>, CodecError> {
    let mut out = String::new();
    for branch in branches {
        for item in &branch.0 {
            let value = match &item.value {
                TreeValue::String(s) => s.clone(),
                TreeValue::Int(i) => i.to_string(),
                TreeValue::Float(f) => f.to_string(),
                TreeValue::Bool(b) => b.to_string(),
                TreeValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                TreeValue::Null => String::new(),
                TreeValue::Branch(_) | TreeValue::Sequence(_) => {
                    return Err(CodecError::emit(
                        Format::Dotenv,
                        format!("cannot use complex value for key {:?}", item.key),
                    ))
                }
            };
            out.push_str(&item.key);
            out.push('=');
            out.push_str(&value.replace('\n', "\\n"));
            out.push('\n');
        }
    }
    Ok(out.into_bytes())
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Split `pgp__list_0__map_fp` into `[Key(pgp), Index(0), Key(fp)]`
fn segments(flat_key: &str) -> Result<Vec<Segment>, CodecError> {
    let invalid = || {
        CodecError::InvalidMetadata(format!("invalid flattened metadata key {:?}", flat_key))
    };

    let mut out = Vec::new();
    let mut rest = flat_key;
    let mut next_is_index = false;
    loop {
        let map_at = rest.find(MAP_SEPARATOR);
        let list_at = rest.find(LIST_SEPARATOR);
        let (token, next) = match (map_at, list_at) {
            (Some(m), Some(l)) if l < m => (&rest[..l], Some((l, true))),
            (Some(m), _) => (&rest[..m], Some((m, false))),
            (None, Some(l)) => (&rest[..l], Some((l, true))),
            (None, None) => (rest, None),
        };

        if next_is_index {
            out.push(Segment::Index(token.parse().map_err(|_| invalid())?));
        } else if token.is_empty() {
            return Err(invalid());
        } else {
            out.push(Segment::Key(token.to_string()));
        }

        match next {
            Some((at, is_list)) => {
                let separator = if is_list { LIST_SEPARATOR } else { MAP_SEPARATOR };
                rest = &rest[at + separator.len()..];
                next_is_index = is_list;
            }
            None => return Ok(out),
        }
    }
}

fn unflatten(flat: Vec<(String, String)>) -> Result<Map<String, Value>, CodecError> {
    let mut root = Value::Object(Map::new());
    for (key, value) in flat {
        let path = segments(&key)?;
        insert(&mut root, &path, Value::String(value), &key)?;
    }
    match root {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn insert(target: &mut Value, path: &[Segment], value: Value, key: &str) -> Result<(), CodecError> {
    let conflict =
        || CodecError::InvalidMetadata(format!("conflicting flattened metadata key {:?}", key));

    let Some((head, tail)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    let empty_child = || match tail.first() {
        Some(Segment::Index(_)) => Value::Array(Vec::new()),
        _ => Value::Object(Map::new()),
    };

    match head {
        Segment::Key(name) => {
            let Value::Object(map) = target else {
                return Err(conflict());
            };
            let child = map.entry(name.clone()).or_insert_with(empty_child);
            insert(child, tail, value, key)
        }
        Segment::Index(index) => {
            let Value::Array(items) = target else {
                return Err(conflict());
            };
            // lists are flattened densely in order
            if *index > items.len() {
                return Err(CodecError::InvalidMetadata(format!(
                    "list index out of order in flattened metadata key {:?}",
                    key
                )));
            }
            if *index == items.len() {
                items.push(empty_child());
            }
            insert(&mut items[*index], tail, value, key)
        }
    }
}

/// dotenv carries every value as a string; restore the numeric fields
fn decode_non_strings(metadata: &mut Map<String, Value>) {
    let threshold = match metadata.get("shamir_threshold") {
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        _ => None,
    };
    if let Some(n) = threshold {
        metadata.insert("shamir_threshold".to_string(), Value::from(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{parse, serialize};

    const DOCUMENT: &str = "\
# database settings
DB_PASSWORD=ENC[AES256_GCM,data:AA==,iv:AA==,tag:AA==,type:str]
CERT=line1\\nline2
sops_version=3.8.1
sops_shamir_threshold=2
sops_key_groups__list_0__map_pgp__list_0__map_fp=FP0
sops_key_groups__list_0__map_pgp__list_0__map_enc=-----BEGIN PGP MESSAGE-----\\nabc
sops_key_groups__list_1__map_pgp__list_0__map_fp=FP1
sops_key_groups__list_1__map_pgp__list_0__map_enc=xyz
sops_encrypted_regex=^DB_
";

    #[test]
    fn metadata_keys_are_unflattened() {
        let tree = parse(DOCUMENT.as_bytes(), Format::Dotenv).unwrap();
        let metadata = &tree.metadata;

        assert_eq!(metadata.shamir_threshold, 2);
        assert_eq!(metadata.key_groups.len(), 2);
        assert_eq!(metadata.key_groups[0][0].identity, "FP0");
        assert_eq!(
            metadata.key_groups[0][0].encrypted_key,
            "-----BEGIN PGP MESSAGE-----\nabc"
        );
        assert_eq!(metadata.key_groups[1][0].identity, "FP1");
        assert!(metadata.selector.is_encrypted(&["DB_PASSWORD".to_string()]));
        assert!(!metadata.selector.is_encrypted(&["CERT".to_string()]));
    }

    #[test]
    fn comments_are_dropped_and_newlines_round_trip() {
        let tree = parse(DOCUMENT.as_bytes(), Format::Dotenv).unwrap();
        assert_eq!(tree.branches[0].len(), 2);
        assert_eq!(
            tree.branches[0].get("CERT"),
            Some(&TreeValue::String("line1\nline2".into()))
        );

        let text = String::from_utf8(serialize(&tree.branches, Format::Dotenv).unwrap()).unwrap();
        assert!(text.starts_with("DB_PASSWORD=ENC["));
        assert!(text.ends_with("CERT=line1\\nline2\n"));
        assert!(!text.contains("sops_"));
    }

    #[test]
    fn line_without_equals_is_rejected() {
        assert!(matches!(
            parse(b"JUSTAKEY\nsops_version=1\n", Format::Dotenv),
            Err(CodecError::Parse { .. })
        ));
    }

    #[test]
    fn nested_values_cannot_be_emitted() {
        let mut branch = TreeBranch::default();
        branch.push("A", TreeValue::Branch(TreeBranch::default()));
        assert!(serialize(&[branch], Format::Dotenv).is_err());
    }

    #[test]
    fn segments_parse_mixed_separators() {
        assert_eq!(
            segments("pgp__list_10__map_created_at").unwrap(),
            vec![
                Segment::Key("pgp".into()),
                Segment::Index(10),
                Segment::Key("created_at".into()),
            ]
        );
        assert!(segments("pgp__list_x").is_err());
    }

    #[test]
    fn sparse_or_huge_list_index_is_rejected() {
        for document in [
            "sops_version=3.8.1\nsops_pgp__list_18446744073709551615__map_fp=A\n",
            "sops_version=3.8.1\nsops_pgp__list_99999999999__map_fp=A\n",
            "sops_version=3.8.1\nsops_pgp__list_0__map_fp=A\nsops_pgp__list_2__map_fp=B\n",
        ] {
            assert!(matches!(
                parse(document.as_bytes(), Format::Dotenv),
                Err(CodecError::InvalidMetadata(_))
            ));
        }
    }
}
