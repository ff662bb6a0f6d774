//! JSON and binary-envelope stores

use serde_json::{Map, Number, Value};

use super::{metadata_from_json, CodecError, Format, METADATA_KEY};
use crate::tree::{Tree, TreeBranch, TreeValue};

/// Key holding the payload in the binary envelope
const BINARY_DATA_KEY: &str = "data";

pub(super) fn load_encrypted(data: &[u8], format: Format) -> Result<Tree, CodecError> {
    let value: Value = serde_json::from_slice(data).map_err(|e| CodecError::parse(format, e))?;
    let Value::Object(mut object) = value else {
        return Err(CodecError::parse(format, "document root is not an object"));
    };

    let metadata = object
        .shift_remove(METADATA_KEY)
        .ok_or(CodecError::MetadataNotFound)?;
    let metadata = metadata_from_json(metadata)?;

    let branch = branch_from_object(object);
    if format == Format::Binary && branch.get(BINARY_DATA_KEY).is_none() {
        return Err(CodecError::parse(format, "no binary data found in tree"));
    }

    Ok(Tree {
        branches: vec![branch],
        metadata,
    })
}

pub(super) fn emit_plain(branches: &[TreeBranch]) -> Result<Vec<u8>, CodecError> {
    let branch = single_branch(branches, Format::Json)?;
    let mut out = serde_json::to_vec_pretty(&object_from_branch(branch))
        .map_err(|e| CodecError::emit(Format::Json, e))?;
    out.push(b'\n');
    Ok(out)
}

pub(super) fn emit_binary(branches: &[TreeBranch]) -> Result<Vec<u8>, CodecError> {
    let branch = single_branch(branches, Format::Binary)?;
    match branch.get(BINARY_DATA_KEY) {
        Some(TreeValue::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(TreeValue::Bytes(b)) => Ok(b.clone()),
        Some(_) => Err(CodecError::emit(
            Format::Binary,
            "binary data is not a string",
        )),
        None => Err(CodecError::emit(Format::Binary, "no binary data found in tree")),
    }
}

fn single_branch(branches: &[TreeBranch], format: Format) -> Result<&TreeBranch, CodecError> {
    match branches {
        [branch] => Ok(branch),
        _ => Err(CodecError::emit(
            format,
            format!("expected exactly one branch, got {}", branches.len()),
        )),
    }
}

pub(super) fn branch_from_object(object: Map<String, Value>) -> TreeBranch {
    let mut branch = TreeBranch::default();
    for (key, value) in object {
        branch.push(key, tree_value(value));
    }
    branch
}

fn tree_value(value: Value) -> TreeValue {
    match value {
        Value::Null => TreeValue::Null,
        Value::Bool(b) => TreeValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => TreeValue::Int(i),
            None => TreeValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => TreeValue::String(s),
        Value::Array(items) => TreeValue::Sequence(items.into_iter().map(tree_value).collect()),
        Value::Object(object) => TreeValue::Branch(branch_from_object(object)),
    }
}

fn object_from_branch(branch: &TreeBranch) -> Value {
    let mut object = Map::with_capacity(branch.len());
    for item in &branch.0 {
        object.insert(item.key.clone(), json_value(&item.value));
    }
    Value::Object(object)
}

fn json_value(value: &TreeValue) -> Value {
    match value {
        TreeValue::Branch(branch) => object_from_branch(branch),
        TreeValue::Sequence(items) => Value::Array(items.iter().map(json_value).collect()),
        TreeValue::String(s) => Value::String(s.clone()),
        TreeValue::Int(i) => Value::Number((*i).into()),
        TreeValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        TreeValue::Bool(b) => Value::Bool(*b),
        TreeValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        TreeValue::Null => Value::Null,
    }
}
