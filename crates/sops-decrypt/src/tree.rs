//! In-memory document tree
//!
//! A parsed SOPS document is a list of branches (one per YAML document, one
//! for every other format). Branches keep their keys in source order so that
//! a decrypted document serializes with the same structure it was read with.

use crate::metadata::Metadata;

/// A single node value in a document tree
#[derive(Clone, Debug, PartialEq)]
pub enum TreeValue {
    /// Nested mapping
    Branch(TreeBranch),
    /// Ordered sequence
    Sequence(Vec<TreeValue>),
    /// String leaf (ciphertext before decryption)
    String(String),
    /// Integer leaf
    Int(i64),
    /// Floating point leaf
    Float(f64),
    /// Boolean leaf
    Bool(bool),
    /// Raw bytes leaf (`type:bytes`)
    Bytes(Vec<u8>),
    /// Explicit null
    Null,
}

/// Key/value pair inside a branch
#[derive(Clone, Debug, PartialEq)]
pub struct TreeItem {
    /// Mapping key
    pub key: String,
    /// Mapping value
    pub value: TreeValue,
}

/// Ordered mapping
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeBranch(pub Vec<TreeItem>);

impl TreeBranch {
    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&TreeValue> {
        self.0.iter().find(|item| item.key == key).map(|item| &item.value)
    }

    /// Remove an item by key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<TreeValue> {
        let index = self.0.iter().position(|item| item.key == key)?;
        Some(self.0.remove(index).value)
    }

    /// Append an item
    pub fn push(&mut self, key: impl Into<String>, value: TreeValue) {
        self.0.push(TreeItem {
            key: key.into(),
            value,
        });
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the branch has no items
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed document: the data branches plus the `sops` metadata block
#[derive(Clone, Debug)]
pub struct Tree {
    /// Document branches with the metadata key removed
    pub branches: Vec<TreeBranch>,
    /// Encryption metadata
    pub metadata: Metadata,
}

impl Tree {
    /// Visit every leaf with its key path, replacing it with the callback's result.
    ///
    /// Sequence items share their parent's path.
    pub fn walk_leaves<E, F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&[String], &mut TreeValue) -> Result<(), E>,
    {
        let mut path = Vec::new();
        for branch in &mut self.branches {
            walk_branch(branch, &mut path, &mut f)?;
        }
        Ok(())
    }
}

fn walk_branch<E, F>(branch: &mut TreeBranch, path: &mut Vec<String>, f: &mut F) -> Result<(), E>
where
    F: FnMut(&[String], &mut TreeValue) -> Result<(), E>,
{
    for item in &mut branch.0 {
        path.push(item.key.clone());
        let result = walk_value(&mut item.value, path, f);
        path.pop();
        result?;
    }
    Ok(())
}

fn walk_value<E, F>(value: &mut TreeValue, path: &mut Vec<String>, f: &mut F) -> Result<(), E>
where
    F: FnMut(&[String], &mut TreeValue) -> Result<(), E>,
{
    match value {
        TreeValue::Branch(branch) => walk_branch(branch, path, f),
        TreeValue::Sequence(items) => {
            for item in items {
                walk_value(item, path, f)?;
            }
            Ok(())
        }
        leaf => f(path, leaf),
    }
}
