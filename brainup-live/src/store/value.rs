//! Hierarchical values and paths for the shared store.
//!
//! The store is a single tree of maps. Leaves are booleans, integers or
//! text. An absent value and an empty map are the same thing: removing the
//! last child of a map removes the map as well, so readers never observe
//! empty containers.
//!
//! ```text
//! sessions ── 482913 ── hostId            "u-alice"
//!                    ├─ started           true
//!                    ├─ roster ── 0190…   { participantIdentity, displayName }
//!                    └─ scores ── u-bob   2
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::StoreError;

/// A value stored at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Direct child of a map value.
    pub fn child(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Drop empty maps recursively. Returns `None` when nothing is left.
    pub fn normalized(self) -> Option<Value> {
        match self {
            Value::Map(map) => {
                let pruned: BTreeMap<String, Value> = map
                    .into_iter()
                    .filter_map(|(k, v)| v.normalized().map(|v| (k, v)))
                    .collect();
                if pruned.is_empty() {
                    None
                } else {
                    Some(Value::Map(pruned))
                }
            }
            leaf => Some(leaf),
        }
    }

    /// Flatten into `(relative segments, leaf)` pairs.
    fn collect_leaves(&self, prefix: &mut Vec<String>, out: &mut Vec<(Vec<String>, Value)>) {
        match self {
            Value::Map(map) => {
                for (key, child) in map {
                    prefix.push(key.clone());
                    child.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            leaf => out.push((prefix.clone(), leaf.clone())),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Slash-separated address of a node in the store tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse `a/b/c`. Leading, trailing and doubled slashes are ignored.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let segments: Vec<String> = input
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let path = Self { segments };
        path.validate()?;
        Ok(path)
    }

    /// Append one segment.
    pub fn child(&self, segment: impl fmt::Display) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<StorePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// True when one path is an ancestor of (or equal to) the other.
    ///
    /// A write at either path changes what a subscriber of the other sees.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Segments must be non-empty and free of `/`.
    pub fn validate(&self) -> Result<(), StoreError> {
        for segment in &self.segments {
            if segment.is_empty() || segment.contains('/') {
                return Err(StoreError::InvalidPath(format!(
                    "invalid segment {segment:?} in {self}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// The whole store: a root map plus path-addressed access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    root: BTreeMap<String, Value>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Value at `path`, cloned. The root path yields the whole tree.
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        let (first, rest) = match path.segments().split_first() {
            Some(split) => split,
            None if self.root.is_empty() => return None,
            None => return Some(Value::Map(self.root.clone())),
        };
        self.lookup(first, rest).cloned()
    }

    /// Borrowing lookup for non-root paths.
    pub fn peek(&self, path: &StorePath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        self.lookup(first, rest)
    }

    fn lookup(&self, first: &str, rest: &[String]) -> Option<&Value> {
        let mut node = self.root.get(first)?;
        for segment in rest {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Replace the subtree at `path`. `None` removes it and prunes empty parents.
    pub fn set(&mut self, path: &StorePath, value: Option<Value>) {
        if path.is_root() {
            self.root = match value.and_then(Value::normalized) {
                Some(Value::Map(map)) => map,
                _ => BTreeMap::new(),
            };
            return;
        }
        set_in(&mut self.root, path.segments(), value);
    }

    /// Every leaf with its absolute path, in key order.
    pub fn leaves(&self) -> Vec<(StorePath, Value)> {
        let mut out = Vec::new();
        Value::Map(self.root.clone()).collect_leaves(&mut Vec::new(), &mut out);
        out.into_iter()
            .map(|(segments, value)| (StorePath { segments }, value))
            .collect()
    }
}

/// Leaves of `value` addressed from `base`.
pub fn leaves_under(base: &StorePath, value: &Value) -> Vec<(StorePath, Value)> {
    let mut out = Vec::new();
    value.collect_leaves(&mut base.segments.clone(), &mut out);
    out.into_iter()
        .map(|(segments, value)| (StorePath { segments }, value))
        .collect()
}

fn empty_map() -> Value {
    Value::Map(BTreeMap::new())
}

fn set_in(map: &mut BTreeMap<String, Value>, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        match value.and_then(Value::normalized) {
            Some(v) => {
                map.insert(head.clone(), v);
            }
            None => {
                map.remove(head);
            }
        }
        return;
    }

    let entry = map.entry(head.clone()).or_insert_with(empty_map);
    if !matches!(entry, Value::Map(_)) {
        *entry = empty_map();
    }
    let now_empty = if let Value::Map(child) = entry {
        set_in(child, rest, value);
        child.is_empty()
    } else {
        false
    };
    if now_empty {
        map.remove(head);
    }
}
