//! Ordered secondary indexes for the in-process store
//!
//! Each indexed field maps value keys to the sequence numbers of the rows
//! holding that value. Sequence numbers follow insertion order and are
//! always kept sorted ascending.

use std::collections::BTreeMap;

use serde_json::Value;

/// Index key representing a scalar field value.
///
/// Integral floats normalize to `Int` so `25` and `25.0` share a key.
/// Ordering is deterministic: Bool < Int < Float < String.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Bool(bool),
    Int(i64),
    /// Float bits remapped for total ordering
    Float(u64),
    String(String),
}

impl IndexKey {
    /// Key for a float, ordered by value
    pub fn from_float(v: f64) -> Self {
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        IndexKey::Float(ordered)
    }

    /// Key for a JSON scalar; arrays, objects and null are not indexed
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(IndexKey::Int(i));
                }
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(IndexKey::Int(f as i64))
                } else {
                    Some(IndexKey::from_float(f))
                }
            }
            Value::String(s) => Some(IndexKey::String(s.clone())),
            _ => None,
        }
    }
}

/// Row sequence number
pub type RowSeq = u64;

/// A single field index
#[derive(Debug, Default)]
pub struct FieldIndex {
    tree: BTreeMap<IndexKey, Vec<RowSeq>>,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a row's value for this field, if it is indexable
    pub fn insert(&mut self, value: Option<&Value>, seq: RowSeq) {
        let Some(key) = value.and_then(IndexKey::from_json) else {
            return;
        };
        let seqs = self.tree.entry(key).or_default();
        if let Err(pos) = seqs.binary_search(&seq) {
            seqs.insert(pos, seq);
        }
    }

    /// Drop a row's entry. Empty keys are removed.
    pub fn remove(&mut self, value: Option<&Value>, seq: RowSeq) {
        let Some(key) = value.and_then(IndexKey::from_json) else {
            return;
        };
        if let Some(seqs) = self.tree.get_mut(&key) {
            if let Ok(pos) = seqs.binary_search(&seq) {
                seqs.remove(pos);
            }
            if seqs.is_empty() {
                self.tree.remove(&key);
            }
        }
    }

    /// Rows whose value equals `value`, ascending.
    ///
    /// `None` when the value cannot be looked up through the index.
    pub fn lookup_eq(&self, value: &Value) -> Option<Vec<RowSeq>> {
        let key = IndexKey::from_json(value)?;
        Some(self.tree.get(&key).cloned().unwrap_or_default())
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }
}

/// Sorted union of ascending sequence lists
pub fn union(lists: Vec<Vec<RowSeq>>) -> Vec<RowSeq> {
    let mut all: Vec<RowSeq> = lists.into_iter().flatten().collect();
    all.sort_unstable();
    all.dedup();
    all
}

/// Sorted intersection of ascending sequence lists
pub fn intersect(lists: Vec<Vec<RowSeq>>) -> Vec<RowSeq> {
    let mut lists = lists.into_iter();
    let Some(mut acc) = lists.next() else {
        return Vec::new();
    };
    for list in lists {
        acc.retain(|seq| list.binary_search(seq).is_ok());
    }
    acc
}
