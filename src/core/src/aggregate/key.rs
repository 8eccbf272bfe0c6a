//! Operation keys and the caller-supplied input set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AllendError, Result};

/// Identifies one operation within an aggregation.
///
/// Sequential inputs are keyed by zero-based index, keyed inputs by name.
/// Keys are unique within one aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationKey {
    /// Position in a sequential input
    Index(usize),
    /// Name in a keyed input
    Name(String),
}

impl OperationKey {
    /// The index, if this is a sequential key.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(_) => None,
        }
    }

    /// The name, if this is a keyed entry.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Index(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for OperationKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for OperationKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for OperationKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// The shape of the caller's original collection.
///
/// Fixed once at entry and threaded through result shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputShape {
    /// A list of `len` operations
    Sequential { len: usize },
    /// A map of named operations
    Keyed,
}

impl InputShape {
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Sequential { .. })
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequential { .. } => "sequential",
            Self::Keyed => "keyed",
        }
    }
}

/// Caller-supplied mapping from [`OperationKey`] to an operation.
///
/// Immutable once handed to the aggregator.
#[derive(Debug)]
pub struct InputSet<F> {
    shape: InputShape,
    entries: Vec<(OperationKey, F)>,
}

impl<F> InputSet<F> {
    /// Build a sequential input; keys are the positions `0..n`.
    pub fn sequential(operations: impl IntoIterator<Item = F>) -> Self {
        let entries: Vec<_> = operations
            .into_iter()
            .enumerate()
            .map(|(i, op)| (OperationKey::Index(i), op))
            .collect();

        Self {
            shape: InputShape::Sequential { len: entries.len() },
            entries,
        }
    }

    /// Build a keyed input, rejecting duplicate names.
    pub fn keyed<K>(operations: impl IntoIterator<Item = (K, F)>) -> Result<Self>
    where
        K: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (name, op) in operations {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(AllendError::duplicate_key(name));
            }
            entries.push((OperationKey::Name(name), op));
        }

        Ok(Self {
            shape: InputShape::Keyed,
            entries,
        })
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in input order.
    pub fn keys(&self) -> impl Iterator<Item = &OperationKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn contains_key(&self, key: &OperationKey) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub(crate) fn into_entries(self) -> (InputShape, Vec<(OperationKey, F)>) {
        (self.shape, self.entries)
    }
}

impl<F> From<Vec<F>> for InputSet<F> {
    fn from(operations: Vec<F>) -> Self {
        Self::sequential(operations)
    }
}

impl<F, const N: usize> From<[F; N]> for InputSet<F> {
    fn from(operations: [F; N]) -> Self {
        Self::sequential(operations)
    }
}

impl<F> From<HashMap<String, F>> for InputSet<F> {
    fn from(operations: HashMap<String, F>) -> Self {
        // map keys are already unique
        let mut entries: Vec<_> = operations
            .into_iter()
            .map(|(name, op)| (OperationKey::Name(name), op))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            shape: InputShape::Keyed,
            entries,
        }
    }
}

impl<F> From<BTreeMap<String, F>> for InputSet<F> {
    fn from(operations: BTreeMap<String, F>) -> Self {
        Self {
            shape: InputShape::Keyed,
            entries: operations
                .into_iter()
                .map(|(name, op)| (OperationKey::Name(name), op))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_keys_are_indices() {
        let input = InputSet::sequential(vec!["a", "b", "c"]);

        assert_eq!(input.shape(), InputShape::Sequential { len: 3 });
        let keys: Vec<_> = input.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                OperationKey::Index(0),
                OperationKey::Index(1),
                OperationKey::Index(2)
            ]
        );
    }

    #[test]
    fn test_keyed_rejects_duplicates() {
        let result = InputSet::keyed(vec![("k1", 1), ("k2", 2), ("k1", 3)]);

        let err = result.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DuplicateKey);
    }

    #[test]
    fn test_keyed_preserves_insertion_order() {
        let input = InputSet::keyed(vec![("zeta", 1), ("alpha", 2)]).unwrap();

        let keys: Vec<_> = input.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(input.shape(), InputShape::Keyed);
    }

    #[test]
    fn test_empty_inputs_keep_shape() {
        let list: InputSet<()> = InputSet::sequential(Vec::new());
        let map: InputSet<()> = InputSet::from(HashMap::new());

        assert!(list.is_empty());
        assert_eq!(list.shape(), InputShape::Sequential { len: 0 });
        assert_eq!(map.shape(), InputShape::Keyed);
    }

    #[test]
    fn test_key_ordering_and_display() {
        assert!(OperationKey::Index(1) < OperationKey::Index(2));
        assert_eq!(OperationKey::from("k1").to_string(), "k1");
        assert_eq!(OperationKey::from(7usize).to_string(), "7");
        assert_eq!(OperationKey::from("k1").as_name(), Some("k1"));
        assert_eq!(OperationKey::from(3usize).as_index(), Some(3));
    }
}
