//! Per-key failure payloads and the nested aggregation tree.
//!
//! A failing operation's error is converted into a [`Failure`] through the
//! [`FailurePayload`] hook. Errors that are themselves the failure of another
//! aggregation are unwrapped into [`Failure::Nested`], so failures of nested
//! aggregations form one structured tree instead of opaque wrappers.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::key::{InputShape, OperationKey};
use super::outcome::AggregateError;

/// Why a single operation did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure<E> {
    /// The operation returned an error
    Error(E),
    /// The operation was itself an aggregation that failed
    Nested(FailureDetail<E>),
    /// The operation panicked
    Panicked(String),
    /// The operation was aborted before completing (runtime shutdown)
    Cancelled,
}

impl<E> Failure<E> {
    /// The leaf error, if this is a plain error.
    pub fn as_error(&self) -> Option<&E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// The inlined detail of a nested aggregation.
    pub fn as_nested(&self) -> Option<&FailureDetail<E>> {
        match self {
            Self::Nested(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(_))
    }

    pub(crate) fn from_join_error(error: tokio::task::JoinError) -> Self {
        if !error.is_panic() {
            return Self::Cancelled;
        }

        let payload = error.into_panic();
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "operation panicked".to_string());
        Self::Panicked(message)
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{}", error),
            Self::Nested(detail) => write!(f, "nested aggregation failed: {}", detail),
            Self::Panicked(message) => write!(f, "operation panicked: {}", message),
            Self::Cancelled => f.write_str("operation cancelled"),
        }
    }
}

impl<E: Serialize> Serialize for Failure<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Error(error) => error.serialize(serializer),
            Self::Nested(detail) => detail.serialize(serializer),
            Self::Panicked(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("panicked", message)?;
                map.end()
            }
            Self::Cancelled => serializer.serialize_str("cancelled"),
        }
    }
}

/// Every failed key of an aggregation, in the shape of the original input.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureDetail<E> {
    shape: InputShape,
    failures: BTreeMap<OperationKey, Failure<E>>,
}

impl<E> FailureDetail<E> {
    pub(crate) fn new(shape: InputShape) -> Self {
        Self {
            shape,
            failures: BTreeMap::new(),
        }
    }

    pub(crate) fn from_failures(
        shape: InputShape,
        failures: BTreeMap<OperationKey, Failure<E>>,
    ) -> Self {
        Self { shape, failures }
    }

    pub(crate) fn insert(&mut self, key: OperationKey, failure: Failure<E>) {
        self.failures.insert(key, failure);
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    /// Number of failed keys.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn get(&self, key: &OperationKey) -> Option<&Failure<E>> {
        self.failures.get(key)
    }

    pub fn get_index(&self, index: usize) -> Option<&Failure<E>> {
        self.failures.get(&OperationKey::Index(index))
    }

    pub fn get_name(&self, name: &str) -> Option<&Failure<E>> {
        self.failures.get(&OperationKey::Name(name.to_string()))
    }

    pub fn contains_key(&self, key: &OperationKey) -> bool {
        self.failures.contains_key(key)
    }

    /// Failed keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &OperationKey> {
        self.failures.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OperationKey, &Failure<E>)> {
        self.failures.iter()
    }

    /// Positional view for sequential inputs, `None` at slots that did not fail.
    ///
    /// Returns `None` for keyed inputs.
    pub fn to_sequence(&self) -> Option<Vec<Option<&Failure<E>>>> {
        match self.shape {
            InputShape::Sequential { len } => {
                Some((0..len).map(|i| self.get_index(i)).collect())
            }
            InputShape::Keyed => None,
        }
    }

    /// Leaf failures of the whole tree, each with the key path leading to it.
    pub fn leaves(&self) -> Vec<(Vec<OperationKey>, &Failure<E>)> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut leaves);
        leaves
    }

    fn collect_leaves<'a>(
        &'a self,
        path: &mut Vec<OperationKey>,
        leaves: &mut Vec<(Vec<OperationKey>, &'a Failure<E>)>,
    ) {
        for (key, failure) in &self.failures {
            path.push(key.clone());
            match failure {
                Failure::Nested(detail) => detail.collect_leaves(path, leaves),
                leaf => leaves.push((path.clone(), leaf)),
            }
            path.pop();
        }
    }
}

impl<E> IntoIterator for FailureDetail<E> {
    type Item = (OperationKey, Failure<E>);
    type IntoIter = std::collections::btree_map::IntoIter<OperationKey, Failure<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

impl<E> fmt::Display for FailureDetail<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed [", self.failures.len())?;
        for (i, key) in self.failures.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", key)?;
        }
        f.write_str("]")
    }
}

impl<E: Serialize> Serialize for FailureDetail<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.shape {
            InputShape::Sequential { len } => {
                let mut seq = serializer.serialize_seq(Some(len))?;
                for i in 0..len {
                    seq.serialize_element(&self.get_index(i))?;
                }
                seq.end()
            }
            InputShape::Keyed => {
                let mut map = serializer.serialize_map(Some(self.failures.len()))?;
                for (key, failure) in &self.failures {
                    map.serialize_entry(&key.to_string(), failure)?;
                }
                map.end()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Failure Payload Hook
// ═══════════════════════════════════════════════════════════════════════════════

/// Error types an aggregated operation may fail with.
///
/// The default conversion records the error as a leaf. Types that can carry
/// the failure of another aggregation override [`into_failure`] to inline
/// its detail instead.
///
/// [`into_failure`]: FailurePayload::into_failure
pub trait FailurePayload: Sized + Send + 'static {
    /// Convert this error into the failure recorded for its key.
    fn into_failure(self) -> Failure<Self> {
        Failure::Error(self)
    }
}

impl FailurePayload for String {}

impl FailurePayload for &'static str {}

impl FailurePayload for std::io::Error {}

impl FailurePayload for serde_json::Value {}

impl FailurePayload for anyhow::Error {
    fn into_failure(self) -> Failure<Self> {
        match self.downcast::<AggregateError<anyhow::Error>>() {
            Ok(nested) => match nested.into_detail() {
                Ok(detail) => Failure::Nested(detail),
                Err(nested) => Failure::Error(anyhow::Error::new(nested)),
            },
            Err(error) => Failure::Error(error),
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

impl FailurePayload for BoxError {
    fn into_failure(self) -> Failure<Self> {
        match self.downcast::<AggregateError<BoxError>>() {
            Ok(nested) => match nested.into_detail() {
                Ok(detail) => Failure::Nested(detail),
                Err(nested) => Failure::Error(Box::new(nested)),
            },
            Err(error) => Failure::Error(error),
        }
    }
}
