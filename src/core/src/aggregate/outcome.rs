//! Settled outcomes of an aggregation.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::failure::FailureDetail;
use super::key::{InputShape, OperationKey};

/// What an [`Aggregation`](super::Aggregation) resolves to.
pub type AggregateOutcome<V, E> = Result<Resolution<V, E>, AggregateError<E>>;

// ═══════════════════════════════════════════════════════════════════════════════
// Success
// ═══════════════════════════════════════════════════════════════════════════════

/// Successful values shaped like the original input.
///
/// Sequential inputs keep their length with `None` holes at failed indices.
/// Keyed inputs omit failed keys entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AggregateValue<V> {
    Sequence(Vec<Option<V>>),
    Keyed(BTreeMap<String, V>),
}

impl<V> AggregateValue<V> {
    /// An empty value of the given shape.
    pub fn empty(shape: InputShape) -> Self {
        match shape {
            InputShape::Sequential { len } => Self::Sequence((0..len).map(|_| None).collect()),
            InputShape::Keyed => Self::Keyed(BTreeMap::new()),
        }
    }

    /// Shape `values` by key into the form of `shape`.
    pub(crate) fn from_values(shape: InputShape, mut values: BTreeMap<OperationKey, V>) -> Self {
        match shape {
            InputShape::Sequential { len } => Self::Sequence(
                (0..len)
                    .map(|i| values.remove(&OperationKey::Index(i)))
                    .collect(),
            ),
            InputShape::Keyed => Self::Keyed(
                values
                    .into_iter()
                    .filter_map(|(key, value)| match key {
                        OperationKey::Name(name) => Some((name, value)),
                        OperationKey::Index(_) => None,
                    })
                    .collect(),
            ),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence(_))
    }

    /// Slots for sequences, present entries for keyed values.
    pub fn len(&self) -> usize {
        match self {
            Self::Sequence(values) => values.len(),
            Self::Keyed(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value produced for `key`, if that key succeeded.
    pub fn get(&self, key: &OperationKey) -> Option<&V> {
        match (self, key) {
            (Self::Sequence(values), OperationKey::Index(i)) => {
                values.get(*i).and_then(Option::as_ref)
            }
            (Self::Keyed(values), OperationKey::Name(name)) => values.get(name),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Option<V>]> {
        match self {
            Self::Sequence(values) => Some(values),
            Self::Keyed(_) => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&BTreeMap<String, V>> {
        match self {
            Self::Sequence(_) => None,
            Self::Keyed(values) => Some(values),
        }
    }

    pub fn into_sequence(self) -> Option<Vec<Option<V>>> {
        match self {
            Self::Sequence(values) => Some(values),
            Self::Keyed(_) => None,
        }
    }

    pub fn into_keyed(self) -> Option<BTreeMap<String, V>> {
        match self {
            Self::Sequence(_) => None,
            Self::Keyed(values) => Some(values),
        }
    }
}

/// A resolved aggregation: the shaped values and any failures that were tolerated.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<V, E> {
    value: AggregateValue<V>,
    tolerated: FailureDetail<E>,
}

impl<V, E> Resolution<V, E> {
    pub(crate) fn new(value: AggregateValue<V>, tolerated: FailureDetail<E>) -> Self {
        Self { value, tolerated }
    }

    pub fn value(&self) -> &AggregateValue<V> {
        &self.value
    }

    /// Failures of non-required keys that did not reject the aggregation.
    pub fn tolerated(&self) -> &FailureDetail<E> {
        &self.tolerated
    }

    /// True when at least one key failed.
    pub fn is_partial(&self) -> bool {
        !self.tolerated.is_empty()
    }

    pub fn into_value(self) -> AggregateValue<V> {
        self.value
    }

    pub fn into_parts(self) -> (AggregateValue<V>, FailureDetail<E>) {
        (self.value, self.tolerated)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rejection
// ═══════════════════════════════════════════════════════════════════════════════

/// Why an aggregation rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateError<E> {
    /// A required key failed; `detail` holds that key alone
    RequiredFailure {
        key: OperationKey,
        detail: FailureDetail<E>,
    },
    /// Every key failed; `detail` holds all of them
    AllFailed { detail: FailureDetail<E> },
    /// The aggregation was torn down before it settled
    Interrupted,
}

impl<E> AggregateError<E> {
    /// True when the rejection is due to every operation failing.
    pub fn is_all_rejected(&self) -> bool {
        matches!(self, Self::AllFailed { .. })
    }

    /// The required key whose failure rejected the aggregation.
    pub fn required_key(&self) -> Option<&OperationKey> {
        match self {
            Self::RequiredFailure { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&FailureDetail<E>> {
        match self {
            Self::RequiredFailure { detail, .. } | Self::AllFailed { detail } => Some(detail),
            Self::Interrupted => None,
        }
    }

    /// Take the failure detail, handing back errors that carry none.
    pub fn into_detail(self) -> Result<FailureDetail<E>, Self> {
        match self {
            Self::RequiredFailure { detail, .. } | Self::AllFailed { detail } => Ok(detail),
            Self::Interrupted => Err(Self::Interrupted),
        }
    }
}

impl<E> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredFailure { key, .. } => {
                write!(f, "required operation '{}' failed", key)
            }
            Self::AllFailed { detail } => write!(f, "all {} operations failed", detail.len()),
            Self::Interrupted => f.write_str("aggregation interrupted before settling"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for AggregateError<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::failure::Failure;

    #[test]
    fn test_sequence_shaping_keeps_holes() {
        let mut values = BTreeMap::new();
        values.insert(OperationKey::Index(0), 1);
        values.insert(OperationKey::Index(2), 3);

        let value = AggregateValue::from_values(InputShape::Sequential { len: 3 }, values);
        assert_eq!(value, AggregateValue::Sequence(vec![Some(1), None, Some(3)]));
        assert_eq!(value.len(), 3);
        assert_eq!(value.get(&OperationKey::Index(2)), Some(&3));
        assert_eq!(value.get(&OperationKey::Index(1)), None);
    }

    #[test]
    fn test_keyed_shaping_omits_failed() {
        let mut values = BTreeMap::new();
        values.insert(OperationKey::from("k1"), 1);

        let value = AggregateValue::from_values(InputShape::Keyed, values);
        let keyed = value.as_keyed().unwrap();
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed.get("k1"), Some(&1));
        assert!(value.get(&OperationKey::Index(0)).is_none());
    }

    #[test]
    fn test_empty_value_keeps_shape() {
        let list: AggregateValue<u8> = AggregateValue::empty(InputShape::Sequential { len: 0 });
        let map: AggregateValue<u8> = AggregateValue::empty(InputShape::Keyed);

        assert!(list.is_sequence() && list.is_empty());
        assert!(!map.is_sequence() && map.is_empty());
    }

    #[test]
    fn test_value_serializes_like_input() {
        let list = AggregateValue::Sequence(vec![Some(1), None]);
        assert_eq!(serde_json::to_value(&list).unwrap(), serde_json::json!([1, null]));

        let mut keyed = BTreeMap::new();
        keyed.insert("k1".to_string(), 1);
        let map = AggregateValue::Keyed(keyed);
        assert_eq!(serde_json::to_value(&map).unwrap(), serde_json::json!({"k1": 1}));
    }

    #[test]
    fn test_resolution_partial() {
        let mut tolerated = FailureDetail::new(InputShape::Sequential { len: 2 });
        let full: Resolution<i32, &str> = Resolution::new(
            AggregateValue::Sequence(vec![Some(1), Some(2)]),
            tolerated.clone(),
        );
        assert!(!full.is_partial());

        tolerated.insert(OperationKey::Index(1), Failure::Error("error"));
        let partial = Resolution::new(AggregateValue::Sequence(vec![Some(1), None]), tolerated);
        assert!(partial.is_partial());
        assert_eq!(partial.tolerated().len(), 1);
    }

    #[test]
    fn test_error_accessors_and_display() {
        let mut detail = FailureDetail::new(InputShape::Keyed);
        detail.insert("k2".into(), Failure::Error("error"));

        let required = AggregateError::RequiredFailure {
            key: "k2".into(),
            detail: detail.clone(),
        };
        assert!(!required.is_all_rejected());
        assert_eq!(required.required_key(), Some(&OperationKey::from("k2")));
        assert_eq!(required.to_string(), "required operation 'k2' failed");

        let all = AggregateError::AllFailed { detail };
        assert!(all.is_all_rejected());
        assert_eq!(all.to_string(), "all 1 operations failed");

        let interrupted: AggregateError<&str> = AggregateError::Interrupted;
        assert!(interrupted.detail().is_none());
        assert!(interrupted.into_detail().is_err());
    }
}
