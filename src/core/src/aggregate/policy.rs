//! Requirement policy: which keys fail the whole aggregation on their own.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::key::{InputSet, OperationKey};
use crate::error::{AllendError, Result};

/// Decides, for a failing key, whether that failure alone rejects the aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequirementPolicy {
    /// Every key is required: the first failure rejects (fail fast).
    AllRequired,
    /// No single key is required: only total failure rejects.
    #[default]
    NoneRequired,
    /// Only the flagged keys are required.
    PerKey(PerKeyPolicy),
}

/// Per-key requirement flags, remembering the input shape they were built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerKeyPolicy {
    sequential: bool,
    flags: BTreeMap<OperationKey, bool>,
}

impl PerKeyPolicy {
    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    /// The keys flagged as required.
    pub fn required_keys(&self) -> impl Iterator<Item = &OperationKey> {
        self.flags
            .iter()
            .filter(|(_, required)| **required)
            .map(|(key, _)| key)
    }

    fn shape_name(&self) -> &'static str {
        if self.sequential {
            "sequential"
        } else {
            "keyed"
        }
    }
}

impl RequirementPolicy {
    /// Per-index flags for a sequential input.
    pub fn per_index(flags: impl IntoIterator<Item = bool>) -> Self {
        Self::PerKey(PerKeyPolicy {
            sequential: true,
            flags: flags
                .into_iter()
                .enumerate()
                .map(|(i, required)| (OperationKey::Index(i), required))
                .collect(),
        })
    }

    /// Per-name flags for a keyed input.
    pub fn per_name<K>(flags: impl IntoIterator<Item = (K, bool)>) -> Self
    where
        K: Into<String>,
    {
        Self::PerKey(PerKeyPolicy {
            sequential: false,
            flags: flags
                .into_iter()
                .map(|(name, required)| (OperationKey::Name(name.into()), required))
                .collect(),
        })
    }

    /// Whether a failure of `key` alone rejects the aggregation.
    pub fn is_required(&self, key: &OperationKey) -> bool {
        match self {
            Self::AllRequired => true,
            Self::NoneRequired => false,
            Self::PerKey(policy) => policy.flags.get(key).copied().unwrap_or(false),
        }
    }

    /// Check that a per-key policy has the same shape and key set as `input`.
    ///
    /// Boolean policies are valid for any input.
    pub fn validate<F>(&self, input: &InputSet<F>) -> Result<()> {
        let Self::PerKey(policy) = self else {
            return Ok(());
        };

        let input_shape = input.shape();
        if policy.sequential != input_shape.is_sequential() {
            return Err(AllendError::policy_shape_mismatch(
                policy.shape_name(),
                input_shape.name(),
            ));
        }

        let input_keys: HashSet<&OperationKey> = input.keys().collect();
        if let Some(unknown) = policy.flags.keys().find(|key| !input_keys.contains(key)) {
            return Err(AllendError::policy_key_mismatch(unknown, "key not present in input"));
        }

        if let Some(missing) = input.keys().find(|key| !policy.flags.contains_key(*key)) {
            return Err(AllendError::policy_key_mismatch(missing, "input key has no flag"));
        }

        Ok(())
    }
}

impl From<bool> for RequirementPolicy {
    fn from(all_required: bool) -> Self {
        if all_required {
            Self::AllRequired
        } else {
            Self::NoneRequired
        }
    }
}

impl From<Vec<bool>> for RequirementPolicy {
    fn from(flags: Vec<bool>) -> Self {
        Self::per_index(flags)
    }
}

impl From<HashMap<String, bool>> for RequirementPolicy {
    fn from(flags: HashMap<String, bool>) -> Self {
        Self::per_name(flags)
    }
}

impl From<BTreeMap<String, bool>> for RequirementPolicy {
    fn from(flags: BTreeMap<String, bool>) -> Self {
        Self::per_name(flags)
    }
}

/// Boolean policy as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Tolerate partial failure
    #[default]
    None,
    /// Fail fast on the first failure
    All,
}

impl From<PolicyMode> for RequirementPolicy {
    fn from(mode: PolicyMode) -> Self {
        match mode {
            PolicyMode::None => Self::NoneRequired,
            PolicyMode::All => Self::AllRequired,
        }
    }
}
