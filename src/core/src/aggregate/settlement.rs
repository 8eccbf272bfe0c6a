//! Settlement state machine for one aggregation.
//!
//! [`SettlementState`] records each key's completion and decides the
//! [`Verdict`]. It is plain synchronous logic owned by a single driver, so
//! completions are applied one at a time and never need a lock.
//!
//! ```text
//! Pending --(required key fails)----------------> RejectedRequired
//! Pending --(all keys done, all failed)---------> RejectedAll
//! Pending --(all keys done, not all failed)-----> Resolved
//! Pending --(other completion, not all done)----> Pending
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use super::failure::{Failure, FailureDetail};
use super::key::{InputShape, OperationKey};
use super::outcome::{AggregateError, AggregateOutcome, AggregateValue, Resolution};
use super::policy::RequirementPolicy;

/// Current settlement state of an aggregation. Terminal once not `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "key", rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    RejectedRequired(OperationKey),
    RejectedAll,
    Resolved,
}

impl Verdict {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Metric and log label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RejectedRequired(_) => "rejected_required",
            Self::RejectedAll => "rejected_all",
            Self::Resolved => "resolved",
        }
    }
}

/// How a single operation finished.
#[derive(Debug)]
pub enum Completion<V, E> {
    Succeeded(V),
    Failed(Failure<E>),
}

impl<V, E> Completion<V, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Effect of applying one completion.
#[derive(Debug)]
pub enum Transition<V, E> {
    /// Still waiting on other keys
    Pending,
    /// The verdict left `Pending`; settle the outer future with this
    Settled(AggregateOutcome<V, E>),
    /// A failure arriving after settlement
    Residual { key: OperationKey, failure: Failure<E> },
    /// A success arriving after settlement, counted only
    Late,
    /// Unknown key or a key that already completed
    Ignored,
}

/// Point-in-time counters of an aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub aggregation_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub residual: usize,
    pub verdict: Verdict,
}

impl SettlementSummary {
    /// True once every operation has completed.
    pub fn is_drained(&self) -> bool {
        self.completed == self.total
    }
}

/// Per-aggregation record of completions, values and failures.
#[derive(Debug)]
pub struct SettlementState<V, E> {
    id: Uuid,
    shape: InputShape,
    keys: HashSet<OperationKey>,
    completed: HashSet<OperationKey>,
    values: BTreeMap<OperationKey, V>,
    failures: BTreeMap<OperationKey, Failure<E>>,
    succeeded: usize,
    failed: usize,
    residual: usize,
    verdict: Verdict,
}

impl<V, E> SettlementState<V, E> {
    pub fn new(id: Uuid, shape: InputShape, keys: impl IntoIterator<Item = OperationKey>) -> Self {
        Self {
            id,
            shape,
            keys: keys.into_iter().collect(),
            completed: HashSet::new(),
            values: BTreeMap::new(),
            failures: BTreeMap::new(),
            succeeded: 0,
            failed: 0,
            residual: 0,
            verdict: Verdict::Pending,
        }
    }

    pub fn total(&self) -> usize {
        self.keys.len()
    }

    pub fn completed(&self) -> usize {
        self.completed.len()
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn is_settled(&self) -> bool {
        !self.verdict.is_pending()
    }

    pub fn summary(&self) -> SettlementSummary {
        SettlementSummary {
            aggregation_id: self.id,
            total: self.total(),
            completed: self.completed(),
            succeeded: self.succeeded,
            failed: self.failed,
            residual: self.residual,
            verdict: self.verdict.clone(),
        }
    }

    /// Resolve an aggregation over no operations.
    ///
    /// Returns `None` when there are keys or the verdict is already set.
    pub fn settle_empty(&mut self) -> Option<AggregateOutcome<V, E>> {
        if !self.keys.is_empty() || self.is_settled() {
            return None;
        }

        self.verdict = Verdict::Resolved;
        Some(Ok(Resolution::new(
            AggregateValue::empty(self.shape),
            FailureDetail::new(self.shape),
        )))
    }

    /// Record one key's completion and re-evaluate the verdict.
    ///
    /// The first completion of a key wins. Once settled, failures become
    /// residuals and successes are only counted.
    pub fn complete(
        &mut self,
        key: OperationKey,
        completion: Completion<V, E>,
        policy: &RequirementPolicy,
    ) -> Transition<V, E> {
        if !self.keys.contains(&key) || !self.completed.insert(key.clone()) {
            return Transition::Ignored;
        }

        let settled = self.is_settled();
        match completion {
            Completion::Succeeded(value) => {
                self.succeeded += 1;
                if settled {
                    return Transition::Late;
                }
                self.values.insert(key, value);
                self.evaluate_completion()
            }
            Completion::Failed(failure) => {
                self.failed += 1;
                if settled {
                    self.residual += 1;
                    return Transition::Residual { key, failure };
                }

                if policy.is_required(&key) {
                    self.verdict = Verdict::RejectedRequired(key.clone());
                    let mut detail = FailureDetail::new(self.shape);
                    detail.insert(key.clone(), failure);
                    return Transition::Settled(Err(AggregateError::RequiredFailure { key, detail }));
                }

                self.failures.insert(key, failure);
                self.evaluate_completion()
            }
        }
    }

    fn evaluate_completion(&mut self) -> Transition<V, E> {
        if self.completed() < self.total() {
            return Transition::Pending;
        }

        if self.failures.len() == self.total() {
            self.verdict = Verdict::RejectedAll;
            return Transition::Settled(Err(AggregateError::AllFailed {
                detail: self.shape_failures(),
            }));
        }

        self.verdict = Verdict::Resolved;
        Transition::Settled(Ok(Resolution::new(
            self.shape_values(),
            self.shape_failures(),
        )))
    }

    fn shape_values(&mut self) -> AggregateValue<V> {
        AggregateValue::from_values(self.shape, std::mem::take(&mut self.values))
    }

    fn shape_failures(&mut self) -> FailureDetail<E> {
        FailureDetail::from_failures(self.shape, std::mem::take(&mut self.failures))
    }
}
