//! Partial-failure tolerant aggregation of keyed asynchronous operations.
//!
//! [`Aggregator::run`] spawns every operation onto the tokio runtime and
//! returns an [`Aggregation`], a future that settles exactly once with an
//! [`AggregateOutcome`]. A single driver task owns the [`SettlementState`]
//! and applies completions one at a time. After settlement it keeps
//! draining the remaining operations so late failures reach the residual
//! channel and the [`SettlementMonitor`].
//!
//! ```rust,no_run
//! use allend_core::aggregate::{run, AggregateValue, RequirementPolicy};
//!
//! # async fn example() -> allend_core::Result<()> {
//! let ops = vec![
//!     futures::future::ready(Ok::<i32, String>(1)),
//!     futures::future::ready(Err("e".to_string())),
//! ];
//! let resolution = run(ops, RequirementPolicy::NoneRequired)?.await.unwrap();
//! assert_eq!(resolution.value(), &AggregateValue::Sequence(vec![Some(1), None]));
//! # Ok(())
//! # }
//! ```

pub mod failure;
pub mod key;
pub mod outcome;
pub mod policy;
pub mod residual;
pub mod settlement;

pub use failure::{Failure, FailureDetail, FailurePayload};
pub use key::{InputSet, InputShape, OperationKey};
pub use outcome::{AggregateError, AggregateOutcome, AggregateValue, Resolution};
pub use policy::{PerKeyPolicy, PolicyMode, RequirementPolicy};
pub use residual::ResidualHandler;
pub use settlement::{Completion, SettlementState, SettlementSummary, Transition, Verdict};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::error::{AllendError, Result};
use crate::telemetry::metrics::AggregationMetrics;
use residual::ResidualSink;

/// Aggregator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Label attached to spans and metrics
    #[serde(default = "default_label")]
    pub label: String,

    /// Policy used by [`Aggregator::run_default`]
    #[serde(default)]
    pub default_policy: PolicyMode,

    /// Warn about residual failures no handler observed
    #[serde(default = "default_log_residual_failures")]
    pub log_residual_failures: bool,

    /// Record `allend_*` metrics
    #[serde(default = "default_record_metrics")]
    pub record_metrics: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            default_policy: PolicyMode::default(),
            log_residual_failures: default_log_residual_failures(),
            record_metrics: default_record_metrics(),
        }
    }
}

impl AggregatorConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_default_policy(mut self, policy: PolicyMode) -> Self {
        self.default_policy = policy;
        self
    }
}

fn default_label() -> String {
    "default".to_string()
}

fn default_log_residual_failures() -> bool {
    true
}

fn default_record_metrics() -> bool {
    true
}

/// Runs aggregations with a shared configuration.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Start an aggregation over `input` under `policy`.
    ///
    /// Policy validation happens here, before anything is spawned. Empty
    /// input settles immediately; otherwise a tokio runtime context is
    /// required.
    pub fn run<F, V, E>(
        &self,
        input: impl Into<InputSet<F>>,
        policy: impl Into<RequirementPolicy>,
    ) -> Result<Aggregation<V, E>>
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: FailurePayload,
    {
        let input = input.into();
        let policy = policy.into();

        policy.validate(&input).inspect_err(AllendError::log)?;

        let id = Uuid::new_v4();
        let label = self.config.label.clone();
        let (shape, entries) = input.into_entries();
        let mut state = SettlementState::new(id, shape, entries.iter().map(|(key, _)| key.clone()));

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (summary_tx, summary_rx) = watch::channel(state.summary());
        let residuals = Arc::new(ResidualSink::new());

        let aggregation = Aggregation {
            id,
            outcome: outcome_rx,
            residuals: Arc::clone(&residuals),
            monitor: SettlementMonitor { summary: summary_rx },
        };

        if let Some(outcome) = state.settle_empty() {
            debug!(aggregation_id = %id, label = %label, shape = shape.name(), "Empty aggregation resolved");
            if self.config.record_metrics {
                AggregationMetrics::started(&label);
                AggregationMetrics::settled(&label, state.verdict(), std::time::Duration::ZERO);
            }
            summary_tx.send_replace(state.summary());
            let _ = outcome_tx.send(outcome);
            return Ok(aggregation);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(AllendError::from)
            .inspect_err(AllendError::log)?;
        if self.config.record_metrics {
            AggregationMetrics::started(&label);
        }

        let span = tracing::info_span!(
            "aggregation",
            aggregation_id = %id,
            label = %label,
            total = entries.len(),
        );

        info!(
            aggregation_id = %id,
            label = %label,
            total = entries.len(),
            shape = shape.name(),
            "Starting aggregation"
        );

        let completions: FuturesUnordered<_> = entries
            .into_iter()
            .map(|(key, operation)| {
                runtime
                    .spawn(operation.instrument(span.clone()))
                    .map(move |joined| (key, joined))
            })
            .collect();

        let driver = Driver {
            label,
            state,
            policy,
            outcome_tx: Some(outcome_tx),
            summary_tx,
            residuals,
            log_residual_failures: self.config.log_residual_failures,
            record_metrics: self.config.record_metrics,
            started: Instant::now(),
        };
        runtime.spawn(driver.drain(completions).instrument(span));

        Ok(aggregation)
    }

    /// Start an aggregation under the configured default policy.
    pub fn run_default<F, V, E>(&self, input: impl Into<InputSet<F>>) -> Result<Aggregation<V, E>>
    where
        F: Future<Output = std::result::Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: FailurePayload,
    {
        self.run(input, self.config.default_policy)
    }
}

/// Start an aggregation with the default [`Aggregator`].
pub fn run<F, V, E>(
    input: impl Into<InputSet<F>>,
    policy: impl Into<RequirementPolicy>,
) -> Result<Aggregation<V, E>>
where
    F: Future<Output = std::result::Result<V, E>> + Send + 'static,
    V: Send + 'static,
    E: FailurePayload,
{
    Aggregator::default().run(input, policy)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregation Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// A running aggregation. Await it for the outcome.
///
/// Dropping the handle does not cancel the operations.
pub struct Aggregation<V, E> {
    id: Uuid,
    outcome: oneshot::Receiver<AggregateOutcome<V, E>>,
    residuals: Arc<ResidualSink<E>>,
    monitor: SettlementMonitor,
}

impl<V, E> Aggregation<V, E> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register the callback for failures that arrive after settlement.
    ///
    /// Residuals that already happened are delivered immediately. Fails
    /// with `ResidualHandlerAlreadyRegistered` on a second call.
    pub fn on_residual_failure<H>(&self, handler: H) -> Result<()>
    where
        H: Fn(Failure<E>, OperationKey) + Send + Sync + 'static,
    {
        self.residuals
            .register(Arc::new(handler))
            .inspect_err(AllendError::log)
    }

    /// Watch settlement progress, including after the outcome is delivered.
    pub fn monitor(&self) -> SettlementMonitor {
        self.monitor.clone()
    }
}

impl<V, E> std::fmt::Debug for Aggregation<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregation")
            .field("id", &self.id)
            .field("summary", &self.monitor.summary())
            .field("residual_handler", &self.residuals.is_registered())
            .finish()
    }
}

impl<V, E> Future for Aggregation<V, E> {
    type Output = AggregateOutcome<V, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.outcome)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(AggregateError::Interrupted)))
    }
}

/// Read-only view of an aggregation's [`SettlementSummary`].
#[derive(Debug, Clone)]
pub struct SettlementMonitor {
    summary: watch::Receiver<SettlementSummary>,
}

impl SettlementMonitor {
    pub fn summary(&self) -> SettlementSummary {
        self.summary.borrow().clone()
    }

    /// Wait until every operation has completed.
    pub async fn drained(&mut self) -> SettlementSummary {
        let drained = self
            .summary
            .wait_for(SettlementSummary::is_drained)
            .await
            .map(|summary| summary.clone());
        drained.unwrap_or_else(|_| self.summary.borrow().clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Driver
// ═══════════════════════════════════════════════════════════════════════════════

type Joined<V, E> = std::result::Result<std::result::Result<V, E>, JoinError>;

/// Owns the settlement state and consumes completions in arrival order.
struct Driver<V, E> {
    label: String,
    state: SettlementState<V, E>,
    policy: RequirementPolicy,
    outcome_tx: Option<oneshot::Sender<AggregateOutcome<V, E>>>,
    summary_tx: watch::Sender<SettlementSummary>,
    residuals: Arc<ResidualSink<E>>,
    log_residual_failures: bool,
    record_metrics: bool,
    started: Instant,
}

impl<V, E> Driver<V, E>
where
    V: Send + 'static,
    E: FailurePayload,
{
    async fn drain<S>(mut self, mut completions: S)
    where
        S: Stream<Item = (OperationKey, Joined<V, E>)> + Unpin,
    {
        while let Some((key, joined)) = completions.next().await {
            let completion = match joined {
                Ok(Ok(value)) => Completion::Succeeded(value),
                Ok(Err(error)) => Completion::Failed(error.into_failure()),
                Err(join_error) => Completion::Failed(Failure::from_join_error(join_error)),
            };

            let succeeded = completion.is_success();
            debug!(key = %key, succeeded, "Operation completed");
            if self.record_metrics {
                AggregationMetrics::completion(&self.label, succeeded);
            }

            let transition = self.state.complete(key, completion, &self.policy);
            // publish before settling so an awaiting caller sees the settled summary
            self.summary_tx.send_replace(self.state.summary());

            match transition {
                Transition::Settled(outcome) => self.settle(outcome),
                Transition::Residual { key, failure } => self.report_residual(key, failure),
                Transition::Pending | Transition::Late | Transition::Ignored => {}
            }
        }

        if self.outcome_tx.take().is_some() {
            // the handle resolves to Interrupted once the sender drops
            AllendError::internal("aggregation drained without settling")
                .with_context("verdict", self.state.verdict().label())
                .with_context("completed", self.state.completed())
                .log();
        }

        let unobserved = self.residuals.unobserved();
        if !unobserved.is_empty() && self.log_residual_failures {
            warn!(
                count = unobserved.len(),
                keys = ?unobserved,
                "Residual failures were not observed by any handler"
            );
        }

        let summary = self.state.summary();
        debug!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            residual = summary.residual,
            "Aggregation drained"
        );
    }

    fn settle(&mut self, outcome: AggregateOutcome<V, E>) {
        let verdict = self.state.verdict();
        let elapsed = self.started.elapsed();

        match &outcome {
            Ok(resolution) => info!(
                verdict = verdict.label(),
                tolerated = resolution.tolerated().len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Aggregation resolved"
            ),
            Err(e) => info!(
                verdict = verdict.label(),
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Aggregation rejected"
            ),
        }

        if self.record_metrics {
            AggregationMetrics::settled(&self.label, verdict, elapsed);
        }

        if let Some(tx) = self.outcome_tx.take() {
            if tx.send(outcome).is_err() {
                debug!("Aggregation handle dropped before settlement");
            }
        }
    }

    fn report_residual(&mut self, key: OperationKey, failure: Failure<E>) {
        let observed = self.residuals.deliver(key.clone(), failure);
        if self.record_metrics {
            AggregationMetrics::residual(&self.label, observed);
        }
        if !observed {
            debug!(key = %key, "Residual failure buffered");
        }
    }
}
