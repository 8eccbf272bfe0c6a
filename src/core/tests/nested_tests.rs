//! Integration tests for nested aggregations.
//!
//! An operation that fails with another aggregation's error contributes that
//! aggregation's failure detail as a nested tree rather than an opaque error.

use allend_core::aggregate::{
    run, AggregateError, Failure, FailureDetail, FailurePayload, InputSet, OperationKey,
};
use futures::future::{BoxFuture, FutureExt};

fn paths<E>(detail: &FailureDetail<E>) -> Vec<String> {
    detail
        .leaves()
        .iter()
        .map(|(path, _)| {
            path.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".")
        })
        .collect()
}

// ============================================================================
// anyhow::Error Payloads
// ============================================================================

type AnyOp = BoxFuture<'static, anyhow::Result<usize>>;

fn any_ok(value: usize) -> AnyOp {
    async move { Ok(value) }.boxed()
}

fn any_fail(message: &'static str) -> AnyOp {
    async move { Err(anyhow::anyhow!(message)) }.boxed()
}

/// An operation that is itself an aggregation, yielding the number of values.
fn any_nested(ops: Vec<(&'static str, AnyOp)>, all_required: bool) -> AnyOp {
    async move {
        let input = InputSet::keyed(ops)?;
        let resolution = run(input, all_required)?.await?;
        Ok::<_, anyhow::Error>(resolution.value().len())
    }
    .boxed()
}

#[tokio::test]
async fn test_nested_failures_are_inlined() {
    let input = InputSet::keyed(vec![
        (
            "j1",
            any_nested(vec![("k1", any_fail("e1")), ("k2", any_fail("e2"))], false),
        ),
        ("j2", any_fail("e3")),
    ])
    .unwrap();

    let error = run(input, false).unwrap().await.unwrap_err();
    assert!(error.is_all_rejected());

    let detail = error.detail().unwrap();
    let j1 = detail.get_name("j1").unwrap().as_nested().unwrap();
    assert_eq!(j1.len(), 2);
    assert_eq!(j1.get_name("k1").unwrap().as_error().unwrap().to_string(), "e1");
    assert_eq!(j1.get_name("k2").unwrap().as_error().unwrap().to_string(), "e2");
    assert_eq!(
        detail.get_name("j2").unwrap().as_error().unwrap().to_string(),
        "e3"
    );

    assert_eq!(paths(detail), vec!["j1.k1", "j1.k2", "j2"]);
}

#[tokio::test]
async fn test_nested_required_failure_inlines_single_key() {
    let input = InputSet::keyed(vec![
        (
            "batch",
            any_nested(vec![("a", any_ok(1)), ("b", any_fail("bad"))], true),
        ),
        ("other", any_ok(2)),
    ])
    .unwrap();

    let resolution = run(input, false).unwrap().await.unwrap();

    assert_eq!(resolution.value().as_keyed().unwrap().get("other"), Some(&2));
    let batch = resolution
        .tolerated()
        .get_name("batch")
        .unwrap()
        .as_nested()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch.get_name("b").is_some());
}

#[tokio::test]
async fn test_partially_successful_nested_aggregation_is_a_value() {
    let input = InputSet::keyed(vec![(
        "batch",
        any_nested(vec![("a", any_ok(1)), ("b", any_fail("bad"))], false),
    )])
    .unwrap();

    let resolution = run(input, false).unwrap().await.unwrap();
    assert!(!resolution.is_partial());
    assert_eq!(resolution.value().as_keyed().unwrap().get("batch"), Some(&1));
}

#[tokio::test]
async fn test_three_levels_of_nesting() {
    let inner = any_nested(vec![("leaf", any_fail("deep"))], false);
    let middle = any_nested(vec![("inner", inner)], false);
    let input = InputSet::keyed(vec![("outer", middle)]).unwrap();

    let error = run(input, false).unwrap().await.unwrap_err();

    assert_eq!(paths(error.detail().unwrap()), vec!["outer.inner.leaf"]);
}

#[tokio::test]
async fn test_sequential_nested_detail_keeps_indices() {
    let inner: AnyOp = async {
        let resolution = run(vec![any_ok(1), any_fail("x")], true)?.await?;
        Ok::<_, anyhow::Error>(resolution.value().len())
    }
    .boxed();

    let error = run(vec![inner], false).unwrap().await.unwrap_err();

    let nested = error.detail().unwrap().get_index(0).unwrap().as_nested().unwrap();
    assert!(nested.shape().is_sequential());
    assert!(nested.get(&OperationKey::Index(1)).is_some());
}

// ============================================================================
// Boxed Error Payloads
// ============================================================================

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type BoxOp = BoxFuture<'static, Result<usize, BoxError>>;

fn box_fail(message: &'static str) -> BoxOp {
    async move { Err(BoxError::from(message)) }.boxed()
}

#[tokio::test]
async fn test_boxed_errors_unwrap_nested_aggregations() {
    let nested: BoxOp = async {
        let resolution = run(vec![box_fail("e1"), box_fail("e2")], false)?.await?;
        Ok::<_, BoxError>(resolution.value().len())
    }
    .boxed();

    let error = run(vec![nested, box_fail("e3")], false)
        .unwrap()
        .await
        .unwrap_err();

    let detail = error.detail().unwrap();
    assert!(detail.get_index(0).unwrap().is_nested());
    assert!(!detail.get_index(1).unwrap().is_nested());
    assert_eq!(paths(detail), vec!["0.0", "0.1", "1"]);
}

// ============================================================================
// Custom Payloads
// ============================================================================

#[derive(Debug)]
enum JobError {
    Failed(&'static str),
    Batch(AggregateError<JobError>),
}

impl FailurePayload for JobError {
    fn into_failure(self) -> Failure<Self> {
        match self {
            JobError::Batch(batch) => match batch.into_detail() {
                Ok(detail) => Failure::Nested(detail),
                Err(batch) => Failure::Error(JobError::Batch(batch)),
            },
            other => Failure::Error(other),
        }
    }
}

type JobOp = BoxFuture<'static, Result<u32, JobError>>;

#[tokio::test]
async fn test_custom_payload_opts_into_unwrapping() {
    let batch: JobOp = async {
        let ops: Vec<JobOp> = vec![
            async { Err(JobError::Failed("disk")) }.boxed(),
            async { Err(JobError::Failed("net")) }.boxed(),
        ];
        let aggregation = run(ops, false).map_err(|_| JobError::Failed("config"))?;
        let resolution = aggregation.await.map_err(JobError::Batch)?;
        Ok::<_, JobError>(resolution.value().len() as u32)
    }
    .boxed();
    let single: JobOp = async { Err(JobError::Failed("cpu")) }.boxed();

    let error = run(vec![batch, single], false).unwrap().await.unwrap_err();

    let detail = error.detail().unwrap();
    let batch = detail.get_index(0).unwrap().as_nested().unwrap();
    assert!(matches!(
        batch.get_index(1).unwrap().as_error(),
        Some(JobError::Failed("net"))
    ));
    assert!(matches!(
        detail.get_index(1).unwrap().as_error(),
        Some(JobError::Failed("cpu"))
    ));
}
