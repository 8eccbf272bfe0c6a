//! Integration tests for requirement policies and their validation.
//!
//! Tests cover:
//! - Boolean and per-key policies
//! - Synchronous validation before any operation runs
//! - Shape and key-set mismatches
//! - Duplicate keys in keyed input

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use allend_core::aggregate::{run, InputSet, OperationKey, PolicyMode, RequirementPolicy};
use allend_core::error::{ErrorCode, ErrorSeverity};
use futures::future::{BoxFuture, FutureExt};

type Op = BoxFuture<'static, Result<&'static str, String>>;

fn ok(value: &'static str) -> Op {
    async move { Ok(value) }.boxed()
}

fn fail(error: &str) -> Op {
    let error = error.to_string();
    async move { Err(error) }.boxed()
}

// ============================================================================
// Validation Tests
// ============================================================================

#[tokio::test]
async fn test_keyed_policy_on_sequential_input_is_configuration_error() {
    let policy = RequirementPolicy::per_name([("k1", true)]);

    let err = run(vec![ok("a")], policy).unwrap_err();

    assert_eq!(err.code(), ErrorCode::PolicyShapeMismatch);
    assert!(err.is_configuration());
    assert_eq!(err.severity(), ErrorSeverity::Low);
}

#[tokio::test]
async fn test_sequential_policy_on_keyed_input_is_configuration_error() {
    let input = InputSet::keyed([("k1", ok("a"))]).unwrap();

    let err = run(input, vec![true]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyShapeMismatch);
}

#[tokio::test]
async fn test_policy_length_must_match_input() {
    let err = run(vec![ok("a"), ok("b")], vec![true]).unwrap_err();

    assert_eq!(err.code(), ErrorCode::PolicyKeyMismatch);
    assert_eq!(err.details().key.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_policy_with_unknown_key_rejected() {
    let input = InputSet::keyed([("k1", ok("a"))]).unwrap();
    let mut flags = HashMap::new();
    flags.insert("k1".to_string(), false);
    flags.insert("other".to_string(), true);

    let err = run(input, flags).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PolicyKeyMismatch);
    assert_eq!(err.details().key.as_deref(), Some("other"));
}

#[tokio::test]
async fn test_invalid_policy_never_starts_operations() {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    let op: Op = async move {
        flag.store(true, Ordering::SeqCst);
        Ok("ran")
    }
    .boxed();

    assert!(run(vec![op], RequirementPolicy::per_name([("x", true)])).is_err());

    tokio::task::yield_now().await;
    assert!(!started.load(Ordering::SeqCst));
}

#[test]
fn test_duplicate_keys_rejected() {
    let err = InputSet::keyed([("k1", ok("a")), ("k1", ok("b"))]).err().unwrap();
    assert_eq!(err.code(), ErrorCode::DuplicateKey);
    assert!(err.is_configuration());
}

// ============================================================================
// Policy Semantics Tests
// ============================================================================

#[tokio::test]
async fn test_per_index_policy_required_slot() {
    let policy = vec![false, true, false];

    let error = run(vec![fail("x"), fail("fatal"), ok("c")], policy)
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(error.required_key(), Some(&OperationKey::Index(1)));
    assert_eq!(error.detail().unwrap().len(), 1);
}

#[tokio::test]
async fn test_per_index_policy_optional_slots_tolerated() {
    let policy = RequirementPolicy::per_index([true, false]);

    let resolution = run(vec![ok("a"), fail("x")], policy).unwrap().await.unwrap();
    assert_eq!(resolution.value().get(&OperationKey::Index(0)), Some(&"a"));
    assert!(resolution.is_partial());
}

#[tokio::test]
async fn test_keyed_policy_from_hash_map() {
    let input = InputSet::keyed([("k1", ok("a")), ("k2", fail("e"))]).unwrap();
    let mut flags = HashMap::new();
    flags.insert("k1".to_string(), false);
    flags.insert("k2".to_string(), true);

    let error = run(input, flags).unwrap().await.unwrap_err();
    assert_eq!(error.required_key(), Some(&OperationKey::from("k2")));
}

#[tokio::test]
async fn test_all_false_per_key_policy_behaves_like_default() {
    let input = InputSet::keyed([("k1", ok("a")), ("k2", fail("e"))]).unwrap();
    let policy = RequirementPolicy::per_name([("k1", false), ("k2", false)]);

    let resolution = run(input, policy).unwrap().await.unwrap();
    assert_eq!(resolution.value().as_keyed().unwrap().len(), 1);
}

#[tokio::test]
async fn test_policy_mode_all_is_fail_fast() {
    let error = run(vec![ok("a"), fail("e")], PolicyMode::All)
        .unwrap()
        .await
        .unwrap_err();

    assert!(!error.is_all_rejected());
    assert_eq!(error.required_key(), Some(&OperationKey::Index(1)));
}

#[tokio::test]
async fn test_all_required_with_total_failure_reports_first_failure() {
    let error = run(vec![fail("only")], true).unwrap().await.unwrap_err();

    // a required failure wins over total failure
    assert!(!error.is_all_rejected());
    assert_eq!(error.required_key(), Some(&OperationKey::Index(0)));
}
