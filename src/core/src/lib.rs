#![allow(clippy::result_large_err)]
//! # Allend Core
//!
//! Partial-failure tolerant aggregation of keyed asynchronous operations.
//!
//! Given a list or a map of futures, an aggregation settles once with one of
//! three outcomes: every operation succeeded, some succeeded (the failures
//! are tolerated and reported alongside the values), or the aggregation
//! rejected because a required operation failed or every operation failed.
//!
//! ## Architecture
//!
//! - **Aggregator**: spawns operations and drives a single settlement per run
//! - **Settlement State**: per-key completion tracking and the verdict machine
//! - **Requirement Policy**: which keys fail the whole aggregation on their own
//! - **Result Shaping**: outputs mirror the input shape (list or map)
//! - **Residual Failures**: late failures delivered to an optional callback
//! - **Telemetry**: structured logging and metrics
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use allend_core::prelude::*;
//!
//! # async fn example() -> allend_core::Result<()> {
//! let mut ops = HashMap::new();
//! ops.insert("k1".to_string(), futures::future::ready(Ok::<i32, String>(1)));
//! ops.insert("k2".to_string(), futures::future::ready(Err("e".to_string())));
//!
//! let resolution = run(ops, false)?.await.unwrap();
//! assert_eq!(resolution.value().as_keyed().unwrap().len(), 1);
//! assert!(resolution.is_partial());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod telemetry;

pub use aggregate::{run, Aggregation, Aggregator, AggregatorConfig};
pub use error::{AllendError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregate::{
        run, AggregateError, AggregateOutcome, AggregateValue, Aggregation, Aggregator,
        AggregatorConfig, Failure, FailureDetail, FailurePayload, InputSet, InputShape,
        OperationKey, PolicyMode, RequirementPolicy, Resolution, SettlementMonitor,
        SettlementSummary, Verdict,
    };
    pub use crate::config::Config;
    pub use crate::error::{AllendError, ErrorCode, ErrorDetails, ErrorSeverity, Result};
}
