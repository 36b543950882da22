// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! Invariant-gated batch execution: validate, gate, simulate, submit, aggregate.

pub mod aggregator;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod screening;
pub mod simulator;
pub mod validator;

pub use aggregator::{BatchReport, Progress, ProgressObserver, ResultAggregator, TracingProgress};
pub use engine::{BulkOperator, Refusal, RunOutcome};
pub use executor::{BatchExecutor, ExecutionOutcome, FinalStatus};
pub use gate::{InvariantGate, InvariantReport, InvariantSnapshot};
pub use screening::{RiskScreener, SanctionsScreener};
pub use simulator::{SimulationOutcome, TransactionSimulator, estimate_gas_cost};
pub use validator::{RequestValidator, RowIssue, ValidationOutcome};

use crate::common::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES,
    DEFAULT_PACING_MS, DEFAULT_READ_CONCURRENCY, DEFAULT_SNAPSHOT_MAX_AGE_SECS,
};
use crate::common::retry::RetryPolicy;
use std::time::Duration;

/// Knobs for one engine run.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionParams {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Wait between consecutive batches.
    pub pacing: Duration,
    pub dry_run: bool,
    /// Proceed past validation errors and invariant violations, recording each as an audit exception.
    pub force: bool,
    pub simulate_before_submit: bool,
    pub read_concurrency: usize,
    pub snapshot_max_age: Duration,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::new(
                DEFAULT_MAX_RETRIES,
                Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                DEFAULT_BACKOFF_MULTIPLIER,
            ),
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            dry_run: false,
            force: false,
            simulate_before_submit: false,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            snapshot_max_age: Duration::from_secs(DEFAULT_SNAPSHOT_MAX_AGE_SECS),
        }
    }
}
