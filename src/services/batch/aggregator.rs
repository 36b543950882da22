// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::common::parsing::format_token_amount;
use crate::domain::request::serialize_u256_decimal;
use crate::services::batch::executor::{ExecutionOutcome, FinalStatus};
use crate::services::batch::simulator::SimulationOutcome;
use crate::services::batch::validator::RowIssue;
use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Enough context to replay a single failed request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub row: usize,
    pub address: Address,
    #[serde(serialize_with = "serialize_u256_decimal")]
    pub amount: U256,
    pub reason: String,
    pub attempts: u32,
}

/// Final artifact of one engine run.
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    /// Sum over succeeded requests only.
    #[serde(serialize_with = "serialize_u256_decimal")]
    pub total_amount: U256,
    pub total_gas_used: u64,
    pub transactions: Vec<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub simulations: Vec<SimulationOutcome>,
    pub errors: Vec<FailureRecord>,
    pub skipped: Vec<RowIssue>,
    pub audit_exceptions: Vec<String>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl BatchReport {
    pub fn submitted(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    /// Process outcome of a completed run. Cancellation takes precedence over failures.
    pub fn exit_status(&self) -> Result<(), AppError> {
        if self.cancelled {
            return Err(AppError::Cancelled(format!(
                "{} of {} request(s) completed before cancellation, {} skipped",
                self.success_count,
                self.submitted(),
                self.skipped_count
            )));
        }
        if self.has_failures() {
            return Err(AppError::Transaction {
                reference: String::new(),
                reason: format!(
                    "{} of {} request(s) failed, {} skipped",
                    self.failure_count,
                    self.submitted(),
                    self.skipped_count
                ),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Zero-based index of the batch in flight.
    pub batch_index: usize,
    pub total_batches: usize,
    pub completed: usize,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(serialize_with = "serialize_u256_decimal")]
    pub total_amount: U256,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Logs progress at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, p: &Progress) {
        tracing::info!(
            target: "executor",
            batch = p.batch_index + 1,
            batches = p.total_batches,
            completed = p.completed,
            total = p.total,
            ok = p.success_count,
            failed = p.failure_count,
            amount = %format_token_amount(p.total_amount),
            "Progress"
        );
    }
}

/// Streaming fold of outcomes into a `BatchReport`.
#[derive(Debug)]
pub struct ResultAggregator {
    expected: usize,
    dry_run: bool,
    cancelled: bool,
    start_time: DateTime<Utc>,
    started: Instant,
    success_count: usize,
    failure_count: usize,
    total_amount: U256,
    total_gas_used: u64,
    transactions: Vec<ExecutionOutcome>,
    simulations: Vec<SimulationOutcome>,
    errors: Vec<FailureRecord>,
    skipped: Vec<RowIssue>,
    audit_exceptions: Vec<String>,
    warnings: Vec<String>,
}

impl ResultAggregator {
    /// `expected` is the number of requests that will be offered for execution.
    pub fn new(dry_run: bool, expected: usize) -> Self {
        Self {
            expected,
            dry_run,
            cancelled: false,
            start_time: Utc::now(),
            started: Instant::now(),
            success_count: 0,
            failure_count: 0,
            total_amount: U256::ZERO,
            total_gas_used: 0,
            transactions: Vec::new(),
            simulations: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
            audit_exceptions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: ExecutionOutcome) {
        self.total_gas_used = self
            .total_gas_used
            .saturating_add(outcome.gas_used.unwrap_or(0));
        match outcome.final_status {
            FinalStatus::Succeeded | FinalStatus::Simulated => {
                self.success_count += 1;
                self.total_amount = self.total_amount.saturating_add(outcome.request.amount());
            }
            FinalStatus::Failed => {
                self.failure_count += 1;
                self.errors.push(FailureRecord {
                    row: outcome.row,
                    address: outcome.request.address(),
                    amount: outcome.request.amount(),
                    reason: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                    attempts: outcome.attempts_used,
                });
            }
        }
        self.transactions.push(outcome);
    }

    pub fn record_simulation(&mut self, sim: SimulationOutcome) {
        if sim.would_succeed {
            self.success_count += 1;
            self.total_amount = self.total_amount.saturating_add(sim.request.amount());
            self.total_gas_used = self
                .total_gas_used
                .saturating_add(sim.estimated_gas.unwrap_or(0));
        } else {
            self.failure_count += 1;
            self.errors.push(FailureRecord {
                row: sim.row,
                address: sim.request.address(),
                amount: sim.request.amount(),
                reason: sim
                    .revert_reason
                    .clone()
                    .unwrap_or_else(|| "simulation failed".to_string()),
                attempts: 1,
            });
        }
        self.transactions.push(ExecutionOutcome {
            row: sim.row,
            request: sim.request.clone(),
            final_status: if sim.would_succeed {
                FinalStatus::Simulated
            } else {
                FinalStatus::Failed
            },
            attempts_used: 0,
            tx_reference: None,
            gas_used: sim.estimated_gas,
            error: sim.revert_reason.clone(),
        });
        self.simulations.push(sim);
    }

    pub fn skip(&mut self, issue: RowIssue) {
        self.skipped.push(issue);
    }

    pub fn audit_exception(&mut self, note: impl Into<String>) {
        self.audit_exceptions.push(note.into());
    }

    pub fn warning(&mut self, note: impl Into<String>) {
        self.warnings.push(note.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn completed(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn progress(&self, batch_index: usize, total_batches: usize) -> Progress {
        Progress {
            batch_index,
            total_batches,
            completed: self.completed(),
            total: self.expected,
            success_count: self.success_count,
            failure_count: self.failure_count,
            total_amount: self.total_amount,
        }
    }

    pub fn finish(self) -> BatchReport {
        let end_time = Utc::now();
        let report = BatchReport {
            success_count: self.success_count,
            failure_count: self.failure_count,
            skipped_count: self.skipped.len(),
            total_amount: self.total_amount,
            total_gas_used: self.total_gas_used,
            transactions: self.transactions,
            simulations: self.simulations,
            errors: self.errors,
            skipped: self.skipped,
            audit_exceptions: self.audit_exceptions,
            warnings: self.warnings,
            dry_run: self.dry_run,
            cancelled: self.cancelled,
            start_time: self.start_time,
            end_time,
            duration_seconds: self.started.elapsed().as_secs_f64(),
        };
        tracing::info!(
            target: "executor",
            ok = report.success_count,
            failed = report.failure_count,
            skipped = report.skipped_count,
            amount = %format_token_amount(report.total_amount),
            gas = report.total_gas_used,
            dry_run = report.dry_run,
            secs = report.duration_seconds,
            "Batch finished"
        );
        report
    }
}
