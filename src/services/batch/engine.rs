// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::common::retry::{Sleeper, TokioSleeper};
use crate::domain::compliance::RiskLevel;
use crate::domain::request::{RequestRow, ValidatedRequest};
use crate::network::ledger::LedgerClient;
use crate::services::batch::ExecutionParams;
use crate::services::batch::aggregator::{BatchReport, ProgressObserver, ResultAggregator};
use crate::services::batch::executor::BatchExecutor;
use crate::services::batch::gate::{InvariantGate, InvariantReport};
use crate::services::batch::screening::RiskScreener;
use crate::services::batch::simulator::TransactionSimulator;
use crate::services::batch::validator::{RequestValidator, RowIssue, ValidationOutcome};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Validation and invariant results gathered before anything is written.
#[derive(Clone, Debug, Serialize)]
pub struct Preflight {
    pub validation: ValidationOutcome,
    pub invariants: InvariantReport,
}

impl Preflight {
    /// Every finding that blocks an unforced run.
    pub fn blocking_reasons(&self) -> Vec<String> {
        let mut reasons: Vec<String> = self
            .validation
            .errors
            .iter()
            .map(|e| format!("validation: {e}"))
            .collect();
        reasons.extend(invariant_reasons(&self.invariants));
        reasons
    }
}

fn invariant_reasons(report: &InvariantReport) -> Vec<String> {
    report
        .checks
        .iter()
        .filter(|c| c.blocking && !c.valid)
        .map(|c| format!("invariant {}: {}", c.name, c.detail))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct Refusal {
    pub validation: ValidationOutcome,
    pub invariants: InvariantReport,
    pub reasons: Vec<String>,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Blocking findings and no force flag; nothing was submitted.
    Refused(Box<Refusal>),
    Completed(BatchReport),
}

/// Runs the full pipeline: validate, gate, then simulate or execute.
pub struct BulkOperator {
    ledger: Arc<dyn LedgerClient>,
    params: ExecutionParams,
    validator: RequestValidator,
    sleeper: Arc<dyn Sleeper>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

impl BulkOperator {
    pub fn new(ledger: Arc<dyn LedgerClient>, params: ExecutionParams) -> Self {
        Self {
            validator: RequestValidator::new(params.read_concurrency),
            ledger,
            params,
            sleeper: Arc::new(TokioSleeper),
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_screener(mut self, screener: Arc<dyn RiskScreener>, block_level: RiskLevel) -> Self {
        self.validator =
            RequestValidator::new(self.params.read_concurrency).with_screener(screener, block_level);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    pub async fn run(&self, rows: &[RequestRow]) -> Result<RunOutcome, AppError> {
        let preflight = self.preflight(rows).await?;
        self.execute(preflight).await
    }

    pub async fn preflight(&self, rows: &[RequestRow]) -> Result<Preflight, AppError> {
        let validation = self.validator.validate(self.ledger.as_ref(), rows).await?;
        let invariants = InvariantGate::check(self.ledger.as_ref()).await?;
        Ok(Preflight {
            validation,
            invariants,
        })
    }

    pub async fn execute(&self, preflight: Preflight) -> Result<RunOutcome, AppError> {
        let force = self.params.force;
        let reasons = preflight.blocking_reasons();
        let Preflight {
            validation,
            mut invariants,
        } = preflight;

        if !reasons.is_empty() && !force {
            tracing::warn!(target: "engine", reasons = reasons.len(), violations = ?invariants.violations(), "Refusing batch");
            return Ok(RunOutcome::Refused(Box::new(Refusal {
                validation,
                invariants,
                reasons,
            })));
        }

        let requests = validation.executable(force);
        let mut agg = ResultAggregator::new(self.params.dry_run, requests.len());
        for issue in &validation.rejected {
            agg.skip(issue.clone());
        }
        for warning in &validation.warnings {
            agg.warning(warning.to_string());
        }
        if !reasons.is_empty() {
            tracing::warn!(
                target: "engine",
                violations = ?invariants.violations(),
                validation_errors = validation.errors.len(),
                "Forcing execution past blocking checks"
            );
            for reason in &reasons {
                agg.audit_exception(reason.clone());
            }
        }

        if self.params.dry_run {
            self.simulate_into(&requests, &mut agg).await?;
            return Ok(RunOutcome::Completed(agg.finish()));
        }

        if invariants.snapshot.age() > self.params.snapshot_max_age {
            tracing::info!(
                target: "engine",
                age_ms = invariants.snapshot.age().as_millis() as u64,
                "Invariant snapshot is stale; re-checking before submission"
            );
            invariants = InvariantGate::check(self.ledger.as_ref()).await?;
            let aggregate = self
                .validator
                .check_aggregates(self.ledger.as_ref(), &requests)
                .await?;
            let mut fresh = invariant_reasons(&invariants);
            fresh.extend(aggregate.iter().map(|e| format!("validation: {e}")));
            if !fresh.is_empty() {
                if !force {
                    tracing::warn!(target: "engine", violations = ?invariants.violations(), batch_errors = aggregate.len(), "Refusing batch after re-check");
                    let mut validation = validation;
                    validation.errors.extend(aggregate);
                    return Ok(RunOutcome::Refused(Box::new(Refusal {
                        validation,
                        invariants,
                        reasons: fresh,
                    })));
                }
                for reason in fresh {
                    if !reasons.contains(&reason) {
                        agg.audit_exception(reason);
                    }
                }
            }
        }

        let mut executor = BatchExecutor::new(self.ledger.clone())
            .with_sleeper(self.sleeper.clone())
            .with_cancellation(self.cancel.clone());
        if let Some(observer) = &self.observer {
            executor = executor.with_observer(observer.clone());
        }
        executor
            .execute_into(&requests, &self.params, &mut agg)
            .await?;
        Ok(RunOutcome::Completed(agg.finish()))
    }
}

impl BulkOperator {
    /// Dry run in `batch_size` chunks, reporting progress after every simulation.
    async fn simulate_into(
        &self,
        requests: &[ValidatedRequest],
        agg: &mut ResultAggregator,
    ) -> Result<(), AppError> {
        let simulator = TransactionSimulator::new(self.ledger.clone());
        let batch_size = self.params.batch_size.max(1);
        let total_batches = requests.len().div_ceil(batch_size);

        for (batch_idx, batch) in requests.chunks(batch_size).enumerate() {
            self.notify(agg, batch_idx, total_batches);
            for (pos, req) in batch.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    for rest in &requests[batch_idx * batch_size + pos..] {
                        agg.skip(RowIssue::for_request(rest, "cancelled before simulation"));
                    }
                    agg.mark_cancelled();
                    return Ok(());
                }
                agg.record_simulation(simulator.simulate(req).await?);
                self.notify(agg, batch_idx, total_batches);
            }
        }
        Ok(())
    }

    fn notify(&self, agg: &ResultAggregator, batch_idx: usize, total_batches: usize) {
        if let Some(observer) = &self.observer {
            observer.on_progress(&agg.progress(batch_idx, total_batches));
        }
    }
}
