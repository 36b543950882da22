// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::{AppError, LedgerError, Retryable};
use crate::common::retry::{Sleeper, TokioSleeper, sleep_or_cancel};
use crate::domain::request::{Request, ValidatedRequest};
use crate::network::ledger::{LedgerClient, Receipt};
use crate::services::batch::ExecutionParams;
use crate::services::batch::aggregator::{BatchReport, ProgressObserver, ResultAggregator};
use crate::services::batch::validator::RowIssue;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Succeeded,
    Failed,
    /// Dry run: the simulation passed, nothing was submitted.
    Simulated,
}

/// Terminal state of one request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub row: usize,
    #[serde(flatten)]
    pub request: Request,
    pub final_status: FinalStatus,
    pub attempts_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    fn pending(req: &ValidatedRequest) -> Self {
        Self {
            row: req.row,
            request: req.request.clone(),
            final_status: FinalStatus::Failed,
            attempts_used: 0,
            tx_reference: None,
            gas_used: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.final_status == FinalStatus::Succeeded
    }
}

/// Submits requests one at a time, in input order, in fixed-size batches.
///
/// Every failed attempt that may be retried (transient error or a mined but
/// unsuccessful receipt) is followed by a backoff of `base * multiplier^n`,
/// `n` being the zero-based attempt index; the request fails once
/// `retry.max_attempts` attempts are used. Reverts and rejections fail the
/// request at once. A fatal ledger error aborts the whole run.
pub struct BatchExecutor {
    ledger: Arc<dyn LedgerClient>,
    sleeper: Arc<dyn Sleeper>,
    observer: Option<Arc<dyn ProgressObserver>>,
    cancel: CancellationToken,
}

impl BatchExecutor {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            sleeper: Arc::new(TokioSleeper),
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Checked between requests and raced against every backoff and pacing wait.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn execute(
        &self,
        requests: &[ValidatedRequest],
        params: &ExecutionParams,
    ) -> Result<BatchReport, AppError> {
        let mut agg = ResultAggregator::new(false, requests.len());
        self.execute_into(requests, params, &mut agg).await?;
        Ok(agg.finish())
    }

    /// Like `execute`, folding into a caller-owned aggregator.
    pub async fn execute_into(
        &self,
        requests: &[ValidatedRequest],
        params: &ExecutionParams,
        agg: &mut ResultAggregator,
    ) -> Result<(), AppError> {
        let batch_size = params.batch_size.max(1);
        let total_batches = requests.len().div_ceil(batch_size);

        for (batch_idx, batch) in requests.chunks(batch_size).enumerate() {
            let offset = batch_idx * batch_size;
            tracing::debug!(target: "executor", batch = batch_idx + 1, of = total_batches, size = batch.len(), "Starting batch");
            self.notify(agg, batch_idx, total_batches);

            for (pos, req) in batch.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    self.stop(&requests[offset + pos..], agg);
                    return Ok(());
                }
                let outcome = self.execute_one(req, params).await?;
                agg.record(outcome);
                self.notify(agg, batch_idx, total_batches);
            }

            let next = offset + batch.len();
            if next < requests.len()
                && !sleep_or_cancel(self.sleeper.as_ref(), params.pacing, &self.cancel).await
            {
                self.stop(&requests[next..], agg);
                return Ok(());
            }
        }

        if self.cancel.is_cancelled() {
            agg.mark_cancelled();
        }
        Ok(())
    }

    async fn execute_one(
        &self,
        req: &ValidatedRequest,
        params: &ExecutionParams,
    ) -> Result<ExecutionOutcome, AppError> {
        let mut outcome = ExecutionOutcome::pending(req);

        if params.simulate_before_submit {
            match self.ledger.simulate(&req.request).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::error!(target: "executor", row = req.row, error = %e, "Pre-submit simulation failed; not submitting");
                    outcome.error = Some(format!("pre-submit simulation failed: {e}"));
                    return Ok(outcome);
                }
            }
        }

        let policy = &params.retry;
        // Broadcasts of this request whose receipt was never seen, oldest first.
        let mut in_flight: Vec<String> = Vec::new();
        loop {
            outcome.attempts_used += 1;
            let attempt = outcome.attempts_used;

            let result = match self.settle_in_flight(&in_flight).await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => self.submit(&req.request, in_flight.last().map(String::as_str)).await,
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(receipt) if receipt.is_success() => {
                    outcome.final_status = FinalStatus::Succeeded;
                    outcome.gas_used = Some(outcome.gas_used.unwrap_or(0) + receipt.gas_used);
                    outcome.error = None;
                    tracing::info!(
                        target: "executor",
                        row = req.row,
                        op = %req.request.kind(),
                        tx = %receipt.reference,
                        gas = receipt.gas_used,
                        attempt,
                        "Request confirmed"
                    );
                    outcome.tx_reference = Some(receipt.reference);
                    return Ok(outcome);
                }
                Ok(receipt) => {
                    // Mined and failed: the nonce is spent, a fresh send is safe.
                    in_flight.clear();
                    outcome.gas_used = Some(outcome.gas_used.unwrap_or(0) + receipt.gas_used);
                    let msg = format!("transaction {} failed on-chain", receipt.reference);
                    outcome.tx_reference = Some(receipt.reference);
                    msg
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(LedgerError::Unconfirmed { reference, reason }) => {
                    tracing::warn!(target: "executor", row = req.row, tx = %reference, attempt, "Broadcast without receipt; will look it up before resending");
                    let msg = format!("transaction {reference} unconfirmed: {reason}");
                    outcome.tx_reference = Some(reference.clone());
                    in_flight.push(reference);
                    msg
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(target: "executor", row = req.row, attempt, error = %e, "Request failed without retry");
                    outcome.error = Some(with_pending_note(e.to_string(), &in_flight));
                    return Ok(outcome);
                }
                Err(e) => e.to_string(),
            };

            let delay = policy.delay_for(attempt - 1);
            tracing::warn!(
                target: "executor",
                row = req.row,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Write attempt failed; backing off"
            );
            let waited = sleep_or_cancel(self.sleeper.as_ref(), delay, &self.cancel).await;

            if !policy.allows_another(attempt) {
                // A broadcast may have been mined during the final backoff.
                if let Ok(Some(receipt)) = self.settle_in_flight(&in_flight).await
                    && receipt.is_success()
                {
                    outcome.final_status = FinalStatus::Succeeded;
                    outcome.gas_used = Some(outcome.gas_used.unwrap_or(0) + receipt.gas_used);
                    outcome.tx_reference = Some(receipt.reference);
                    return Ok(outcome);
                }
                tracing::error!(target: "executor", row = req.row, attempts = attempt, error = %error, "Request failed after retries");
                outcome.error = Some(with_pending_note(error, &in_flight));
                return Ok(outcome);
            }
            if !waited {
                tracing::warn!(target: "executor", row = req.row, attempts = attempt, "Cancelled during backoff");
                outcome.error = Some(with_pending_note(
                    format!("cancelled after {attempt} attempt(s): {error}"),
                    &in_flight,
                ));
                return Ok(outcome);
            }
        }
    }

    async fn submit(&self, request: &Request, replaces: Option<&str>) -> Result<Receipt, LedgerError> {
        match request {
            Request::Mint {
                recipient, amount, ..
            } => self.ledger.submit_mint(*recipient, *amount, replaces).await,
            Request::Burn { amount, .. } => self.ledger.submit_burn(*amount, replaces).await,
        }
    }

    /// First receipt found among earlier broadcasts, newest first.
    async fn settle_in_flight(&self, in_flight: &[String]) -> Result<Option<Receipt>, LedgerError> {
        for reference in in_flight.iter().rev() {
            if let Some(receipt) = self.ledger.receipt(reference).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    fn stop(&self, rest: &[ValidatedRequest], agg: &mut ResultAggregator) {
        tracing::warn!(target: "executor", remaining = rest.len(), "Cancelled; skipping unsubmitted requests");
        for req in rest {
            agg.skip(RowIssue::for_request(req, "cancelled before submission"));
        }
        agg.mark_cancelled();
    }

    fn notify(&self, agg: &ResultAggregator, batch_idx: usize, total_batches: usize) {
        if let Some(observer) = &self.observer {
            observer.on_progress(&agg.progress(batch_idx, total_batches));
        }
    }
}

fn with_pending_note(error: String, in_flight: &[String]) -> String {
    match in_flight.last() {
        Some(reference) => format!("{error}; transaction {reference} may still be mined"),
        None => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::retry::{RecordingSleeper, RetryPolicy};
    use crate::domain::request::Metadata;
    use crate::network::mock_ledger::{MockLedger, Submission, WriteScript};
    use crate::services::batch::aggregator::Progress;
    use alloy::primitives::{Address, U256};
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    fn mint(row: usize, byte: u8, amount: u64) -> ValidatedRequest {
        ValidatedRequest {
            row,
            request: Request::Mint {
                recipient: addr(byte),
                amount: U256::from(amount),
                metadata: Metadata::new(),
            },
        }
    }

    fn params(batch_size: usize, max_retries: u32) -> ExecutionParams {
        ExecutionParams {
            batch_size,
            retry: RetryPolicy::new(max_retries, Duration::from_secs(1), 2),
            pacing: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn executor(ledger: Arc<MockLedger>, sleeper: Arc<RecordingSleeper>) -> BatchExecutor {
        BatchExecutor::new(ledger).with_sleeper(sleeper)
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Progress>>);

    impl ProgressObserver for Collect {
        fn on_progress(&self, p: &Progress) {
            self.0.lock().unwrap().push(p.clone());
        }
    }

    #[tokio::test]
    async fn always_timing_out_request_fails_after_max_retries() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(2), WriteScript::AlwaysTimeout));
        let sleeper = Arc::new(RecordingSleeper::new());
        let reqs = vec![mint(0, 1, 100), mint(1, 2, 200)];
        let report = executor(ledger.clone(), sleeper.clone())
            .execute(&reqs, &params(50, 2))
            .await
            .unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.errors[0].row, 1);
        assert_eq!(report.errors[0].attempts, 2);
        assert!(report.errors[0].reason.contains("timed out"));
        assert_eq!(report.total_amount, U256::from(100u64));
        assert_eq!(ledger.mint_attempts(addr(2)), 2);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test]
    async fn backoff_doubles_for_every_attempt(#[case] retries: u32) {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::AlwaysTimeout));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper.clone())
            .execute(&[mint(0, 1, 1)], &params(50, retries))
            .await
            .unwrap();

        assert_eq!(report.transactions[0].attempts_used, retries);
        let expected: Vec<_> = (0..retries).map(|i| Duration::from_secs(1 << i)).collect();
        assert_eq!(sleeper.waits(), expected);
    }

    #[tokio::test]
    async fn transient_failure_then_success_is_a_success() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::TimeoutTimes(2)));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger, sleeper.clone())
            .execute(&[mint(0, 1, 5)], &params(50, 3))
            .await
            .unwrap();

        let outcome = &report.transactions[0];
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts_used, 3);
        assert!(outcome.tx_reference.is_some());
        assert_eq!(sleeper.waits().len(), 2);
    }

    #[tokio::test]
    async fn failed_receipts_are_retried() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::FailedReceipt));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper)
            .execute(&[mint(0, 1, 5)], &params(50, 3))
            .await
            .unwrap();

        assert_eq!(report.failure_count, 1);
        assert_eq!(ledger.mint_attempts(addr(1)), 3);
        assert!(report.errors[0].reason.contains("failed on-chain"));
        // Gas spent by every mined attempt is accounted for.
        assert_eq!(report.total_gas_used, 3 * crate::network::mock_ledger::MOCK_GAS_PER_TX);
    }

    #[tokio::test]
    async fn timed_out_receipt_is_looked_up_instead_of_minting_twice() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::ConfirmLate));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper.clone())
            .execute(&[mint(0, 1, 100)], &params(50, 3))
            .await
            .unwrap();

        let outcome = &report.transactions[0];
        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(ledger.submissions().len(), 1);
        assert_eq!(ledger.current_supply(), U256::from(100u64));
        assert_eq!(report.total_amount, U256::from(100u64));
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn dropped_broadcast_is_replaced_once() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::Dropped));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper)
            .execute(&[mint(0, 1, 100)], &params(50, 3))
            .await
            .unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(ledger.mint_attempts(addr(1)), 2);
        assert_eq!(ledger.current_supply(), U256::from(100u64));
    }

    #[tokio::test]
    async fn unconfirmed_broadcast_mined_during_last_backoff_counts() {
        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::ConfirmLate));
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper)
            .execute(&[mint(0, 1, 100)], &params(50, 1))
            .await
            .unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.transactions[0].attempts_used, 1);
        assert_eq!(ledger.current_supply(), U256::from(100u64));
    }

    #[tokio::test]
    async fn revert_is_not_retried() {
        let ledger = Arc::new(
            MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::Revert("Paused".into())),
        );
        let sleeper = Arc::new(RecordingSleeper::new());
        let report = executor(ledger.clone(), sleeper.clone())
            .execute(&[mint(0, 1, 5), mint(1, 2, 5)], &params(50, 3))
            .await
            .unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.errors[0].attempts, 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn fatal_error_aborts_the_run() {
        let ledger = Arc::new(
            MockLedger::new(0, 10_000).script_mint(addr(2), WriteScript::Fatal("no signer".into())),
        );
        let sleeper = Arc::new(RecordingSleeper::new());
        let err = executor(ledger.clone(), sleeper)
            .execute(&[mint(0, 1, 5), mint(1, 2, 5), mint(2, 3, 5)], &params(50, 3))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(ledger.submissions().len(), 2);
    }

    #[tokio::test]
    async fn batches_are_paced_and_submitted_in_order() {
        let ledger = Arc::new(MockLedger::new(0, 10_000));
        let sleeper = Arc::new(RecordingSleeper::new());
        let observer = Arc::new(Collect::default());
        let reqs: Vec<_> = (0..5).map(|i| mint(i, i as u8 + 1, 10)).collect();
        let report = executor(ledger.clone(), sleeper.clone())
            .with_observer(observer.clone())
            .execute(&reqs, &params(2, 3))
            .await
            .unwrap();

        assert_eq!(report.success_count, 5);
        // Three batches, pacing only between them.
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(500); 2]);
        let order: Vec<_> = ledger
            .submissions()
            .into_iter()
            .map(|s| match s {
                Submission::Mint { recipient, .. } => recipient,
                Submission::Burn { .. } => Address::ZERO,
            })
            .collect();
        assert_eq!(order, (1..=5).map(addr).collect::<Vec<_>>());

        let seen = observer.0.lock().unwrap();
        assert_eq!(seen.first().unwrap().completed, 0);
        assert_eq!(seen.last().unwrap().completed, 5);
        assert_eq!(seen.last().unwrap().batch_index, 2);
        assert!(seen.iter().all(|p| p.total_batches == 3));
    }

    #[tokio::test]
    async fn pre_submit_simulation_blocks_would_be_reverts() {
        let ledger = Arc::new(MockLedger::new(0, 100));
        let sleeper = Arc::new(RecordingSleeper::new());
        let p = ExecutionParams {
            simulate_before_submit: true,
            ..params(50, 3)
        };
        let report = executor(ledger.clone(), sleeper)
            .execute(&[mint(0, 1, 60), mint(1, 2, 60)], &p)
            .await
            .unwrap();

        // The second mint would push supply past backing.
        assert_eq!(report.success_count, 1);
        assert_eq!(report.transactions[1].attempts_used, 0);
        assert!(report.errors[0].reason.contains("InsufficientBacking"));
        assert_eq!(ledger.submissions().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_skips_unsubmitted_requests() {
        let ledger = Arc::new(MockLedger::new(0, 10_000));
        let sleeper = Arc::new(RecordingSleeper::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = executor(ledger.clone(), sleeper)
            .with_cancellation(cancel)
            .execute(&[mint(0, 1, 5), mint(1, 2, 5)], &params(50, 3))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.submitted(), 0);
        assert_eq!(report.skipped_count, 2);
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn cancellation_during_backoff_fails_the_request() {
        struct CancelOnSleep(CancellationToken);

        #[async_trait::async_trait]
        impl Sleeper for CancelOnSleep {
            async fn sleep(&self, _duration: Duration) {
                self.0.cancel();
                std::future::pending::<()>().await;
            }
        }

        let ledger = Arc::new(MockLedger::new(0, 10_000).script_mint(addr(1), WriteScript::AlwaysTimeout));
        let cancel = CancellationToken::new();
        let report = BatchExecutor::new(ledger.clone())
            .with_sleeper(Arc::new(CancelOnSleep(cancel.clone())))
            .with_cancellation(cancel)
            .execute(&[mint(0, 1, 5), mint(1, 2, 5)], &params(50, 3))
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.errors[0].attempts, 1);
        assert!(report.errors[0].reason.starts_with("cancelled"));
        assert_eq!(report.skipped_count, 1);
        assert_eq!(ledger.mint_attempts(addr(2)), 0);
    }
}
