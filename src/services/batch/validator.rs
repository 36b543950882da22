// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::{AppError, LedgerError};
use crate::common::parsing::{format_token_amount, parse_address_strict};
use crate::domain::compliance::RiskLevel;
use crate::domain::request::{Request, RequestRow, ValidatedRequest, serialize_u256_decimal};
use crate::network::ledger::LedgerClient;
use crate::services::batch::screening::{RiskScreener, screen_all};
use alloy::primitives::{Address, U256};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A validation finding, tied to an input row or to the batch as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub message: String,
}

impl RowIssue {
    pub fn for_row(row: usize, source: &RequestRow, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            address: Some(source.address().to_string()),
            amount: Some(source.amount().to_string()),
            message: message.into(),
        }
    }

    pub fn for_request(req: &ValidatedRequest, message: impl Into<String>) -> Self {
        Self {
            row: Some(req.row),
            address: Some(format!("{:#x}", req.request.address())),
            amount: Some(req.request.amount().to_string()),
            message: message.into(),
        }
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self {
            row: None,
            address: None,
            amount: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "Row {row}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationOutcome {
    pub total_requests: usize,
    /// Sum over syntactically valid rows.
    #[serde(serialize_with = "serialize_u256_decimal")]
    pub total_amount: U256,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
    /// Well-formed rows that passed every check.
    #[serde(skip)]
    pub accepted: Vec<ValidatedRequest>,
    /// Well-formed rows blocked by a business check; executable only when forced.
    #[serde(skip)]
    pub flagged: Vec<ValidatedRequest>,
    /// Malformed rows. Never executable.
    #[serde(skip)]
    pub rejected: Vec<RowIssue>,
}

impl ValidationOutcome {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Requests the executor may run, in input order.
    pub fn executable(&self, force: bool) -> Vec<ValidatedRequest> {
        let mut out = self.accepted.clone();
        if force {
            out.extend(self.flagged.iter().cloned());
            out.sort_by_key(|r| r.row);
        }
        out
    }
}

/// Pre-flight checks against read-only ledger state.
pub struct RequestValidator {
    read_concurrency: usize,
    screener: Option<Arc<dyn RiskScreener>>,
    block_level: RiskLevel,
}

impl RequestValidator {
    pub fn new(read_concurrency: usize) -> Self {
        Self {
            read_concurrency: read_concurrency.max(1),
            screener: None,
            block_level: RiskLevel::Blocked,
        }
    }

    /// Screen every distinct address; risk at or above `block_level` blocks the row.
    pub fn with_screener(mut self, screener: Arc<dyn RiskScreener>, block_level: RiskLevel) -> Self {
        self.screener = Some(screener);
        self.block_level = block_level;
        self
    }

    /// Only a fatal ledger error (missing contract or credentials) is returned as `Err`.
    pub async fn validate(
        &self,
        ledger: &dyn LedgerClient,
        rows: &[RequestRow],
    ) -> Result<ValidationOutcome, AppError> {
        let mut outcome = ValidationOutcome {
            total_requests: rows.len(),
            ..Default::default()
        };
        let mut candidates = Vec::with_capacity(rows.len());

        for (idx, row) in rows.iter().enumerate() {
            let mut problems = Vec::new();
            let address = parse_address_strict(row.address());
            if address.is_none() {
                problems.push(format!("Invalid address format: {}", row.address()));
            }
            if row.amount() <= 0 {
                problems.push(format!("Invalid amount: {}", row.amount()));
            }

            match address {
                Some(address) if problems.is_empty() => {
                    let amount = U256::from(row.amount().unsigned_abs());
                    outcome.total_amount = outcome.total_amount.saturating_add(amount);
                    candidates.push(ValidatedRequest {
                        row: idx,
                        request: typed_request(row, address, amount),
                    });
                }
                _ => {
                    for problem in &problems {
                        outcome.errors.push(RowIssue::for_row(idx, row, problem.clone()));
                    }
                    outcome
                        .rejected
                        .push(RowIssue::for_row(idx, row, problems.join("; ")));
                }
            }
        }

        let mut blocked = HashSet::new();
        self.check_balances(ledger, &candidates, &mut outcome, &mut blocked)
            .await?;
        self.screen(&candidates, &mut outcome, &mut blocked).await;
        let aggregate = self.check_aggregates(ledger, &candidates).await?;
        outcome.errors.extend(aggregate);

        for candidate in candidates {
            if blocked.contains(&candidate.row) {
                outcome.flagged.push(candidate);
            } else {
                outcome.accepted.push(candidate);
            }
        }
        // Row findings in input order, batch-level findings last.
        outcome.errors.sort_by_key(|i| i.row.unwrap_or(usize::MAX));
        outcome.warnings.sort_by_key(|i| i.row.unwrap_or(usize::MAX));

        tracing::info!(
            target: "validator",
            rows = outcome.total_requests,
            accepted = outcome.accepted.len(),
            flagged = outcome.flagged.len(),
            errors = outcome.errors.len(),
            warnings = outcome.warnings.len(),
            total = %format_token_amount(outcome.total_amount),
            "Validation complete"
        );
        Ok(outcome)
    }

    async fn check_balances(
        &self,
        ledger: &dyn LedgerClient,
        candidates: &[ValidatedRequest],
        outcome: &mut ValidationOutcome,
        blocked: &mut HashSet<usize>,
    ) -> Result<(), AppError> {
        let holders = distinct(
            candidates
                .iter()
                .filter(|c| matches!(c.request, Request::Burn { .. }))
                .map(|c| c.request.address()),
        );
        if holders.is_empty() {
            return Ok(());
        }

        let balances: HashMap<Address, Result<U256, LedgerError>> = stream::iter(holders)
            .map(|holder| async move { (holder, ledger.balance_of(holder).await) })
            .buffered(self.read_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        for candidate in candidates {
            let Request::Burn { holder, amount, .. } = &candidate.request else {
                continue;
            };
            match balances.get(holder) {
                Some(Ok(balance)) if balance < amount => {
                    outcome.errors.push(RowIssue::for_request(
                        candidate,
                        format!(
                            "Insufficient balance for {holder:#x}. Has: {}, Needs: {}",
                            format_token_amount(*balance),
                            format_token_amount(*amount)
                        ),
                    ));
                    blocked.insert(candidate.row);
                }
                Some(Err(e)) if e.is_fatal() => return Err(e.clone().into()),
                Some(Err(e)) => {
                    tracing::warn!(target: "validator", row = candidate.row, holder = %holder, error = %e, "Balance lookup failed");
                    outcome.warnings.push(RowIssue::for_request(
                        candidate,
                        format!("Could not verify balance: {e}"),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn screen(
        &self,
        candidates: &[ValidatedRequest],
        outcome: &mut ValidationOutcome,
        blocked: &mut HashSet<usize>,
    ) {
        let Some(screener) = &self.screener else {
            return;
        };
        let addresses = distinct(candidates.iter().map(|c| c.request.address()));
        let results: HashMap<_, _> =
            screen_all(screener.as_ref(), &addresses, self.read_concurrency)
                .await
                .into_iter()
                .collect();

        for candidate in candidates {
            let address = candidate.request.address();
            match results.get(&address) {
                Some(Ok(result)) if result.risk_level >= self.block_level => {
                    outcome.errors.push(RowIssue::for_request(
                        candidate,
                        format!(
                            "Screening flagged {address:#x} as {}: {}",
                            result.risk_level,
                            result.alerts.join("; ")
                        ),
                    ));
                    blocked.insert(candidate.row);
                }
                Some(Ok(result)) if result.risk_level > RiskLevel::Low => {
                    outcome.warnings.push(RowIssue::for_request(
                        candidate,
                        format!("Elevated risk for {address:#x}: {}", result.risk_level),
                    ));
                }
                Some(Err(e)) => {
                    outcome.warnings.push(RowIssue::for_request(
                        candidate,
                        format!("Could not screen address: {e}"),
                    ));
                }
                _ => {}
            }
        }
    }

    /// Solvency and epoch capacity for the mint total of `requests`, read
    /// fresh from the ledger. Lookup failures are findings too.
    pub async fn check_aggregates(
        &self,
        ledger: &dyn LedgerClient,
        requests: &[ValidatedRequest],
    ) -> Result<Vec<RowIssue>, AppError> {
        let mut errors = Vec::new();
        let minted: U256 = requests
            .iter()
            .filter(|c| matches!(c.request, Request::Mint { .. }))
            .fold(U256::ZERO, |acc, c| acc.saturating_add(c.request.amount()));
        if minted.is_zero() {
            return Ok(errors);
        }

        let (supply, backing, epoch) = tokio::join!(
            ledger.total_supply(),
            ledger.backing(),
            ledger.epoch_state()
        );

        match (supply, backing) {
            (Ok(supply), Ok(backing)) => {
                let after = supply.saturating_add(minted);
                if after > backing {
                    errors.push(RowIssue::batch(format!(
                        "Batch would exceed backing by {}. Current supply: {}, Backing: {}, Batch total: {}",
                        format_token_amount(after - backing),
                        format_token_amount(supply),
                        format_token_amount(backing),
                        format_token_amount(minted)
                    )));
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                if e.is_fatal() {
                    return Err(e.into());
                }
                tracing::warn!(target: "validator", error = %e, "Solvency lookup failed");
                errors.push(RowIssue::batch(format!("Could not verify backing: {e}")));
            }
        }

        match epoch {
            Ok(Some(epoch)) if minted > epoch.remaining() => {
                errors.push(RowIssue::batch(format!(
                    "Batch exceeds epoch capacity. Remaining: {}, Requested: {}",
                    format_token_amount(epoch.remaining()),
                    format_token_amount(minted)
                )));
            }
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(target: "validator", error = %e, "Epoch lookup failed");
                errors.push(RowIssue::batch(format!("Could not verify epoch capacity: {e}")));
            }
        }
        Ok(errors)
    }
}

fn typed_request(row: &RequestRow, address: Address, amount: U256) -> Request {
    match row {
        RequestRow::Mint { metadata, .. } => Request::Mint {
            recipient: address,
            amount,
            metadata: metadata.clone(),
        },
        RequestRow::Burn { metadata, .. } => Request::Burn {
            holder: address,
            amount,
            metadata: metadata.clone(),
        },
    }
}

fn distinct(addresses: impl Iterator<Item = Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    addresses.filter(|a| seen.insert(*a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::compliance::SanctionsList;
    use crate::network::mock_ledger::MockLedger;
    use crate::services::batch::screening::SanctionsScreener;
    use rstest::rstest;

    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1111";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb2222";

    fn addr(s: &str) -> Address {
        parse_address_strict(s).unwrap()
    }

    #[tokio::test]
    async fn single_mint_within_backing_is_valid() {
        let ledger = MockLedger::new(0, 2_000_000);
        let outcome = RequestValidator::new(50)
            .validate(&ledger, &[RequestRow::mint(ALICE, 1_000_000)])
            .await
            .unwrap();

        assert!(outcome.valid());
        assert_eq!(outcome.total_amount, U256::from(1_000_000u64));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].request.address(), addr(ALICE));
    }

    #[rstest]
    #[case(RequestRow::mint(ALICE, -5), "Invalid amount: -5")]
    #[case(RequestRow::mint(ALICE, 0), "Invalid amount: 0")]
    #[case(RequestRow::mint("0xaaaa", 10), "Invalid address format: 0xaaaa")]
    #[case(RequestRow::burn("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1111", 10), "Invalid address format")]
    #[tokio::test]
    async fn malformed_row_is_reported_and_excluded(#[case] bad: RequestRow, #[case] expected: &str) {
        let ledger = MockLedger::new(0, 2_000_000);
        let rows = vec![RequestRow::mint(ALICE, 100), bad];
        let outcome = RequestValidator::new(50).validate(&ledger, &rows).await.unwrap();

        assert!(!outcome.valid());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, Some(1));
        assert!(outcome.errors[0].message.starts_with(expected));
        assert_eq!(outcome.total_amount, U256::from(100u64));
        assert_eq!(outcome.rejected.len(), 1);
        assert!(outcome.executable(true).iter().all(|r| r.row == 0));
    }

    #[tokio::test]
    async fn mint_total_above_backing_is_a_batch_error() {
        let ledger = MockLedger::new(1_500_000, 2_000_000);
        let rows = vec![RequestRow::mint(ALICE, 400_000), RequestRow::mint(BOB, 400_000)];
        let outcome = RequestValidator::new(50).validate(&ledger, &rows).await.unwrap();

        assert!(!outcome.valid());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, None);
        assert!(outcome.errors[0].message.contains("exceed backing"));
        // Aggregate failures do not flag individual rows.
        assert_eq!(outcome.accepted.len(), 2);
    }

    #[tokio::test]
    async fn mint_total_above_epoch_remaining_is_a_batch_error() {
        let ledger = MockLedger::new(0, 10_000_000).with_epoch(900, 1_000);
        let outcome = RequestValidator::new(50)
            .validate(&ledger, &[RequestRow::mint(ALICE, 101)])
            .await
            .unwrap();
        assert!(!outcome.valid());
        assert!(outcome.errors[0].message.contains("epoch capacity"));
    }

    #[tokio::test]
    async fn unavailable_backing_blocks_instead_of_warning() {
        let ledger = MockLedger::new(0, 2_000_000).with_failing_backing();
        let outcome = RequestValidator::new(50)
            .validate(&ledger, &[RequestRow::mint(ALICE, 1)])
            .await
            .unwrap();
        assert!(!outcome.valid());
        assert!(outcome.errors[0].message.starts_with("Could not verify backing"));
    }

    #[tokio::test]
    async fn burn_above_balance_is_flagged() {
        let ledger = MockLedger::new(1_000, 1_000).with_balance(addr(BOB), 50);
        let rows = vec![RequestRow::burn(BOB, 40), RequestRow::burn(BOB, 60)];
        let outcome = RequestValidator::new(50).validate(&ledger, &rows).await.unwrap();

        assert!(!outcome.valid());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, Some(1));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.flagged.len(), 1);
        assert_eq!(outcome.executable(false).len(), 1);
        let forced: Vec<_> = outcome.executable(true).iter().map(|r| r.row).collect();
        assert_eq!(forced, vec![0, 1]);
    }

    #[tokio::test]
    async fn balance_lookup_failure_is_only_a_warning() {
        let ledger = MockLedger::new(1_000, 1_000).with_failing_balance_lookup(addr(BOB));
        let outcome = RequestValidator::new(50)
            .validate(&ledger, &[RequestRow::burn(BOB, 10)])
            .await
            .unwrap();

        assert!(outcome.valid());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].message.starts_with("Could not verify balance"));
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[tokio::test]
    async fn balance_reads_stay_within_read_concurrency() {
        let holders: Vec<String> = (1..=40u8)
            .map(|b| format!("{:#x}", Address::from([b; 20])))
            .collect();
        let ledger = holders
            .iter()
            .fold(MockLedger::new(0, 0), |l, h| l.with_balance(addr(h), 10));
        let rows: Vec<_> = holders.iter().map(|h| RequestRow::burn(h, 1)).collect();

        let outcome = RequestValidator::new(8).validate(&ledger, &rows).await.unwrap();

        assert!(outcome.valid());
        assert_eq!(outcome.accepted.len(), 40);
        let peak = ledger.peak_concurrent_reads();
        assert!(peak > 1, "reads ran one at a time");
        assert!(peak <= 8, "peak {peak} exceeded the read limit");
    }

    #[tokio::test]
    async fn sanctioned_recipient_is_blocked() {
        let ledger = MockLedger::new(0, 2_000_000);
        let screener = Arc::new(SanctionsScreener::new(SanctionsList::new([addr(BOB)])));
        let validator = RequestValidator::new(4).with_screener(screener, RiskLevel::Blocked);
        let rows = vec![RequestRow::mint(ALICE, 10), RequestRow::mint(BOB, 10)];
        let outcome = validator.validate(&ledger, &rows).await.unwrap();

        assert!(!outcome.valid());
        assert_eq!(outcome.errors[0].row, Some(1));
        assert!(outcome.errors[0].message.contains("blocked"));
        assert_eq!(outcome.flagged[0].row, 1);
    }
}
