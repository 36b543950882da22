// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::{AppError, LedgerError};
use crate::common::parsing::format_token_amount;
use crate::common::time_utils::current_unix;
use crate::network::ledger::{EpochState, LedgerClient, OracleStatus};
use alloy::primitives::U256;
use serde::Serialize;
use std::time::{Duration, Instant};

pub const SOLVENCY: &str = "solvency";
pub const RATE_LIMIT: &str = "rate_limit";
pub const ORACLE_FRESHNESS: &str = "oracle_freshness";
pub const EMERGENCY_STATE: &str = "emergency_state";

/// Point-in-time ledger state. A failed read leaves its field empty.
#[derive(Clone, Debug, Serialize)]
pub struct InvariantSnapshot {
    pub total_supply: Option<U256>,
    pub backing: Option<U256>,
    pub epoch: Option<EpochState>,
    pub oracle: Option<OracleStatus>,
    pub emergency_level: Option<u8>,
    pub captured_at_unix: u64,
    #[serde(skip)]
    pub captured_at: Instant,
    #[serde(skip)]
    lookup_errors: Vec<(&'static str, String)>,
}

impl InvariantSnapshot {
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn oracle_is_stale(&self) -> Option<bool> {
        self.oracle.map(|o| o.is_stale())
    }

    fn lookup_error(&self, name: &str) -> Option<&str> {
        self.lookup_errors
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, e)| e.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvariantCheck {
    pub name: &'static str,
    pub valid: bool,
    /// Informational checks never affect `all_valid`.
    pub blocking: bool,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct InvariantReport {
    pub all_valid: bool,
    pub checks: Vec<InvariantCheck>,
    pub snapshot: InvariantSnapshot,
}

impl InvariantReport {
    /// Names of blocking invariants that failed.
    pub fn violations(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.blocking && !c.valid)
            .map(|c| c.name.to_string())
            .collect()
    }

    pub fn check(&self, name: &str) -> Option<&InvariantCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Ledger-wide invariants, independent of any request.
pub struct InvariantGate;

impl InvariantGate {
    /// Reads every input concurrently. Only fatal errors abort the capture.
    pub async fn capture(ledger: &dyn LedgerClient) -> Result<InvariantSnapshot, AppError> {
        let (supply, backing, epoch, oracle, emergency) = tokio::join!(
            ledger.total_supply(),
            ledger.backing(),
            ledger.epoch_state(),
            ledger.oracle_status(),
            ledger.emergency_level()
        );

        let mut lookup_errors = Vec::new();
        let total_supply = keep(supply, "total_supply", &mut lookup_errors)?;
        let backing = keep(backing, "backing", &mut lookup_errors)?;
        let epoch = keep(epoch, RATE_LIMIT, &mut lookup_errors)?.flatten();
        let oracle = keep(oracle, ORACLE_FRESHNESS, &mut lookup_errors)?;
        let emergency_level = keep(emergency, EMERGENCY_STATE, &mut lookup_errors)?.flatten();

        Ok(InvariantSnapshot {
            total_supply,
            backing,
            epoch,
            oracle,
            emergency_level,
            captured_at_unix: current_unix(),
            captured_at: Instant::now(),
            lookup_errors,
        })
    }

    pub fn evaluate(snapshot: InvariantSnapshot) -> InvariantReport {
        let mut checks = Vec::with_capacity(4);

        checks.push(match (snapshot.total_supply, snapshot.backing) {
            (Some(supply), Some(backing)) => InvariantCheck {
                name: SOLVENCY,
                valid: supply <= backing,
                blocking: true,
                detail: format!(
                    "supply {} / backing {}",
                    format_token_amount(supply),
                    format_token_amount(backing)
                ),
            },
            _ => unavailable(
                SOLVENCY,
                snapshot
                    .lookup_error("total_supply")
                    .or(snapshot.lookup_error("backing")),
            ),
        });

        checks.push(match (snapshot.epoch, snapshot.lookup_error(RATE_LIMIT)) {
            (Some(epoch), _) => InvariantCheck {
                name: RATE_LIMIT,
                valid: epoch.minted <= epoch.capacity,
                blocking: true,
                detail: format!(
                    "epoch minted {} / capacity {}",
                    format_token_amount(epoch.minted),
                    format_token_amount(epoch.capacity)
                ),
            },
            (None, Some(err)) => unavailable(RATE_LIMIT, Some(err)),
            (None, None) => InvariantCheck {
                name: RATE_LIMIT,
                valid: true,
                blocking: false,
                detail: "no policy module".to_string(),
            },
        });

        checks.push(match snapshot.oracle {
            Some(oracle) => InvariantCheck {
                name: ORACLE_FRESHNESS,
                valid: !oracle.is_stale(),
                blocking: true,
                detail: format!(
                    "last update {}s ago, threshold {}s",
                    oracle.age_secs(),
                    oracle.staleness_threshold
                ),
            },
            None => unavailable(ORACLE_FRESHNESS, snapshot.lookup_error(ORACLE_FRESHNESS)),
        });

        let emergency_detail = match (snapshot.emergency_level, snapshot.lookup_error(EMERGENCY_STATE)) {
            (_, Some(err)) => format!("lookup failed: {err}"),
            (Some(level), None) => format!("level {level}"),
            (None, None) => "no emergency module".to_string(),
        };
        checks.push(InvariantCheck {
            name: EMERGENCY_STATE,
            valid: true,
            blocking: false,
            detail: emergency_detail,
        });

        let all_valid = checks.iter().all(|c| c.valid || !c.blocking);
        for check in checks.iter().filter(|c| !c.valid) {
            tracing::warn!(target: "gate", invariant = check.name, detail = %check.detail, "Invariant violated");
        }
        tracing::info!(
            target: "gate",
            all_valid,
            emergency_level = ?snapshot.emergency_level,
            "Invariant check complete"
        );

        InvariantReport {
            all_valid,
            checks,
            snapshot,
        }
    }

    pub async fn check(ledger: &dyn LedgerClient) -> Result<InvariantReport, AppError> {
        Ok(Self::evaluate(Self::capture(ledger).await?))
    }
}

fn keep<T>(
    res: Result<T, LedgerError>,
    name: &'static str,
    errors: &mut Vec<(&'static str, String)>,
) -> Result<Option<T>, AppError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            tracing::warn!(target: "gate", input = name, error = %e, "Invariant input unavailable");
            errors.push((name, e.to_string()));
            Ok(None)
        }
    }
}

fn unavailable(name: &'static str, err: Option<&str>) -> InvariantCheck {
    InvariantCheck {
        name,
        valid: false,
        blocking: true,
        detail: format!("lookup failed: {}", err.unwrap_or("no data")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock_ledger::MockLedger;

    #[tokio::test]
    async fn healthy_ledger_passes_every_invariant() {
        let ledger = MockLedger::new(1_000, 2_000).with_epoch(10, 100);
        let report = InvariantGate::check(&ledger).await.unwrap();

        assert!(report.all_valid);
        assert!(report.violations().is_empty());
        assert_eq!(report.checks.len(), 4);
        assert_eq!(report.snapshot.total_supply, Some(U256::from(1_000u64)));
        assert_eq!(report.snapshot.oracle_is_stale(), Some(false));
    }

    #[tokio::test]
    async fn insolvent_and_stale_are_both_reported() {
        let ledger = MockLedger::new(3_000, 2_000).with_stale_oracle();
        let report = InvariantGate::check(&ledger).await.unwrap();

        assert!(!report.all_valid);
        assert_eq!(report.violations(), vec![SOLVENCY, ORACLE_FRESHNESS]);
    }

    #[tokio::test]
    async fn emergency_level_never_blocks() {
        let ledger = MockLedger::new(0, 0).with_emergency_level(3);
        let report = InvariantGate::check(&ledger).await.unwrap();

        assert!(report.all_valid);
        let emergency = report.check(EMERGENCY_STATE).unwrap();
        assert!(!emergency.blocking);
        assert_eq!(emergency.detail, "level 3");
    }

    #[tokio::test]
    async fn missing_policy_module_leaves_rate_limit_informational() {
        let ledger = MockLedger::new(100, 100).without_policy();
        let report = InvariantGate::check(&ledger).await.unwrap();

        assert!(report.all_valid);
        let rate = report.check(RATE_LIMIT).unwrap();
        assert!(rate.valid);
        assert!(!rate.blocking);
        assert_eq!(rate.detail, "no policy module");
    }

    #[tokio::test]
    async fn unreadable_backing_fails_closed() {
        let ledger = MockLedger::new(0, 10).with_failing_backing();
        let report = InvariantGate::check(&ledger).await.unwrap();

        assert!(!report.all_valid);
        assert_eq!(report.violations(), vec![SOLVENCY]);
        assert!(report.check(SOLVENCY).unwrap().detail.starts_with("lookup failed"));
    }

    #[test]
    fn epoch_over_capacity_violates_rate_limit() {
        let snapshot = InvariantSnapshot {
            total_supply: Some(U256::ZERO),
            backing: Some(U256::ZERO),
            epoch: Some(EpochState {
                minted: U256::from(11u64),
                capacity: U256::from(10u64),
            }),
            oracle: None,
            emergency_level: None,
            captured_at_unix: 0,
            captured_at: Instant::now(),
            lookup_errors: vec![(ORACLE_FRESHNESS, "timeout".into())],
        };
        let report = InvariantGate::evaluate(snapshot);
        assert_eq!(report.violations(), vec![RATE_LIMIT, ORACLE_FRESHNESS]);
        assert_eq!(
            report.check(ORACLE_FRESHNESS).unwrap().detail,
            "lookup failed: timeout"
        );
    }
}
