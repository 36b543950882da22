// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::{AppError, LedgerError};
use crate::domain::request::{Request, ValidatedRequest};
use crate::network::ledger::LedgerClient;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Rough ETH/USD rate used only for the pre-run cost estimate.
const ESTIMATE_ETH_USD: f64 = 2_000.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationOutcome {
    pub row: usize,
    #[serde(flatten)]
    pub request: Request,
    pub would_succeed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

/// Dry-runs requests as read-only calls. Never retries: the result is a
/// function of ledger state alone.
#[derive(Clone)]
pub struct TransactionSimulator {
    ledger: Arc<dyn LedgerClient>,
}

impl TransactionSimulator {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn simulate(&self, req: &ValidatedRequest) -> Result<SimulationOutcome, AppError> {
        let (would_succeed, estimated_gas, revert_reason) =
            match self.ledger.simulate(&req.request).await {
                Ok(gas) => (true, Some(gas), None),
                Err(LedgerError::Fatal(msg)) => return Err(AppError::Config(msg)),
                Err(e) => {
                    tracing::debug!(target: "simulator", row = req.row, error = %e, "Simulation failed");
                    (false, None, Some(e.to_string()))
                }
            };
        Ok(SimulationOutcome {
            row: req.row,
            request: req.request.clone(),
            would_succeed,
            estimated_gas,
            revert_reason,
        })
    }

    /// Simulates every request in order. A failing request never stops the rest;
    /// cancellation stops before the next request and returns what was simulated.
    pub async fn simulate_all(
        &self,
        requests: &[ValidatedRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<SimulationOutcome>, AppError> {
        let mut out = Vec::with_capacity(requests.len());
        for req in requests {
            if cancel.is_cancelled() {
                break;
            }
            out.push(self.simulate(req).await?);
        }
        let would_fail = out.iter().filter(|o| !o.would_succeed).count();
        tracing::info!(target: "simulator", simulated = out.len(), would_fail, "Simulation complete");
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GasEstimate {
    pub request_count: usize,
    pub gas_per_tx: u64,
    pub total_gas: u64,
    pub gas_price_gwei: f64,
    pub estimated_cost_eth: f64,
    pub estimated_cost_usd: f64,
}

/// Back-of-envelope cost for `request_count` writes.
pub fn estimate_gas_cost(request_count: usize, gas_per_tx: u64, gas_price_gwei: f64) -> GasEstimate {
    let total_gas = (request_count as u64).saturating_mul(gas_per_tx);
    let estimated_cost_eth = total_gas as f64 * gas_price_gwei / 1e9;
    GasEstimate {
        request_count,
        gas_per_tx,
        total_gas,
        gas_price_gwei,
        estimated_cost_eth,
        estimated_cost_usd: estimated_cost_eth * ESTIMATE_ETH_USD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::Metadata;
    use crate::network::mock_ledger::{MOCK_GAS_PER_TX, MockLedger, WriteScript};
    use alloy::primitives::{Address, U256};

    fn mint(row: usize, byte: u8, amount: u64) -> ValidatedRequest {
        ValidatedRequest {
            row,
            request: Request::Mint {
                recipient: Address::from([byte; 20]),
                amount: U256::from(amount),
                metadata: Metadata::new(),
            },
        }
    }

    #[tokio::test]
    async fn failure_does_not_stop_remaining_simulations() {
        let ledger = Arc::new(
            MockLedger::new(0, 1_000)
                .script_mint(Address::from([2u8; 20]), WriteScript::Revert("Paused".into())),
        );
        let sim = TransactionSimulator::new(ledger.clone());
        let reqs = vec![mint(0, 1, 10), mint(1, 2, 10), mint(2, 3, 10)];
        let out = sim.simulate_all(&reqs, &CancellationToken::new()).await.unwrap();

        let flags: Vec<_> = out.iter().map(|o| o.would_succeed).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(out[0].estimated_gas, Some(MOCK_GAS_PER_TX));
        assert!(out[1].revert_reason.as_deref().unwrap().contains("Paused"));
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn repeated_simulation_is_idempotent() {
        let ledger = Arc::new(MockLedger::new(900, 1_000));
        let sim = TransactionSimulator::new(ledger.clone());
        let reqs = vec![mint(0, 1, 50), mint(1, 2, 500)];
        let cancel = CancellationToken::new();

        let first = sim.simulate_all(&reqs, &cancel).await.unwrap();
        let second = sim.simulate_all(&reqs, &cancel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.simulations(), 4);
        assert_eq!(ledger.current_supply(), U256::from(900u64));
    }

    #[test]
    fn gas_estimate_matches_hand_calculation() {
        let est = estimate_gas_cost(10, 100_000, 30.0);
        assert_eq!(est.total_gas, 1_000_000);
        assert!((est.estimated_cost_eth - 0.03).abs() < 1e-12);
        assert!((est.estimated_cost_usd - 60.0).abs() < 1e-9);
    }
}
