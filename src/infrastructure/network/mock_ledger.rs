// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! In-memory `LedgerClient` with scripted write failures, for tests.

use crate::common::error::LedgerError;
use crate::common::time_utils::current_unix;
use crate::domain::request::Request;
use crate::network::ledger::{EpochState, LedgerClient, OracleStatus, Receipt, ReceiptStatus};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const MOCK_GAS_PER_TX: u64 = 65_000;

/// Behaviour of a scripted write target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteScript {
    /// Transient timeout on every attempt.
    AlwaysTimeout,
    /// Transient timeout on the first `n` attempts, then success.
    TimeoutTimes(u32),
    /// Mined with a failed receipt on every attempt.
    FailedReceipt,
    /// Deterministic revert; not retryable.
    Revert(String),
    /// Configuration failure; aborts the run.
    Fatal(String),
    /// First broadcast is mined but its receipt wait times out.
    ConfirmLate,
    /// First broadcast never reaches a block; a replacement goes through.
    Dropped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Mint { recipient: Address, amount: U256 },
    Burn { amount: U256 },
}

#[derive(Debug)]
struct MockState {
    total_supply: U256,
    backing: U256,
    balances: HashMap<Address, U256>,
    epoch: EpochState,
    oracle: OracleStatus,
    emergency_level: Option<u8>,
    no_policy: bool,
    failing_balances: HashSet<Address>,
    fail_backing: bool,
    mint_scripts: HashMap<Address, WriteScript>,
    burn_scripts: HashMap<U256, WriteScript>,
    attempts: HashMap<Address, u32>,
    burn_attempts: HashMap<U256, u32>,
    submissions: Vec<Submission>,
    receipts: HashMap<String, Receipt>,
    simulations: usize,
    next_reference: u64,
}

/// Tracks concurrent balance reads and the highest count seen.
#[derive(Debug, Default)]
struct ReadGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct ReadGuard<'a>(&'a ReadGauge);

impl ReadGauge {
    fn enter(&self) -> ReadGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ReadGuard(self)
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockLedger {
    state: Mutex<MockState>,
    reads: ReadGauge,
}

impl MockLedger {
    pub fn new(total_supply: u128, backing: u128) -> Self {
        let now = current_unix();
        Self {
            state: Mutex::new(MockState {
                total_supply: U256::from(total_supply),
                backing: U256::from(backing),
                balances: HashMap::new(),
                epoch: EpochState {
                    minted: U256::ZERO,
                    capacity: U256::from(u128::MAX),
                },
                oracle: OracleStatus {
                    last_update: now,
                    staleness_threshold: 3_600,
                    observed_at: now,
                },
                emergency_level: None,
                no_policy: false,
                failing_balances: HashSet::new(),
                fail_backing: false,
                mint_scripts: HashMap::new(),
                burn_scripts: HashMap::new(),
                attempts: HashMap::new(),
                burn_attempts: HashMap::new(),
                submissions: Vec::new(),
                receipts: HashMap::new(),
                simulations: 0,
                next_reference: 1,
            }),
            reads: ReadGauge::default(),
        }
    }

    fn state_mut(&mut self) -> &mut MockState {
        self.state.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_epoch(mut self, minted: u128, capacity: u128) -> Self {
        self.state_mut().epoch = EpochState {
            minted: U256::from(minted),
            capacity: U256::from(capacity),
        };
        self
    }

    pub fn with_balance(mut self, holder: Address, amount: u128) -> Self {
        self.state_mut()
            .balances
            .insert(holder, U256::from(amount));
        self
    }

    pub fn with_stale_oracle(mut self) -> Self {
        let state = self.state_mut();
        state.oracle.last_update = state
            .oracle
            .observed_at
            .saturating_sub(state.oracle.staleness_threshold + 1);
        self
    }

    pub fn with_emergency_level(mut self, level: u8) -> Self {
        self.state_mut().emergency_level = Some(level);
        self
    }

    /// No policy contract: epoch state reads as absent.
    pub fn without_policy(mut self) -> Self {
        self.state_mut().no_policy = true;
        self
    }

    pub fn with_failing_balance_lookup(mut self, holder: Address) -> Self {
        self.state_mut().failing_balances.insert(holder);
        self
    }

    pub fn with_failing_backing(mut self) -> Self {
        self.state_mut().fail_backing = true;
        self
    }

    pub fn script_mint(mut self, recipient: Address, script: WriteScript) -> Self {
        self.state_mut().mint_scripts.insert(recipient, script);
        self
    }

    pub fn script_burn(mut self, amount: u128, script: WriteScript) -> Self {
        self.state_mut()
            .burn_scripts
            .insert(U256::from(amount), script);
        self
    }

    /// Moves the backing figure after construction, e.g. between check and execution.
    pub fn set_backing(&self, backing: u128) {
        self.lock().backing = U256::from(backing);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn mint_attempts(&self, recipient: Address) -> u32 {
        self.lock().attempts.get(&recipient).copied().unwrap_or(0)
    }

    pub fn simulations(&self) -> usize {
        self.lock().simulations
    }

    /// Highest number of balance reads that were in flight at once.
    pub fn peak_concurrent_reads(&self) -> usize {
        self.reads.peak.load(Ordering::SeqCst)
    }

    pub fn current_supply(&self) -> U256 {
        self.lock().total_supply
    }

    fn next_reference(state: &mut MockState) -> String {
        let reference = format!("0x{:064x}", state.next_reference);
        state.next_reference += 1;
        reference
    }

    /// Mines `submission`, applying its effect when `status` is success.
    fn mine(state: &mut MockState, submission: &Submission, status: ReceiptStatus) -> Receipt {
        if status == ReceiptStatus::Success {
            match *submission {
                Submission::Mint { recipient, amount } => {
                    state.total_supply = state.total_supply.saturating_add(amount);
                    state.epoch.minted = state.epoch.minted.saturating_add(amount);
                    let balance = state.balances.entry(recipient).or_insert(U256::ZERO);
                    *balance = balance.saturating_add(amount);
                }
                Submission::Burn { amount } => {
                    state.total_supply = state.total_supply.saturating_sub(amount);
                }
            }
        }
        let receipt = Receipt {
            status,
            reference: Self::next_reference(state),
            gas_used: MOCK_GAS_PER_TX,
        };
        state
            .receipts
            .insert(receipt.reference.clone(), receipt.clone());
        receipt
    }

    fn write(
        state: &mut MockState,
        submission: Submission,
        script: Option<WriteScript>,
        attempt: u32,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        state.submissions.push(submission.clone());

        // The replaced broadcast already took the nonce.
        if let Some(previous) = replaces
            && state.receipts.contains_key(previous)
        {
            return Err(LedgerError::Transient("nonce too low".into()));
        }

        match script {
            Some(WriteScript::AlwaysTimeout) => {
                Err(LedgerError::Transient("request timed out".into()))
            }
            Some(WriteScript::TimeoutTimes(n)) if attempt <= n => {
                Err(LedgerError::Transient("request timed out".into()))
            }
            Some(WriteScript::FailedReceipt) => {
                Ok(Self::mine(state, &submission, ReceiptStatus::Failed))
            }
            Some(WriteScript::Revert(reason)) => Err(LedgerError::Reverted(reason)),
            Some(WriteScript::Fatal(reason)) => Err(LedgerError::Fatal(reason)),
            Some(WriteScript::ConfirmLate) if attempt == 1 => {
                let receipt = Self::mine(state, &submission, ReceiptStatus::Success);
                Err(LedgerError::Unconfirmed {
                    reference: receipt.reference,
                    reason: "receipt wait timed out".into(),
                })
            }
            Some(WriteScript::Dropped) if attempt == 1 => Err(LedgerError::Unconfirmed {
                reference: Self::next_reference(state),
                reason: "receipt wait timed out".into(),
            }),
            _ => Ok(Self::mine(state, &submission, ReceiptStatus::Success)),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn total_supply(&self) -> Result<U256, LedgerError> {
        Ok(self.lock().total_supply)
    }

    async fn backing(&self) -> Result<U256, LedgerError> {
        let state = self.lock();
        if state.fail_backing {
            return Err(LedgerError::Transient("oracle endpoint unreachable".into()));
        }
        Ok(state.backing)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        let _read = self.reads.enter();
        tokio::task::yield_now().await;
        let state = self.lock();
        if state.failing_balances.contains(&account) {
            return Err(LedgerError::Transient("balance lookup timed out".into()));
        }
        Ok(state.balances.get(&account).copied().unwrap_or(U256::ZERO))
    }

    async fn epoch_state(&self) -> Result<Option<EpochState>, LedgerError> {
        let state = self.lock();
        Ok((!state.no_policy).then_some(state.epoch))
    }

    async fn oracle_status(&self) -> Result<OracleStatus, LedgerError> {
        Ok(self.lock().oracle)
    }

    async fn emergency_level(&self) -> Result<Option<u8>, LedgerError> {
        Ok(self.lock().emergency_level)
    }

    async fn simulate(&self, request: &Request) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        state.simulations += 1;
        match request {
            Request::Mint {
                recipient, amount, ..
            } => {
                if let Some(WriteScript::Revert(reason)) = state.mint_scripts.get(recipient) {
                    return Err(LedgerError::Reverted(reason.clone()));
                }
                if state.total_supply.saturating_add(*amount) > state.backing {
                    return Err(LedgerError::Reverted("InsufficientBacking".into()));
                }
                if *amount > state.epoch.remaining() {
                    return Err(LedgerError::Reverted("EpochCapacityExceeded".into()));
                }
            }
            Request::Burn { amount, .. } => {
                if *amount > state.total_supply {
                    return Err(LedgerError::Reverted("burn amount exceeds balance".into()));
                }
            }
        }
        Ok(MOCK_GAS_PER_TX)
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        Ok(self.lock().receipts.get(reference).cloned())
    }

    async fn submit_mint(
        &self,
        recipient: Address,
        amount: U256,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.lock();
        let attempt = {
            let counter = state.attempts.entry(recipient).or_insert(0);
            *counter += 1;
            *counter
        };
        let script = state.mint_scripts.get(&recipient).cloned();
        Self::write(
            &mut state,
            Submission::Mint { recipient, amount },
            script,
            attempt,
            replaces,
        )
    }

    async fn submit_burn(
        &self,
        amount: U256,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let mut state = self.lock();
        let attempt = {
            let counter = state.burn_attempts.entry(amount).or_insert(0);
            *counter += 1;
            *counter
        };
        let script = state.burn_scripts.get(&amount).cloned();
        Self::write(
            &mut state,
            Submission::Burn { amount },
            script,
            attempt,
            replaces,
        )
    }
}
