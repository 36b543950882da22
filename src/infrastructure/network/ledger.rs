// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::constants::REPLACEMENT_FEE_BUMP_PERCENT;
use crate::common::error::LedgerError;
use crate::common::time_utils::current_unix;
use crate::data::abi::{IBackedToken, IBackingOracle, IEmergencyPause, ISecureMintPolicy};
use crate::domain::request::Request;
use crate::network::nonce::NonceManager;
use crate::network::provider::LedgerProvider;
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EpochState {
    pub minted: U256,
    pub capacity: U256,
}

impl EpochState {
    pub fn remaining(&self) -> U256 {
        self.capacity.saturating_sub(self.minted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OracleStatus {
    /// Unix seconds of the last backing update.
    pub last_update: u64,
    /// Maximum tolerated age in seconds.
    pub staleness_threshold: u64,
    /// Ledger time the status was read at.
    pub observed_at: u64,
}

impl OracleStatus {
    pub fn age_secs(&self) -> u64 {
        self.observed_at.saturating_sub(self.last_update)
    }

    pub fn is_stale(&self) -> bool {
        self.age_secs() > self.staleness_threshold
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub status: ReceiptStatus,
    pub reference: String,
    pub gas_used: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Remote ledger exposing supply/backing state and mint/burn writes.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn total_supply(&self) -> Result<U256, LedgerError>;
    async fn backing(&self) -> Result<U256, LedgerError>;
    async fn balance_of(&self, account: Address) -> Result<U256, LedgerError>;
    /// `None` when no policy contract enforces an epoch limit.
    async fn epoch_state(&self) -> Result<Option<EpochState>, LedgerError>;
    async fn oracle_status(&self) -> Result<OracleStatus, LedgerError>;
    /// `None` when no emergency module is deployed.
    async fn emergency_level(&self) -> Result<Option<u8>, LedgerError>;
    /// Dry-run `request` as a read-only call; returns the gas estimate.
    async fn simulate(&self, request: &Request) -> Result<u64, LedgerError>;
    /// Receipt of an earlier broadcast; `None` while it is unmined or unknown.
    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError>;
    /// `replaces` names an unconfirmed broadcast of the same request. The new
    /// write takes its nonce, so at most one of the two can be mined.
    async fn submit_mint(
        &self,
        recipient: Address,
        amount: U256,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError>;
    async fn submit_burn(&self, amount: U256, replaces: Option<&str>)
    -> Result<Receipt, LedgerError>;
}

#[derive(Clone, Debug, Default)]
pub struct ContractAddresses {
    pub token: Option<Address>,
    pub policy: Option<Address>,
    pub oracle: Option<Address>,
    pub emergency: Option<Address>,
}

/// `LedgerClient` backed by an alloy HTTP provider and the SecureMint contracts.
#[derive(Clone)]
pub struct AlloyLedger {
    provider: LedgerProvider,
    contracts: ContractAddresses,
    nonces: Option<NonceManager>,
    receipt_timeout: Duration,
    /// Nonce of every broadcast still awaiting its receipt, by tx hash.
    broadcasts: Arc<DashMap<String, u64>>,
}

fn rpc_err(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::from_rpc_message(&e.to_string())
}

impl AlloyLedger {
    /// `signer` is the address the provider's wallet signs for; `None` means read-only.
    pub fn new(
        provider: LedgerProvider,
        contracts: ContractAddresses,
        signer: Option<Address>,
        receipt_timeout: Duration,
    ) -> Self {
        let nonces = signer.map(|addr| NonceManager::new(provider.clone(), addr));
        Self {
            provider,
            contracts,
            nonces,
            receipt_timeout,
            broadcasts: Arc::new(DashMap::new()),
        }
    }

    fn token(&self) -> Result<IBackedToken::IBackedTokenInstance<LedgerProvider>, LedgerError> {
        let addr = self
            .contracts
            .token
            .ok_or_else(|| LedgerError::Fatal("Token contract not configured".into()))?;
        Ok(IBackedToken::new(addr, self.provider.clone()))
    }

    fn policy(
        &self,
    ) -> Result<ISecureMintPolicy::ISecureMintPolicyInstance<LedgerProvider>, LedgerError> {
        let addr = self
            .contracts
            .policy
            .ok_or_else(|| LedgerError::Fatal("Policy contract not configured".into()))?;
        Ok(ISecureMintPolicy::new(addr, self.provider.clone()))
    }

    fn oracle(&self) -> Result<IBackingOracle::IBackingOracleInstance<LedgerProvider>, LedgerError> {
        let addr = self
            .contracts
            .oracle
            .ok_or_else(|| LedgerError::Fatal("Oracle contract not configured".into()))?;
        Ok(IBackingOracle::new(addr, self.provider.clone()))
    }

    fn signer(&self) -> Result<&NonceManager, LedgerError> {
        self.nonces.as_ref().ok_or_else(|| {
            LedgerError::Fatal("No account configured - private key required for transactions".into())
        })
    }

    async fn latest_timestamp(&self) -> u64 {
        match self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
        {
            Ok(Some(block)) => block.header.timestamp,
            Ok(None) => current_unix(),
            Err(e) => {
                tracing::debug!(target: "ledger", error = %e, "Latest block lookup failed; using local clock");
                current_unix()
            }
        }
    }

    async fn await_receipt(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
    ) -> Result<Receipt, LedgerError> {
        let reference = format!("{:#x}", pending.tx_hash());
        let receipt = pending
            .with_required_confirmations(1)
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unconfirmed {
                reference: reference.clone(),
                reason: format!("receipt unavailable: {e}"),
            })?;
        self.broadcasts.remove(&reference);
        Ok(to_receipt(reference, &receipt))
    }

    async fn nonce_for(&self, replaces: Option<&str>) -> Result<u64, LedgerError> {
        let nonces = self.signer()?;
        match replaces {
            None => nonces.next_nonce().await,
            Some(previous) => match self.broadcasts.get(previous).map(|n| *n) {
                Some(nonce) => Ok(nonce),
                None => nonces.confirmed_nonce().await,
            },
        }
    }

    async fn send(
        &self,
        mut tx: TransactionRequest,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let nonce = self.nonce_for(replaces).await?;
        tx.set_nonce(nonce);
        if replaces.is_some() {
            // Nodes only accept a same-nonce replacement that pays more.
            let fees = self.provider.estimate_eip1559_fees().await.map_err(rpc_err)?;
            tx.set_max_fee_per_gas(bump_fee(fees.max_fee_per_gas));
            tx.set_max_priority_fee_per_gas(bump_fee(fees.max_priority_fee_per_gas));
        }
        let pending = self.provider.send_transaction(tx).await.map_err(rpc_err)?;
        let reference = format!("{:#x}", pending.tx_hash());
        if let Some(previous) = replaces {
            self.broadcasts.remove(previous);
        }
        self.broadcasts.insert(reference.clone(), nonce);
        tracing::debug!(
            target: "ledger",
            tx = %reference,
            nonce,
            replaces = replaces.unwrap_or("-"),
            "Transaction broadcast"
        );
        self.await_receipt(pending).await
    }
}

fn bump_fee(fee: u128) -> u128 {
    let bump = (fee.saturating_mul(REPLACEMENT_FEE_BUMP_PERCENT) / 100).max(1);
    fee.saturating_add(bump)
}

fn to_receipt(reference: String, receipt: &impl ReceiptResponse) -> Receipt {
    let status = if receipt.status() {
        ReceiptStatus::Success
    } else {
        ReceiptStatus::Failed
    };
    Receipt {
        status,
        reference,
        gas_used: receipt.gas_used(),
    }
}

#[async_trait]
impl LedgerClient for AlloyLedger {
    async fn total_supply(&self) -> Result<U256, LedgerError> {
        self.token()?.totalSupply().call().await.map_err(rpc_err)
    }

    async fn backing(&self) -> Result<U256, LedgerError> {
        self.oracle()?.getLatestBacking().call().await.map_err(rpc_err)
    }

    async fn balance_of(&self, account: Address) -> Result<U256, LedgerError> {
        self.token()?.balanceOf(account).call().await.map_err(rpc_err)
    }

    async fn epoch_state(&self) -> Result<Option<EpochState>, LedgerError> {
        if self.contracts.policy.is_none() {
            return Ok(None);
        }
        let policy = self.policy()?;
        let minted_call = policy.epochMintedAmount();
        let capacity_call = policy.epochCapacity();
        let (minted, capacity) = tokio::try_join!(
            async { minted_call.call().await.map_err(rpc_err) },
            async { capacity_call.call().await.map_err(rpc_err) },
        )?;
        Ok(Some(EpochState { minted, capacity }))
    }

    async fn oracle_status(&self) -> Result<OracleStatus, LedgerError> {
        let oracle = self.oracle()?;
        let last_call = oracle.lastUpdateTimestamp();
        let threshold_call = oracle.stalenessThreshold();
        let (last_update, threshold) = tokio::try_join!(
            async { last_call.call().await.map_err(rpc_err) },
            async { threshold_call.call().await.map_err(rpc_err) },
        )?;
        Ok(OracleStatus {
            last_update: last_update.saturating_to::<u64>(),
            staleness_threshold: threshold.saturating_to::<u64>(),
            observed_at: self.latest_timestamp().await,
        })
    }

    async fn emergency_level(&self) -> Result<Option<u8>, LedgerError> {
        let Some(addr) = self.contracts.emergency else {
            return Ok(None);
        };
        let level = IEmergencyPause::new(addr, self.provider.clone())
            .currentLevel()
            .call()
            .await
            .map_err(rpc_err)?;
        Ok(Some(level))
    }

    async fn simulate(&self, request: &Request) -> Result<u64, LedgerError> {
        // Read-only deployments simulate from the zero address.
        let from = self
            .nonces
            .as_ref()
            .map(NonceManager::address)
            .unwrap_or(Address::ZERO);
        match request {
            Request::Mint {
                recipient, amount, ..
            } => {
                let policy = self.policy()?;
                let call = policy.mint(*recipient, *amount).from(from);
                call.call().await.map_err(rpc_err)?;
                call.estimate_gas().await.map_err(rpc_err)
            }
            Request::Burn { amount, .. } => {
                let token = self.token()?;
                let call = token.burn(*amount).from(from);
                call.call().await.map_err(rpc_err)?;
                call.estimate_gas().await.map_err(rpc_err)
            }
        }
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        let hash: B256 = reference
            .parse()
            .map_err(|_| LedgerError::Rejected(format!("not a transaction hash: {reference}")))?;
        let found = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_err)?;
        Ok(found.map(|receipt| {
            self.broadcasts.remove(reference);
            to_receipt(reference.to_string(), &receipt)
        }))
    }

    async fn submit_mint(
        &self,
        recipient: Address,
        amount: U256,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let tx = self
            .policy()?
            .mint(recipient, amount)
            .into_transaction_request();
        self.send(tx, replaces).await
    }

    async fn submit_burn(
        &self,
        amount: U256,
        replaces: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        let tx = self.token()?.burn(amount).into_transaction_request();
        self.send(tx, replaces).await
    }
}
