// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::error::LedgerError;
use crate::common::retry::{RetryPolicy, retry_async};
use crate::network::provider::LedgerProvider;
use alloy::primitives::Address;
use alloy::providers::Provider;
use std::time::Duration;

/// Reads the signer's nonce.
///
/// Nothing is cached: a transaction that failed but was mined still consumes a
/// nonce, so every fresh submission reads a new pending value. Replacements of
/// a still-unconfirmed transaction reuse the nonce it was sent with.
#[derive(Clone)]
pub struct NonceManager {
    provider: LedgerProvider,
    address: Address,
    policy: RetryPolicy,
}

impl NonceManager {
    pub fn new(provider: LedgerProvider, address: Address) -> Self {
        Self {
            provider,
            address,
            policy: RetryPolicy::new(3, Duration::from_millis(100), 2),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Next nonce counting transactions still in the mempool.
    pub async fn next_nonce(&self) -> Result<u64, LedgerError> {
        self.fetch(true).await
    }

    /// Lowest nonce not yet mined. Sending with it replaces whatever is pending there.
    pub async fn confirmed_nonce(&self) -> Result<u64, LedgerError> {
        self.fetch(false).await
    }

    async fn fetch(&self, pending: bool) -> Result<u64, LedgerError> {
        let provider = self.provider.clone();
        let address = self.address;
        let nonce = retry_async(
            move |_| {
                let provider = provider.clone();
                async move {
                    let count = provider.get_transaction_count(address);
                    if pending {
                        count.pending().await
                    } else {
                        count.latest().await
                    }
                }
            },
            &self.policy,
        )
        .await
        .map_err(|e| LedgerError::Transient(format!("Failed to fetch nonce: {}", e)))?;

        tracing::debug!(target: "ledger", address = %address, nonce, pending, "Fetched nonce");
        Ok(nonce)
    }
}
