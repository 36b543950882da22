// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::common::error::AppError;
use alloy::network::{Ethereum, EthereumWallet};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use url::Url;

pub type LedgerProvider = DynProvider<Ethereum>;

pub struct ConnectionFactory;

impl ConnectionFactory {
    fn parse_url(rpc_url: &str) -> Result<Url, AppError> {
        Url::parse(rpc_url).map_err(|e| AppError::Config(format!("Invalid RPC URL: {}", e)))
    }

    /// Read-only HTTP provider.
    pub fn http(rpc_url: &str) -> Result<LedgerProvider, AppError> {
        let url = Self::parse_url(rpc_url)?;
        Ok(ProviderBuilder::new().connect_http(url).erased())
    }

    /// HTTP provider that signs writes with `signer`.
    pub fn signing(rpc_url: &str, signer: PrivateKeySigner) -> Result<LedgerProvider, AppError> {
        let url = Self::parse_url(rpc_url)?;
        let wallet = EthereumWallet::from(signer);
        Ok(ProviderBuilder::new().wallet(wallet).connect_http(url).erased())
    }

    pub fn signer_from_key(key: &str) -> Result<PrivateKeySigner, AppError> {
        PrivateKeySigner::from_str(key.trim())
            .map_err(|e| AppError::Config(format!("Invalid wallet key: {}", e)))
    }
}
