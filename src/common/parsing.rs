// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::domain::constants::{ADDRESS_HEX_LEN, TOKEN_DECIMALS};
use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};

/// Strict address parse: `0x` followed by exactly 40 hex characters.
/// Checksum casing is not enforced.
pub fn parse_address_strict(s: &str) -> Option<Address> {
    let raw = s.trim();
    let body = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if body.len() != ADDRESS_HEX_LEN || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let bytes = hex::decode(body).ok()?;
    Some(Address::from_slice(&bytes))
}

/// Render a base-unit amount in whole tokens, e.g. `1500000` -> `1.5`.
pub fn format_token_amount(amount: U256) -> String {
    match format_units(amount, TOKEN_DECIMALS) {
        Ok(s) => {
            let trimmed = s.trim_end_matches('0').trim_end_matches('.');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => amount.to_string(),
    }
}
