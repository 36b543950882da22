// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

/// Hex characters in an encoded 20-byte address, excluding the `0x` prefix.
pub const ADDRESS_HEX_LEN: usize = 40;

// =============================================================================
// BATCH EXECUTION DEFAULTS
// =============================================================================

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PACING_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Upper bound on concurrent read-only lookups (balances, screening).
pub const DEFAULT_READ_CONCURRENCY: usize = 50;

pub const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 300_000;

/// Pre-flight snapshots older than this are re-captured before any write.
pub const DEFAULT_SNAPSHOT_MAX_AGE_SECS: u64 = 60;

// =============================================================================
// GAS ESTIMATES
// =============================================================================

pub const DEFAULT_GAS_PER_TX: u64 = 100_000;
pub const DEFAULT_GAS_PRICE_GWEI: f64 = 30.0;

/// Fee increase for a same-nonce replacement; geth requires at least 10%.
pub const REPLACEMENT_FEE_BUMP_PERCENT: u128 = 25;

// Token amounts are reported in whole units with six decimals.
pub const TOKEN_DECIMALS: u8 = 6;
