// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed to endpoint: {0}")]
    Connection(String),

    #[error("Transaction failed: {reference:?}, reason: {reason}")]
    Transaction { reference: String, reason: String },

    #[error("Validation failed for field {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invariant violated: {}", .0.join(", "))]
    InvariantViolation(Vec<String>),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation {
            field: "input".into(),
            message: err.to_string(),
        }
    }
}

/// Failure reported by a ledger read, simulation or write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network, timeout or temporary RPC failure.
    #[error("transient ledger error: {0}")]
    Transient(String),

    /// Broadcast, but no receipt was observed in time. The transaction may
    /// still be mined, so it must be looked up before anything is resent.
    #[error("transaction {reference} unconfirmed: {reason}")]
    Unconfirmed { reference: String, reason: String },

    /// The call reverted (or would revert).
    #[error("reverted: {0}")]
    Reverted(String),

    /// The node refused the transaction for a reason a resubmission will not fix.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Missing credentials or contract addresses. Never retried.
    #[error("ledger not configured: {0}")]
    Fatal(String),
}

impl LedgerError {
    /// Classifies a raw RPC/transport error message.
    pub fn from_rpc_message(msg: &str) -> Self {
        let lower = msg.to_lowercase();

        if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
            Self::Rejected(msg.to_string())
        } else if lower.contains("execution reverted") || lower.contains("revert") {
            Self::Reverted(msg.to_string())
        } else {
            Self::Transient(msg.to_string())
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Whether an error may be resolved by trying again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unconfirmed { .. })
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Fatal(msg) => AppError::Config(msg),
            LedgerError::Transient(msg) => AppError::Connection(msg),
            LedgerError::Unconfirmed { reference, reason } => AppError::Transaction {
                reference,
                reason: format!("unconfirmed: {reason}"),
            },
            other => AppError::Transaction {
                reference: String::new(),
                reason: other.to_string(),
            },
        }
    }
}
