// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::domain::error::AppError;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Risk classification with a total order: `Low < Medium < High < Severe < Blocked`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Severe,
    Blocked,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Severe => "severe",
            RiskLevel::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScreeningResult {
    pub address: Address,
    pub risk_level: RiskLevel,
    pub alerts: Vec<String>,
}

impl ScreeningResult {
    pub fn clear(address: Address) -> Self {
        Self {
            address,
            risk_level: RiskLevel::Low,
            alerts: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct SanctionsFile {
    #[serde(default)]
    addresses: Vec<String>,
}

/// Immutable set of sanctioned addresses.
#[derive(Clone, Debug, Default)]
pub struct SanctionsList {
    addresses: HashSet<Address>,
}

impl SanctionsList {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    /// Load `{"addresses": ["0x..", ...]}`. Malformed entries are skipped with a warning.
    pub fn load_from_file(path: &str) -> Result<Self, AppError> {
        let p = Path::new(path);
        if !p.exists() {
            return Err(AppError::Config(format!("Sanctions list not found: {}", path)));
        }
        let raw = fs::read_to_string(p)
            .map_err(|e| AppError::Config(format!("Failed to read sanctions {}: {e}", path)))?;
        let file: SanctionsFile = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Failed to parse sanctions {}: {e}", path)))?;

        let mut addresses = HashSet::with_capacity(file.addresses.len());
        for entry in file.addresses {
            match crate::common::parsing::parse_address_strict(&entry) {
                Some(addr) => {
                    addresses.insert(addr);
                }
                None => {
                    tracing::warn!(target: "screening", entry = %entry, "Skipping malformed sanctions entry");
                }
            }
        }
        tracing::info!(target: "screening", path, count = addresses.len(), "Loaded sanctions list");
        Ok(Self { addresses })
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
