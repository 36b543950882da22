// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

use crate::common::error::AppError;
use crate::domain::compliance::{RiskLevel, SanctionsList, ScreeningResult};
use alloy::primitives::Address;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Black-box address risk scoring.
#[async_trait]
pub trait RiskScreener: Send + Sync {
    async fn screen(&self, address: Address) -> Result<ScreeningResult, AppError>;
}

/// Screens against a fixed sanctions list. Matches are `Blocked`, everything else `Low`.
#[derive(Clone, Debug)]
pub struct SanctionsScreener {
    list: Arc<SanctionsList>,
    source: Option<String>,
}

impl SanctionsScreener {
    pub fn new(list: SanctionsList) -> Self {
        Self {
            list: Arc::new(list),
            source: None,
        }
    }

    pub fn from_file(path: &str) -> Result<Self, AppError> {
        Ok(Self {
            list: Arc::new(SanctionsList::load_from_file(path)?),
            source: Some(path.to_string()),
        })
    }

    /// Re-reads the source file into a new screener; `self` is left untouched.
    pub fn reload(&self) -> Result<Self, AppError> {
        match &self.source {
            Some(path) => Self::from_file(path),
            None => Err(AppError::Config(
                "Sanctions screener has no source file to reload".into(),
            )),
        }
    }

    pub fn list(&self) -> &SanctionsList {
        &self.list
    }
}

#[async_trait]
impl RiskScreener for SanctionsScreener {
    async fn screen(&self, address: Address) -> Result<ScreeningResult, AppError> {
        if self.list.contains(&address) {
            return Ok(ScreeningResult {
                address,
                risk_level: RiskLevel::Blocked,
                alerts: vec!["address is on the sanctions list".into()],
            });
        }
        Ok(ScreeningResult::clear(address))
    }
}

/// Screens `addresses` with at most `concurrency` lookups in flight. Results keep input order.
pub async fn screen_all(
    screener: &dyn RiskScreener,
    addresses: &[Address],
    concurrency: usize,
) -> Vec<(Address, Result<ScreeningResult, AppError>)> {
    stream::iter(addresses.iter().copied())
        .map(|address| async move { (address, screener.screen(address).await) })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    /// Clears every address, recording how many lookups overlap.
    #[derive(Default)]
    struct CountingScreener {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RiskScreener for CountingScreener {
        async fn screen(&self, address: Address) -> Result<ScreeningResult, AppError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ScreeningResult::clear(address))
        }
    }

    #[tokio::test]
    async fn sanctioned_address_is_blocked() {
        let screener = SanctionsScreener::new(SanctionsList::new([addr(0xbb)]));
        let hit = screener.screen(addr(0xbb)).await.unwrap();
        assert_eq!(hit.risk_level, RiskLevel::Blocked);
        assert_eq!(hit.alerts.len(), 1);

        let miss = screener.screen(addr(0xaa)).await.unwrap();
        assert_eq!(miss, ScreeningResult::clear(addr(0xaa)));
    }

    #[tokio::test]
    async fn screen_all_preserves_order() {
        let screener = SanctionsScreener::new(SanctionsList::new([addr(2)]));
        let addresses: Vec<_> = (1..=5).map(addr).collect();
        let results = screen_all(&screener, &addresses, 2).await;
        let levels: Vec<_> = results
            .iter()
            .map(|(a, r)| (*a, r.as_ref().unwrap().risk_level))
            .collect();
        assert_eq!(
            levels,
            vec![
                (addr(1), RiskLevel::Low),
                (addr(2), RiskLevel::Blocked),
                (addr(3), RiskLevel::Low),
                (addr(4), RiskLevel::Low),
                (addr(5), RiskLevel::Low),
            ]
        );
    }

    #[tokio::test]
    async fn screen_all_bounds_lookups_in_flight() {
        let screener = CountingScreener::default();
        let addresses: Vec<_> = (1..=30).map(addr).collect();
        let results = screen_all(&screener, &addresses, 5).await;

        assert_eq!(results.len(), 30);
        let peak = screener.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "lookups ran one at a time");
        assert!(peak <= 5, "peak {peak} exceeded the limit");
    }

    #[test]
    fn reload_requires_a_source_file() {
        let screener = SanctionsScreener::new(SanctionsList::default());
        assert!(matches!(screener.reload(), Err(AppError::Config(_))));
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let path = std::env::temp_dir().join(format!("screener-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"addresses":[]}"#).unwrap();
        let first = SanctionsScreener::from_file(path.to_str().unwrap()).unwrap();
        assert!(first.list().is_empty());

        std::fs::write(
            &path,
            r#"{"addresses":["0x0202020202020202020202020202020202020202"]}"#,
        )
        .unwrap();
        let second = first.reload().unwrap();
        std::fs::remove_file(&path).ok();

        assert!(first.list().is_empty());
        assert!(second.list().contains(&addr(2)));
    }
}
