// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use crate::common::retry::RetryPolicy;
use crate::domain::compliance::RiskLevel;
use crate::domain::constants;
use crate::domain::error::AppError;
use crate::network::ledger::ContractAddresses;
use crate::services::batch::ExecutionParams;
use alloy::primitives::Address;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalSettings {
    // General
    #[serde(default = "default_debug")]
    pub debug: bool,
    #[serde(default = "default_false")]
    pub log_json: bool,

    // Ledger
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// When set, the connected node must report this chain id.
    pub chain_id: Option<u64>,
    /// Absent means read-only: validation and dry runs work, writes are refused.
    pub wallet_key: Option<String>,
    pub token_address: Option<Address>,
    pub policy_address: Option<Address>,
    pub oracle_address: Option<Address>,
    pub emergency_address: Option<Address>,

    // Execution
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
    #[serde(default = "default_snapshot_max_age_secs")]
    pub snapshot_max_age_secs: u64,
    #[serde(default = "default_false")]
    pub simulate_before_submit: bool,

    // Compliance
    pub sanctions_path: Option<String>,
    #[serde(default = "default_risk_block_level")]
    pub risk_block_level: RiskLevel,

    /// File the settings were read from, if any.
    #[serde(skip)]
    pub config_file: Option<String>,
}

fn default_debug() -> bool {
    false
}
fn default_false() -> bool {
    false
}
fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_batch_size() -> usize {
    constants::DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    constants::DEFAULT_MAX_RETRIES
}
fn default_pacing_ms() -> u64 {
    constants::DEFAULT_PACING_MS
}
fn default_backoff_base_ms() -> u64 {
    constants::DEFAULT_BACKOFF_BASE_MS
}
fn default_backoff_multiplier() -> u32 {
    constants::DEFAULT_BACKOFF_MULTIPLIER
}
fn default_read_concurrency() -> usize {
    constants::DEFAULT_READ_CONCURRENCY
}
fn default_receipt_timeout_ms() -> u64 {
    constants::DEFAULT_RECEIPT_TIMEOUT_MS
}
fn default_snapshot_max_age_secs() -> u64 {
    constants::DEFAULT_SNAPSHOT_MAX_AGE_SECS
}
fn default_risk_block_level() -> RiskLevel {
    RiskLevel::Blocked
}

impl GlobalSettings {
    pub fn load_with_path(path: Option<&str>) -> Result<Self, AppError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let selected_config = resolve_config_path(path);
        let mut builder = Config::builder();

        if let Some(ref selected_path) = selected_config {
            builder = builder.add_source(File::from(Path::new(selected_path)).required(true));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }
        // Precedence: CLI (in main) > env/.env > config file.
        builder = builder.add_source(Environment::default());

        let mut settings: GlobalSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        settings.config_file = selected_config;
        Ok(settings)
    }

    /// Settings load before the subscriber exists, so the summary is logged separately.
    pub fn log_summary(&self) {
        tracing::debug!(
            target: "config",
            file = self.config_file.as_deref().unwrap_or("config"),
            rpc = %self.rpc_url,
            batch_size = self.batch_size,
            max_retries = self.max_retries,
            signer = self.wallet_key().is_some(),
            "Settings loaded"
        );
    }

    pub fn load() -> Result<Self, AppError> {
        Self::load_with_path(None)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(AppError::Config("max_retries must be at least 1".into()));
        }
        if self.read_concurrency == 0 {
            return Err(AppError::Config("read_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn wallet_key(&self) -> Option<&str> {
        self.wallet_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn contract_addresses(&self) -> ContractAddresses {
        ContractAddresses {
            token: self.token_address,
            policy: self.policy_address,
            oracle: self.oracle_address,
            emergency: self.emergency_address,
        }
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms.max(1_000))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_multiplier,
        )
    }

    pub fn execution_params(&self, dry_run: bool, force: bool) -> ExecutionParams {
        ExecutionParams {
            batch_size: self.batch_size,
            retry: self.retry_policy(),
            pacing: Duration::from_millis(self.pacing_ms),
            dry_run,
            force,
            simulate_before_submit: self.simulate_before_submit,
            read_concurrency: self.read_concurrency,
            snapshot_max_age: Duration::from_secs(self.snapshot_max_age_secs),
        }
    }
}

fn resolve_config_path(path: Option<&str>) -> Option<String> {
    if let Some(path) = path {
        return Some(path.to_string());
    }
    detect_active_config_file()
}

fn detect_active_config_file() -> Option<String> {
    let priority_files = ["config.prod.toml", "config.dev.toml", "config.toml"];

    for file in priority_files.iter() {
        if let Some(true) = config_has_active_flag(file) {
            return Some((*file).to_string());
        }
    }

    // Fallback: scan current dir for config.*.toml with THIS_ACTIVE = true
    if let Ok(entries) = fs::read_dir(".") {
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && name.starts_with("config.")
                && name.ends_with(".toml")
                && let Some(true) = config_has_active_flag(name)
            {
                return Some(name.to_string());
            }
        }
    }

    None
}

fn config_has_active_flag(path: &str) -> Option<bool> {
    let p = Path::new(path);
    if !p.exists() {
        return None;
    }

    Config::builder()
        .add_source(File::from(p))
        .build()
        .ok()?
        .get_bool("THIS_ACTIVE")
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn write_config(name: &str, body: &str) -> String {
        let path = std::env::temp_dir().join(format!("{name}-{}.toml", std::process::id()));
        fs::write(&path, body).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let _guard = env_lock_guard();
        let path = write_config("securemint-empty", "");
        let settings = GlobalSettings::load_with_path(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.pacing_ms, 1_000);
        assert_eq!(settings.risk_block_level, RiskLevel::Blocked);
        assert!(settings.wallet_key().is_none());
        assert!(!settings.simulate_before_submit);
    }

    #[test]
    fn file_values_flow_into_execution_params() {
        let _guard = env_lock_guard();
        let path = write_config(
            "securemint-values",
            r#"
batch_size = 10
max_retries = 5
pacing_ms = 250
backoff_base_ms = 100
simulate_before_submit = true
risk_block_level = "severe"
token_address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1111"
"#,
        );
        let settings = GlobalSettings::load_with_path(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        let params = settings.execution_params(true, false);
        assert_eq!(params.batch_size, 10);
        assert_eq!(params.retry.max_attempts, 5);
        assert_eq!(params.retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(params.pacing, Duration::from_millis(250));
        assert!(params.dry_run);
        assert!(!params.force);
        assert!(params.simulate_before_submit);
        assert_eq!(settings.risk_block_level, RiskLevel::Severe);
        assert!(settings.contract_addresses().token.is_some());
        assert!(settings.contract_addresses().policy.is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let _guard = env_lock_guard();
        let path = write_config("securemint-zero", "batch_size = 0\n");
        let err = GlobalSettings::load_with_path(Some(&path)).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("batch_size")));
    }

    #[test]
    fn zero_retries_is_rejected() {
        let _guard = env_lock_guard();
        let path = write_config("securemint-noretry", "max_retries = 0\n");
        let err = GlobalSettings::load_with_path(Some(&path)).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("max_retries")));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn settings_summary_reaches_the_installed_subscriber() {
        let _guard = env_lock_guard();
        let path = write_config("securemint-summary", "batch_size = 7\n");
        let settings = GlobalSettings::load_with_path(Some(&path)).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(settings.config_file.as_deref(), Some(path.as_str()));

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || settings.log_summary());

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("Settings loaded"), "{out}");
        assert!(out.contains("batch_size=7"), "{out}");
    }

    #[test]
    fn blank_wallet_key_means_read_only() {
        let _guard = env_lock_guard();
        let path = write_config("securemint-blank-key", "wallet_key = \"  \"\n");
        let settings = GlobalSettings::load_with_path(Some(&path)).unwrap();
        fs::remove_file(&path).ok();
        assert!(settings.wallet_key().is_none());
    }
}
