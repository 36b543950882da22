// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use alloy::providers::Provider;
use clap::{Args, Parser, Subcommand};
use securemint_engine::app::config::GlobalSettings;
use securemint_engine::app::logging::setup_logging;
use securemint_engine::common::constants::{DEFAULT_GAS_PER_TX, DEFAULT_GAS_PRICE_GWEI};
use securemint_engine::domain::error::AppError;
use securemint_engine::domain::request::{RequestKind, load_requests_json};
use securemint_engine::network::ledger::{AlloyLedger, LedgerClient};
use securemint_engine::network::provider::ConnectionFactory;
use securemint_engine::services::batch::{
    BulkOperator, RunOutcome, SanctionsScreener, TracingProgress, estimate_gas_cost,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Invariant-gated batch mint/burn")]
struct Cli {
    /// Path to config file (default: config.{toml,yaml,...})
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint to every recipient in the input file
    Mint(RunArgs),
    /// Burn every amount in the input file
    Burn(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON array of requests, or an object with a `requests` array
    #[arg(long)]
    input: String,

    /// Simulate only; nothing is submitted
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Proceed past validation errors and invariant violations (recorded for audit)
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Batch size (overrides config/env)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Attempts per request (overrides config/env)
    #[arg(long)]
    retries: Option<u32>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<String>,
}

async fn connect(settings: &GlobalSettings) -> Result<Arc<dyn LedgerClient>, AppError> {
    let (provider, signer) = match settings.wallet_key() {
        Some(key) => {
            let signer = ConnectionFactory::signer_from_key(key)?;
            let address = signer.address();
            (ConnectionFactory::signing(&settings.rpc_url, signer)?, Some(address))
        }
        None => {
            tracing::warn!(target: "config", "No wallet_key configured; writes will be refused");
            (ConnectionFactory::http(&settings.rpc_url)?, None)
        }
    };

    if let Some(expected) = settings.chain_id {
        let actual = provider
            .get_chain_id()
            .await
            .map_err(|e| AppError::Connection(format!("chain_id lookup failed: {e}")))?;
        if actual != expected {
            return Err(AppError::Config(format!(
                "RPC reports chain {actual}, config expects {expected}"
            )));
        }
    }

    tracing::info!(
        target: "config",
        rpc = %settings.rpc_url,
        signer = ?signer,
        "Ledger connection ready"
    );
    Ok(Arc::new(AlloyLedger::new(
        provider,
        settings.contract_addresses(),
        signer,
        settings.receipt_timeout(),
    )))
}

fn write_output<T: Serialize>(path: Option<&str>, value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("report serialization failed: {e}"))?;
    match path {
        Some(path) => {
            std::fs::write(path, body)
                .map_err(|e| anyhow::anyhow!("failed to write report to {path}: {e}"))?;
            tracing::info!(target: "engine", path, "Report written");
        }
        None => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let mut settings = GlobalSettings::load_with_path(cli.config.as_deref())?;
    setup_logging(
        if settings.debug { "debug" } else { "info" },
        settings.log_json,
    );
    settings.log_summary();

    let (kind, args) = match cli.command {
        Command::Mint(args) => (RequestKind::Mint, args),
        Command::Burn(args) => (RequestKind::Burn, args),
    };
    if let Some(batch_size) = args.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(retries) = args.retries {
        settings.max_retries = retries;
    }
    settings.validate()?;

    let rows = load_requests_json(&args.input, Some(kind))?;
    let estimate = estimate_gas_cost(rows.len(), DEFAULT_GAS_PER_TX, DEFAULT_GAS_PRICE_GWEI);
    tracing::info!(
        target: "engine",
        op = %kind,
        rows = rows.len(),
        input = %args.input,
        dry_run = args.dry_run,
        force = args.force,
        est_gas = estimate.total_gas,
        est_cost_eth = estimate.estimated_cost_eth,
        "Loaded requests"
    );

    let ledger = connect(&settings).await?;

    let cancel = CancellationToken::new();
    {
        let cancel_on_ctrlc = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(target: "engine", "Ctrl+C received; stopping after the current request");
                cancel_on_ctrlc.cancel();
            }
        });
    }

    let mut operator = BulkOperator::new(ledger, settings.execution_params(args.dry_run, args.force))
        .with_observer(Arc::new(TracingProgress))
        .with_cancellation(cancel);
    if let Some(path) = settings.sanctions_path.as_deref() {
        operator = operator.with_screener(
            Arc::new(SanctionsScreener::from_file(path)?),
            settings.risk_block_level,
        );
    }

    match operator.run(&rows).await? {
        RunOutcome::Refused(refusal) => {
            for reason in &refusal.reasons {
                tracing::error!(target: "engine", reason = %reason, "Blocking finding");
            }
            write_output(args.output.as_deref(), &refusal)?;
            let violations = refusal.invariants.violations();
            if violations.is_empty() {
                Err(AppError::Validation {
                    field: "requests".into(),
                    message: format!(
                        "{} blocking error(s); rerun with --force to override",
                        refusal.validation.errors.len()
                    ),
                })
            } else {
                Err(AppError::InvariantViolation(violations))
            }
        }
        RunOutcome::Completed(report) => {
            write_output(args.output.as_deref(), &report)?;
            report.exit_status()
        }
    }
}
