// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Transport crates that are chatty below info.
const QUIET_MODULES: &[&str] = &[
    "h2",
    "hyper",
    "hyper_util",
    "reqwest",
    "alloy_transport_http",
    "alloy_rpc_client",
    "alloy_provider",
];

/// Build the filter directive for `log_level`.
///
/// A bare level (e.g. "debug") gets the quiet-module defaults appended;
/// directive strings containing ',' or '=' are used as-is.
pub fn filter_spec(log_level: &str) -> String {
    let normalized = log_level.trim();
    if normalized.contains(',') || normalized.contains('=') {
        return normalized.to_string();
    }
    let base = if normalized.is_empty() { "info" } else { normalized };
    let quiet = QUIET_MODULES
        .iter()
        .map(|m| format!("{m}=info"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{base},{quiet}")
}

/// Install the global subscriber. A second call is a no-op.
pub fn setup_logging(log_level: &str, json_format: bool) {
    let spec = filter_spec(log_level);
    let filter = EnvFilter::from_str(&spec).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = if json_format {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false);
        subscriber.with(json_layer).try_init().is_ok()
    } else {
        let fmt_layer = fmt::layer().with_target(true).compact();
        subscriber.with(fmt_layer).try_init().is_ok()
    };

    if installed {
        tracing::info!(
            target: "config",
            filter = %spec,
            format = if json_format { "json" } else { "compact" },
            "Logging initialized"
        );
    }
}
