// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@mitander.dev>

use regex::Regex;
use std::fs;
use std::path::Path;

const CONFIG_FILES: [&str; 4] = [
    "config.toml",
    "config.prod.toml",
    "config.dev.toml",
    "config.example.toml",
];

/// Fail CI if config files contain 64-hex private keys.
#[test]
fn no_committed_hex_keys_in_configs() {
    let re = Regex::new(r"0x?[a-fA-F0-9]{64}").unwrap();
    for file in CONFIG_FILES {
        if !Path::new(file).exists() {
            continue;
        }
        let body = fs::read_to_string(file).expect("read config");
        for (idx, line) in body.lines().enumerate() {
            if re.is_match(line) {
                panic!("Secret-looking hex in {} at line {}", file, idx + 1);
            }
        }
    }
}

/// The signing key belongs in the environment, never in a checked-in file.
#[test]
fn wallet_key_is_never_assigned_in_configs() {
    let re = Regex::new(r#"(?m)^\s*wallet_key\s*=\s*"[^"]+""#).unwrap();
    for file in CONFIG_FILES {
        if !Path::new(file).exists() {
            continue;
        }
        let body = fs::read_to_string(file).expect("read config");
        assert!(!re.is_match(&body), "wallet_key set in {file}");
    }
}

#[test]
fn example_config_loads_with_defaults() {
    let body = fs::read_to_string("config.example.toml").expect("read example config");
    for key in ["rpc_url", "batch_size", "max_retries", "pacing_ms", "backoff_base_ms"] {
        assert!(body.contains(key), "config.example.toml missing {key}");
    }
}
