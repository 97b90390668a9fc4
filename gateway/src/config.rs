// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Gateway configuration. Loaded the same way as every other binary
//! (`oracle_common::config::ConfigExt`): a YAML file merged with `ORACLE_` prefixed environment
//! variables via `figment`. The flat env-var names the spec documents (`HELIUS_API_KEY`,
//! `TOKEN_MINT`, `PORT`, `CORS_ORIGINS`, `ADMIN_KEY`, ...) map onto the fields below, nested under
//! this struct the way every other layered config in this workspace is nested rather than flat.

use oracle_common::domain::{Address, Amount, KCalculatorConfig, Timestamp};
use scorer::ecosystem::EcosystemConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_address")]
    pub address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_body_limit_bytes")]
    pub request_body_limit_bytes: u64,

    /// Allow-listed CORS origins; entries may contain a single leading `*` wildcard segment
    /// (e.g. `https://*.example.com`). Empty means same-origin/no-`Origin`-header requests only.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    pub admin_key: SecretString,

    /// Enables HSTS and the `X-Forwarded-Proto` HTTPS redirect.
    #[serde(default)]
    pub production: bool,

    /// Serves 503 with a `maintenance` flag on dashboard reads instead of computing live data.
    #[serde(default)]
    pub maintenance: bool,

    pub token: TokenConfig,

    /// Verifies the `X-Helius-Signature` header on `POST /k-metric/webhook`. `HELIUS_API_KEY`
    /// itself is Chain Adapter config, not Gateway's — only the webhook secret crosses this
    /// boundary.
    pub helius_webhook_secret: SecretString,

    #[serde(default)]
    pub k_global: KGlobalConfig,

    #[serde(default = "default_connection_cap")]
    pub ws_connection_cap: usize,

    /// Mint-suffix admission list shared with the Wallet/Token Scorers; gates `POST
    /// /api/v1/tokens` and `GET /api/v1/token/:mint` before either ever reaches the scorer.
    #[serde(default)]
    pub ecosystem: EcosystemConfig,

    #[serde(default)]
    pub backup: BackupConfig,
}

/// Where `POST /k-metric/backup` (and the standalone binary's scheduled ticker) write snapshot
/// files, and how many to keep.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,

    #[serde(default = "default_backup_retention")]
    pub retention: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig { dir: default_backup_dir(), retention: default_backup_retention() }
    }
}

fn default_backup_dir() -> String {
    "backups".to_owned()
}

fn default_backup_retention() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub mint: Address,
    pub symbol: String,
    pub decimals: u8,
    pub launch_ts: Timestamp,

    #[serde(default = "default_og_early_window_secs")]
    pub og_early_window_secs: i64,

    #[serde(default = "default_og_hold_threshold_secs")]
    pub og_hold_threshold_secs: i64,

    /// Fallback minimum raw balance, used until a USD-derived threshold has been computed.
    pub min_balance: Amount,
}

impl TokenConfig {
    pub fn k_calculator(&self) -> KCalculatorConfig {
        KCalculatorConfig {
            launch_ts: self.launch_ts,
            og_early_window_secs: self.og_early_window_secs,
            og_hold_threshold_secs: self.og_hold_threshold_secs,
        }
    }
}

/// Governs the gated `GET /k-metric/wallet/:addr/k-global` endpoint: cross-token K for an
/// arbitrary wallet is expensive (it walks transfer history across every token the wallet has
/// touched), so by default it's only available to the admin key or to holders of the primary
/// token, and fails closed on any Store/Chain Adapter error during that check.
#[derive(Debug, Clone, Deserialize)]
pub struct KGlobalConfig {
    #[serde(default)]
    pub gated: bool,

    #[serde(default)]
    pub min_balance: Amount,

    #[serde(default = "default_true")]
    pub fail_closed: bool,
}

impl Default for KGlobalConfig {
    fn default() -> Self {
        KGlobalConfig { gated: false, min_balance: Amount::ZERO, fail_closed: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_address() -> IpAddr {
    [0, 0, 0, 0].into()
}

fn default_port() -> u16 {
    8080
}

fn default_request_body_limit_bytes() -> u64 {
    1024 * 1024
}

fn default_og_early_window_secs() -> i64 {
    7 * 24 * 3_600
}

fn default_og_hold_threshold_secs() -> i64 {
    30 * 24 * 3_600
}

fn default_connection_cap() -> usize {
    fanout::websocket::DEFAULT_CONNECTION_CAP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_global_defaults_are_fail_closed_and_ungated() {
        let config = KGlobalConfig::default();
        assert!(!config.gated);
        assert!(config.fail_closed);
    }
}
