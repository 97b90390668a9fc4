// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Top-level configuration: one `Config` struct nesting every component's own config, loaded in
//! one `ConfigExt::load()` call the way `spo-api::config::Config` nests `application_config`,
//! `infra_config`, and `telemetry_config` under one root.

use oracle_common::{infra::pool, telemetry};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: pool::Config,

    #[serde(default)]
    pub telemetry: telemetry::Config,

    pub chain_adapter: chain_adapter::infra::helius::Config,

    pub gateway: gateway::config::Config,

    #[serde(default)]
    pub ingest: ingest::application::Config,

    #[serde(default)]
    pub scorer: scorer::application::Config,

    #[serde(default)]
    pub fanout: fanout::webhook::Config,

    /// Forces a `calculateAndSave` at this period even when no transaction triggered one, so a
    /// quiet token still gets at least one K history point per day.
    #[serde(with = "humantime_serde", default = "default_snapshot_period")]
    pub snapshot_period: Duration,

    /// How often the SQLite file is copied into `gateway.backup.dir` via `VACUUM INTO`.
    #[serde(with = "humantime_serde", default = "default_backup_period")]
    pub backup_period: Duration,

    /// Minimum raw balance a wallet must hold to be considered in the K Calculator's qualifying
    /// set before any USD-derived threshold has been computed; mirrors `gateway.token.min_balance`
    /// but kept distinct since the Ingest Pipeline doesn't depend on the Gateway crate.
    #[serde(default)]
    pub static_min_balance: oracle_common::domain::Amount,
}

fn default_snapshot_period() -> Duration {
    Duration::from_secs(24 * 3_600)
}

fn default_backup_period() -> Duration {
    Duration::from_secs(24 * 3_600)
}
