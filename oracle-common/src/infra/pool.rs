// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The single SQLite pool conviction-oracle runs on. There is no Postgres/cloud backend here:
//! unlike the indexer this grew out of, the whole system fits on one embedded database file.

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool as SqlxSqlitePool, SqlitePoolOptions};
use std::{ops::Deref, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file, e.g. `data/oracle.sqlite`.
    pub cnn_url: String,

    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cnn_url: "oracle.sqlite".to_owned(),
            idle_timeout: Duration::from_secs(60),
            max_connections: 10,
        }
    }
}

/// Thin wrapper around [`sqlx::SqlitePool`]; `Deref`s to it so call sites read `&*pool`.
#[derive(Debug, Clone)]
pub struct SqlitePool(SqlxSqlitePool);

impl SqlitePool {
    pub async fn new(config: Config) -> Result<Self, Error> {
        let Config {
            cnn_url,
            idle_timeout,
            max_connections,
        } = config;

        let options = SqliteConnectOptions::from_str(&cnn_url)
            .map_err(Error::ConnectOptions)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(idle_timeout)
            .connect_with(options)
            .await
            .map_err(Error::Connect)?;

        Ok(Self(pool))
    }
}

impl Deref for SqlitePool {
    type Target = SqlxSqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse SQLite connection options")]
    ConnectOptions(#[source] sqlx::Error),

    #[error("cannot connect to SQLite")]
    Connect(#[source] sqlx::Error),
}
