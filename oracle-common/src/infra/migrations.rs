// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

use crate::infra::pool::SqlitePool;
use thiserror::Error;

/// Runs the embedded SQLite migrations (`oracle-common/migrations/sqlite`).
pub async fn run(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::migrate!("migrations/sqlite").run(&**pool).await?;
    Ok(())
}

#[derive(Debug, Error)]
#[error("cannot run migrations for SQLite")]
pub struct Error(#[from] sqlx::migrate::MigrateError);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pool;
    use sqlx::Row;
    use std::collections::HashSet;

    #[tokio::test]
    async fn migrations_create_expected_tables() {
        let dir = tempfile::tempdir().unwrap();
        let cnn_url = dir.path().join("test.sqlite").display().to_string();
        let pool = pool::SqlitePool::new(pool::Config {
            cnn_url,
            ..Default::default()
        })
        .await
        .unwrap();

        run(&pool).await.unwrap();

        let table_names = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&*pool)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.get::<String, _>(0))
            .collect::<HashSet<_>>();

        for expected in [
            "wallets",
            "transactions",
            "k_wallet_queue",
            "token_queue",
            "api_keys",
            "usage_daily",
            "webhook_subscriptions",
            "webhook_deliveries",
            "snapshots",
            "sync_state",
        ] {
            assert!(table_names.contains(expected), "missing table {expected}");
        }
    }
}
