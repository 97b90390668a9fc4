// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Two activities with no natural home in an existing crate: the daily-snapshot ticker (forces
//! `calculateAndSave` on quiet tokens) and the scheduled-backup ticker (`VACUUM INTO` plus
//! retention pruning). Both follow `scorer::wallet_scorer`'s interval-plus-sigterm shape.

use anyhow::Context;
use gateway::config::BackupConfig;
use ingest::pipeline::Pipeline;
use log::{debug, warn};
use oracle_common::domain::{Publisher, storage::Storage};
use std::time::Duration;
use tokio::{select, signal::unix::Signal, time};

pub async fn run_snapshot_ticker<S, P>(
    period: Duration,
    pipeline: Pipeline<S, P>,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    S: Storage,
    P: Publisher,
{
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        select! {
            _ = interval.tick() => {
                let now = now_unix();
                if let Err(error) = pipeline.calculate_and_save(now).await {
                    warn!(error:%; "daily snapshot tick failed, will retry next period");
                } else {
                    debug!("daily snapshot tick saved a fresh K snapshot");
                }
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                return Ok(());
            }
        }
    }
}

pub async fn run_backup_ticker<S>(
    period: Duration,
    store: S,
    config: BackupConfig,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    S: Storage,
{
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        select! {
            _ = interval.tick() => {
                if let Err(error) = run_backup(&store, &config).await {
                    warn!(error:%; "scheduled backup failed, will retry next period");
                }
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                return Ok(());
            }
        }
    }
}

async fn run_backup<S>(store: &S, config: &BackupConfig) -> anyhow::Result<()>
where
    S: Storage,
{
    std::fs::create_dir_all(&config.dir).context("create backup directory")?;

    let file_name = format!("oracle-{}.sqlite", now_unix());
    let dest_path = std::path::Path::new(&config.dir).join(&file_name);
    store
        .backup(&dest_path.display().to_string())
        .await
        .context("vacuum into backup file")?;

    prune_old_backups(&config.dir, config.retention);
    debug!(file = file_name; "scheduled backup written");

    Ok(())
}

/// Same pruning logic as `gateway::handlers::dashboard`'s admin-triggered backup — duplicated
/// rather than shared since the two call sites live in different crates and neither depends on
/// the other.
fn prune_old_backups(dir: &str, retention: u32) {
    let Ok(read_dir) = std::fs::read_dir(dir) else { return };
    let mut entries: Vec<_> = read_dir
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "sqlite"))
        .collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());

    let excess = entries.len().saturating_sub(retention as usize);
    for entry in entries.into_iter().take(excess) {
        if let Err(error) = std::fs::remove_file(entry.path()) {
            warn!(error:%, path:? = entry.path(); "failed to prune old backup file");
        }
    }
}

fn now_unix() -> oracle_common::domain::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
