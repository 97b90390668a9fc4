// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Computes `K_wallet` for a single address: the share of its cross-token positions (filtered to
//! the configured ecosystem) with retention >= 1.0. A small fixed pool of workers drains the
//! `k_wallet_queue`; the queue's lease plus its unique key already give single-flight semantics
//! per address, so unlike the Wallet Indexer this needs no per-key semaphore of its own.

use crate::ecosystem::EcosystemConfig;
use anyhow::Context;
use chain_adapter::domain::ChainAdapter;
use fastrace::trace;
use log::{debug, warn};
use oracle_common::domain::{
    Address, MAX_QUEUE_ATTEMPTS, OracleEvent, PRIORITY_STALENESS_REFRESH, Publisher, QueueName,
    Timestamp, WalletScored, classify_and_score, storage::Storage,
};
use serde::Deserialize;
use std::{num::NonZeroUsize, time::Duration};
use thiserror::Error;
use tokio::{select, signal::unix::Signal, task, time};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_workers")]
    pub workers: NonZeroUsize,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,

    #[serde(default = "default_cross_token_max_pages")]
    pub cross_token_max_pages: u32,

    /// `kWalletUpdatedAt` older than this is eligible for the staleness scanner.
    #[serde(with = "humantime_serde", default = "default_staleness")]
    pub staleness: Duration,

    #[serde(with = "humantime_serde", default = "default_staleness_scan_period")]
    pub staleness_scan_period: Duration,

    #[serde(default = "default_staleness_scan_limit")]
    pub staleness_scan_limit: u32,

    #[serde(with = "humantime_serde", default = "default_cleanup_period")]
    pub cleanup_period: Duration,

    /// How long an empty dequeue backs off before polling again.
    #[serde(with = "humantime_serde", default = "default_idle_poll_period")]
    pub idle_poll_period: Duration,
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(3).unwrap()
}

fn default_lease_secs() -> i64 {
    300
}

fn default_cross_token_max_pages() -> u32 {
    10
}

fn default_staleness() -> Duration {
    Duration::from_secs(24 * 3_600)
}

fn default_staleness_scan_period() -> Duration {
    Duration::from_secs(300)
}

fn default_staleness_scan_limit() -> u32 {
    500
}

fn default_cleanup_period() -> Duration {
    Duration::from_secs(3_600)
}

fn default_idle_poll_period() -> Duration {
    Duration::from_secs(2)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workers: default_workers(),
            lease_secs: default_lease_secs(),
            cross_token_max_pages: default_cross_token_max_pages(),
            staleness: default_staleness(),
            staleness_scan_period: default_staleness_scan_period(),
            staleness_scan_limit: default_staleness_scan_limit(),
            cleanup_period: default_cleanup_period(),
            idle_poll_period: default_idle_poll_period(),
        }
    }
}

#[derive(Debug, Error)]
enum ScoreError {
    #[error("store error")]
    Store(#[from] oracle_common::domain::StoreError),

    #[error("chain adapter error")]
    ChainAdapter(#[from] chain_adapter::domain::ChainAdapterError),
}

/// Runs the worker pool, the staleness scanner, and the attempt-ceiling cleaner until `sigterm`.
pub async fn run<S, C, P>(
    config: Config,
    store: S,
    chain_adapter: C,
    publisher: P,
    primary_mint: Address,
    ecosystem: EcosystemConfig,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let mut worker_tasks = Vec::new();
    for id in 0..config.workers.get() {
        worker_tasks.push(task::spawn(worker_loop(
            id,
            config.clone(),
            store.clone(),
            chain_adapter.clone(),
            publisher.clone(),
            primary_mint.clone(),
            ecosystem.clone(),
        )));
    }

    let scanner_task = task::spawn(staleness_scanner(config.clone(), store.clone()));
    let cleanup_task = task::spawn(cleanup_loop(config.clone(), store.clone()));

    let mut workers = futures::future::select_all(worker_tasks);

    select! {
        (result, _, _) = &mut workers => result
            .context("wallet scorer worker panicked")
            .and_then(|r| r.context("wallet scorer worker failed")),

        result = scanner_task => result
            .context("wallet scorer staleness scanner panicked")
            .and_then(|r| r.context("wallet scorer staleness scanner failed")),

        result = cleanup_task => result
            .context("wallet scorer cleanup task panicked")
            .and_then(|r| r.context("wallet scorer cleanup task failed")),

        _ = sigterm.recv() => {
            warn!("SIGTERM received");
            Ok(())
        }
    }
}

async fn worker_loop<S, C, P>(
    id: usize,
    config: Config,
    store: S,
    chain_adapter: C,
    publisher: P,
    primary_mint: Address,
    ecosystem: EcosystemConfig,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    loop {
        let now = now_unix();
        let entry = store
            .dequeue(QueueName::KWallet, config.lease_secs, now)
            .await
            .context("dequeue k_wallet_queue")?;

        let Some(entry) = entry else {
            time::sleep(config.idle_poll_period).await;
            continue;
        };

        let address = Address::from(entry.key.as_str());
        let outcome = score_wallet(
            &store,
            &chain_adapter,
            &publisher,
            &primary_mint,
            &ecosystem,
            &address,
            config.cross_token_max_pages,
            now,
        )
        .await;

        match outcome {
            Ok(()) => {
                store.complete(QueueName::KWallet, &entry.key).await?;
                debug!(worker_id = id, address:% = address; "wallet scored");
            }
            Err(error) => {
                warn!(worker_id = id, address:% = address, error:%; "wallet scoring failed");
                store.fail(QueueName::KWallet, &entry.key, &error.to_string()).await?;
            }
        }
    }
}

#[trace(properties = { "address": "{address}" })]
async fn score_wallet<S, C, P>(
    store: &S,
    chain_adapter: &C,
    publisher: &P,
    primary_mint: &Address,
    ecosystem: &EcosystemConfig,
    address: &Address,
    max_pages: u32,
    now: Timestamp,
) -> Result<(), ScoreError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let positions = chain_adapter.cross_token_history(address, max_pages).await?;

    let primary_retention = store.get_wallet(address).await?.map(|w| w.retention());

    let retentions: Vec<f64> = positions
        .iter()
        .filter(|(mint, _)| *mint == primary_mint || ecosystem.admits(mint.as_str()))
        .map(|(mint, position)| {
            if mint == primary_mint {
                // The Store is the authoritative source for the primary mint: it reflects every
                // applied transaction, not just what the Chain Adapter's history page captured.
                primary_retention.unwrap_or_else(|| position.retention())
            } else {
                position.retention()
            }
        })
        .collect();

    let (k_wallet, tokens_analyzed) = classify_and_score(&retentions);
    let slot = store.last_processed_slot().await?;

    store
        .update_wallet_k_wallet(address, k_wallet, tokens_analyzed, slot, now)
        .await?;

    publisher
        .publish(OracleEvent::WalletScored(WalletScored {
            wallet: address.clone(),
            k_wallet,
            tokens_analyzed,
            slot,
            at: now,
        }))
        .await;

    Ok(())
}

async fn staleness_scanner<S>(config: Config, store: S) -> anyhow::Result<()>
where
    S: Storage,
{
    let mut interval = time::interval(config.staleness_scan_period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let now = now_unix();
        let stale = store
            .get_stale_wallets(config.staleness.as_secs() as i64, now, config.staleness_scan_limit)
            .await
            .context("get stale wallets")?;

        for address in &stale {
            store
                .enqueue(QueueName::KWallet, address.as_str(), PRIORITY_STALENESS_REFRESH)
                .await
                .context("enqueue stale wallet")?;
        }

        if !stale.is_empty() {
            debug!(count = stale.len(); "staleness scan enqueued wallets");
        }
    }
}

async fn cleanup_loop<S>(config: Config, store: S) -> anyhow::Result<()>
where
    S: Storage,
{
    let mut interval = time::interval(config.cleanup_period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let removed = store
            .cleanup_queue(QueueName::KWallet, MAX_QUEUE_ATTEMPTS)
            .await
            .context("cleanup k_wallet_queue")?;

        if removed > 0 {
            debug!(removed; "dropped k_wallet_queue entries past the attempt ceiling");
        }
    }
}

fn now_unix() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_adapter::domain::CrossTokenPosition;
    use oracle_common::domain::Amount;
    use std::collections::HashMap;

    fn position(first_buy: u64, current: u64) -> CrossTokenPosition {
        CrossTokenPosition {
            first_buy_amount: Some(Amount::from_u64(first_buy)),
            total_bought: Amount::from_u64(first_buy),
            total_sold: Amount::ZERO,
            current: Amount::from_u64(current),
            tx_count: 1,
            last_tx_ts: Some(0),
        }
    }

    #[test]
    fn ecosystem_filter_keeps_primary_mint_even_without_suffix_match() {
        let ecosystem = EcosystemConfig { suffixes: vec!["pump".to_owned()] };
        let primary = Address::from("primary-mint");
        let mut positions = HashMap::new();
        positions.insert(primary.clone(), position(1_000, 1_000));
        positions.insert(Address::from("other-mint"), position(1_000, 1_000));
        positions.insert(Address::from("foopump"), position(1_000, 500));

        let kept: Vec<_> = positions
            .iter()
            .filter(|(mint, _)| **mint == primary || ecosystem.admits(mint.as_str()))
            .collect();

        assert_eq!(kept.len(), 2);
    }
}
