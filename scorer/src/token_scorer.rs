// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Computes K for an arbitrary (non-primary) mint on demand, sampling its top holders rather than
//! tracking every wallet the way the Ingest Pipeline does for the primary mint. Results are
//! cached for an hour; a request for a stale or unseen mint enqueues background work and returns
//! immediately rather than blocking the HTTP request that triggered it.

use anyhow::Context;
use chain_adapter::domain::ChainAdapter;
use dashmap::DashSet;
use fastrace::trace;
use futures::{StreamExt, stream};
use log::{debug, warn};
use oracle_common::domain::{
    Address, MAX_QUEUE_ATTEMPTS, OracleEvent, Publisher, QueueName, Timestamp, TokenScored,
    cache::TtlCache, classify_and_score, storage::Storage,
};
use serde::Deserialize;
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{select, signal::unix::Signal, task, time};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde", default = "default_ttl")]
    pub ttl: Duration,

    #[serde(default = "default_top_n")]
    pub top_n: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: NonZeroUsize,

    #[serde(default = "default_workers")]
    pub workers: NonZeroUsize,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,

    #[serde(default = "default_cross_token_max_pages")]
    pub cross_token_max_pages: u32,

    #[serde(with = "humantime_serde", default = "default_idle_poll_period")]
    pub idle_poll_period: Duration,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_ttl() -> Duration {
    Duration::from_secs(3_600)
}

fn default_top_n() -> usize {
    50
}

fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(5).unwrap()
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(2).unwrap()
}

fn default_lease_secs() -> i64 {
    600
}

fn default_cross_token_max_pages() -> u32 {
    10
}

fn default_idle_poll_period() -> Duration {
    Duration::from_secs(2)
}

fn default_cache_capacity() -> usize {
    1_000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ttl: default_ttl(),
            top_n: default_top_n(),
            concurrency: default_concurrency(),
            workers: default_workers(),
            lease_secs: default_lease_secs(),
            cross_token_max_pages: default_cross_token_max_pages(),
            idle_poll_period: default_idle_poll_period(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenScoreResult {
    pub mint: Address,
    pub k: u8,
    pub holders: u32,
    pub computed_at: Timestamp,
}

/// What [`TokenScorer::status`] tells an HTTP caller: a fresh result, or that background work is
/// (or is about to be) underway.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenScoreStatus {
    Ready(TokenScoreResult),
    Queued,
    Syncing,
}

#[derive(Debug, Error)]
pub enum TokenScoreError {
    #[error("store error")]
    Store(#[from] oracle_common::domain::StoreError),

    #[error("chain adapter error")]
    ChainAdapter(#[from] chain_adapter::domain::ChainAdapterError),
}

/// Shared handle: cloned into the HTTP handler (for `status`) and into the worker pool (for
/// `run`). Cheap to clone — everything inside is an `Arc` or a `Clone`-able store/adapter handle.
#[derive(Clone)]
pub struct TokenScorer<S, C, P> {
    store: S,
    chain_adapter: C,
    publisher: P,
    config: Config,
    cache: Arc<TtlCache<Address, TokenScoreResult>>,
    in_flight: Arc<DashSet<Address>>,
}

impl<S, C, P> TokenScorer<S, C, P>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    pub fn new(store: S, chain_adapter: C, publisher: P, config: Config) -> Self {
        let cache = Arc::new(TtlCache::new(config.ttl, config.cache_capacity));
        TokenScorer {
            store,
            chain_adapter,
            publisher,
            config,
            cache,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Returns a cached score if fresh, otherwise enqueues the mint (if not already in flight)
    /// and reports whether a worker has already claimed it.
    pub async fn status(&self, mint: &Address) -> Result<TokenScoreStatus, TokenScoreError> {
        if let Some(cached) = self.cache.get(mint) {
            return Ok(TokenScoreStatus::Ready(cached));
        }

        if self.in_flight.contains(mint) {
            return Ok(TokenScoreStatus::Syncing);
        }

        self.store.enqueue(QueueName::Token, mint.as_str(), 0).await?;
        Ok(TokenScoreStatus::Queued)
    }

    /// Runs the worker pool and the attempt-ceiling cleaner until `sigterm`.
    pub async fn run(&self, mut sigterm: Signal) -> anyhow::Result<()> {
        let mut worker_tasks = Vec::new();
        for id in 0..self.config.workers.get() {
            worker_tasks.push(task::spawn(self.clone().worker_loop(id)));
        }

        let cleanup_task = task::spawn(self.clone().cleanup_loop());
        let mut workers = futures::future::select_all(worker_tasks);

        select! {
            (result, _, _) = &mut workers => result
                .context("token scorer worker panicked")
                .and_then(|r| r.context("token scorer worker failed")),

            result = cleanup_task => result
                .context("token scorer cleanup task panicked")
                .and_then(|r| r.context("token scorer cleanup task failed")),

            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                Ok(())
            }
        }
    }

    async fn worker_loop(self, id: usize) -> anyhow::Result<()> {
        loop {
            let now = now_unix();
            let entry = self
                .store
                .dequeue(QueueName::Token, self.config.lease_secs, now)
                .await
                .context("dequeue token_queue")?;

            let Some(entry) = entry else {
                time::sleep(self.config.idle_poll_period).await;
                continue;
            };

            let mint = Address::from(entry.key.as_str());
            self.in_flight.insert(mint.clone());

            let outcome = self.score_token(&mint, now).await;
            self.in_flight.remove(&mint);

            match outcome {
                Ok(()) => {
                    self.store.complete(QueueName::Token, &entry.key).await?;
                    debug!(worker_id = id, mint:% = mint; "token scored");
                }
                Err(error) => {
                    warn!(worker_id = id, mint:% = mint, error:%; "token scoring failed");
                    self.store.fail(QueueName::Token, &entry.key, &error.to_string()).await?;
                }
            }
        }
    }

    #[trace(properties = { "mint": "{mint}" })]
    async fn score_token(&self, mint: &Address, now: Timestamp) -> Result<(), TokenScoreError> {
        let mut holders = self.chain_adapter.fetch_holders(mint).await?;
        holders.sort_by(|a, b| b.balance.cmp(&a.balance));
        holders.truncate(self.config.top_n);

        let max_pages = self.config.cross_token_max_pages;
        let retentions: Vec<f64> = stream::iter(holders)
            .map(|holder| async move {
                self.chain_adapter
                    .cross_token_history(&holder.owner, max_pages)
                    .await
                    .map(|positions| {
                        positions.get(mint).map(|position| position.retention()).unwrap_or(1.0)
                    })
            })
            .buffer_unordered(self.config.concurrency.get())
            .filter_map(|result| async move { result.ok() })
            .collect()
            .await;

        let (k, holders_count) = classify_and_score(&retentions);

        let result = TokenScoreResult { mint: mint.clone(), k, holders: holders_count, computed_at: now };
        self.cache.insert(mint.clone(), result);

        self.publisher
            .publish(OracleEvent::TokenScored(TokenScored {
                mint: mint.clone(),
                k,
                holders: holders_count,
            }))
            .await;

        Ok(())
    }

    async fn cleanup_loop(self) -> anyhow::Result<()> {
        let mut interval = time::interval(Duration::from_secs(3_600));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.cache.sweep_expired();

            let removed = self
                .store
                .cleanup_queue(QueueName::Token, MAX_QUEUE_ATTEMPTS)
                .await
                .context("cleanup token_queue")?;

            if removed > 0 {
                debug!(removed; "dropped token_queue entries past the attempt ceiling");
            }
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
    use chain_adapter::domain::{
        AddressClassification, CrossTokenPosition, ChainAdapterError, Holder, RawTransactionEvent,
        SignatureAtSlot, TokenInfo,
    };
    use oracle_common::domain::{Amount, InMemoryPubSub};
    use std::collections::HashMap;

    async fn test_storage() -> oracle_common::infra::storage::SqliteStorage {
        let dir = tempfile::tempdir().unwrap();
        let cnn_url = dir.path().join("test.sqlite").display().to_string();
        let pool = oracle_common::infra::pool::SqlitePool::new(oracle_common::infra::pool::Config {
            cnn_url,
            ..Default::default()
        })
        .await
        .unwrap();
        oracle_common::infra::migrations::run(&pool).await.unwrap();
        std::mem::forget(dir);
        oracle_common::infra::storage::SqliteStorage::new(pool)
    }

    #[derive(Clone, Default)]
    struct FakeChainAdapter {
        holders: Vec<Holder>,
        positions: HashMap<Address, CrossTokenPosition>,
    }

    impl ChainAdapter for FakeChainAdapter {
        async fn fetch_holders(&self, _: &Address) -> Result<Vec<Holder>, ChainAdapterError> {
            Ok(self.holders.clone())
        }

        async fn fetch_token_info(&self, _: &Address) -> Result<TokenInfo, ChainAdapterError> {
            Ok(TokenInfo::default())
        }

        async fn signatures_since(
            &self,
            _: &Address,
            _: u32,
        ) -> Result<Vec<SignatureAtSlot>, ChainAdapterError> {
            Ok(vec![])
        }

        async fn fetch_transaction(
            &self,
            _: &str,
        ) -> Result<RawTransactionEvent, ChainAdapterError> {
            Err(ChainAdapterError::Fatal(anyhow::anyhow!("unused in this test")))
        }

        async fn cross_token_history(
            &self,
            wallet: &Address,
            _: u32,
        ) -> Result<HashMap<Address, CrossTokenPosition>, ChainAdapterError> {
            let mut map = HashMap::new();
            if let Some(position) = self.positions.get(wallet) {
                map.insert(Address::from("mint"), position.clone());
            }
            Ok(map)
        }

        async fn classify_addresses(
            &self,
            _: &[Address],
        ) -> Result<HashMap<Address, AddressClassification>, ChainAdapterError> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn status_reports_queued_then_ready_after_scoring() {
        let store = test_storage().await;
        let mut positions = HashMap::new();
        positions.insert(
            Address::from("holder-a"),
            CrossTokenPosition {
                first_buy_amount: Some(Amount::from_u64(1_000)),
                total_bought: Amount::from_u64(1_000),
                total_sold: Amount::ZERO,
                current: Amount::from_u64(1_000),
                tx_count: 1,
                last_tx_ts: Some(0),
            },
        );
        let adapter = FakeChainAdapter {
            holders: vec![Holder { owner: Address::from("holder-a"), balance: Amount::from_u64(1_000) }],
            positions,
        };
        let scorer =
            TokenScorer::new(store, adapter, InMemoryPubSub::new(), Config::default());

        let mint = Address::from("some-mint");
        let status = scorer.status(&mint).await.unwrap();
        assert_eq!(status, TokenScoreStatus::Queued);

        scorer.score_token(&mint, 1_000).await.unwrap();

        let status = scorer.status(&mint).await.unwrap();
        match status {
            TokenScoreStatus::Ready(result) => {
                assert_eq!(result.k, 100);
                assert_eq!(result.holders, 1);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }
}
