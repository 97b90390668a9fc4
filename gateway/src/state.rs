// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The shared application state every handler and middleware layer reads from. Mirrors
//! `spo-api::infra::api::AppState`'s role (one `Clone`-cheap struct threaded through the router via
//! `axum::extract::State`) but carries the Store/Chain Adapter/Publisher handles directly rather
//! than behind a GraphQL `Context`, since this Gateway has no GraphQL layer.

use crate::{config::Config, middleware::api_key::CachedApiKey, middleware::rate_limit::RateLimiter};
use chain_adapter::domain::ChainAdapter;
use fanout::websocket::Registry;
use ingest::pipeline::Pipeline;
use oracle_common::domain::{Publisher, Snapshot, cache::TtlCache, storage::Storage};
use scorer::token_scorer::TokenScorer;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

const API_KEY_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const API_KEY_CACHE_CAPACITY: usize = 10_000;

/// The aggregate K-metric read is cheap to compute (one query plus a pure function) but hit by
/// every dashboard load, so it gets the same 30s TTL cache the K Calculator's own docs specify.
const K_METRIC_CACHE_TTL: Duration = Duration::from_secs(30);

pub struct AppState<S, C, P> {
    pub store: S,
    pub chain_adapter: C,
    pub publisher: P,
    pub pipeline: Pipeline<S, P>,
    pub token_scorer: TokenScorer<S, C, P>,
    pub registry: Arc<Registry>,
    pub config: Arc<Config>,
    pub api_key_cache: Arc<TtlCache<String, CachedApiKey>>,
    pub k_metric_cache: Arc<TtlCache<(), Snapshot>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub maintenance: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl<S, C, P> Clone for AppState<S, C, P>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    fn clone(&self) -> Self {
        AppState {
            store: self.store.clone(),
            chain_adapter: self.chain_adapter.clone(),
            publisher: self.publisher.clone(),
            pipeline: self.pipeline.clone(),
            token_scorer: self.token_scorer.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            api_key_cache: self.api_key_cache.clone(),
            k_metric_cache: self.k_metric_cache.clone(),
            rate_limiter: self.rate_limiter.clone(),
            maintenance: self.maintenance.clone(),
            started_at: self.started_at,
        }
    }
}

impl<S, C, P> AppState<S, C, P>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    pub fn new(
        store: S,
        chain_adapter: C,
        publisher: P,
        pipeline: Pipeline<S, P>,
        token_scorer: TokenScorer<S, C, P>,
        registry: Arc<Registry>,
        config: Config,
    ) -> Self {
        let maintenance = Arc::new(AtomicBool::new(config.maintenance));
        AppState {
            store,
            chain_adapter,
            publisher,
            pipeline,
            token_scorer,
            registry,
            config: Arc::new(config),
            api_key_cache: Arc::new(TtlCache::new(API_KEY_CACHE_TTL, API_KEY_CACHE_CAPACITY)),
            k_metric_cache: Arc::new(TtlCache::new(K_METRIC_CACHE_TTL, 1)),
            rate_limiter: Arc::new(RateLimiter::new()),
            maintenance,
            started_at: Instant::now(),
        }
    }

    pub fn is_in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Acquire)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
