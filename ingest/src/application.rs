// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Wires the pull ticker into the process's task set. The push path has no background task of
//! its own: it is driven synchronously by the Gateway's webhook handler calling
//! [`Pipeline::apply_batch`](crate::pipeline::Pipeline::apply_batch).

use crate::pipeline::Pipeline;
use anyhow::Context;
use chain_adapter::domain::ChainAdapter;
use log::warn;
use oracle_common::domain::storage::Storage;
use serde::Deserialize;
use std::{num::NonZeroUsize, time::Duration};
use tokio::{select, signal::unix::Signal, time};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// How often the pull path polls for new signatures. Default 300s per spec.
    #[serde(with = "humantime_serde", default = "default_pull_period")]
    pub pull_period: Duration,

    /// Max signatures requested per pull tick.
    #[serde(default = "default_pull_limit")]
    pub pull_limit: u32,

    /// Bounded concurrency for `FetchTransaction` calls within one pull tick.
    #[serde(default = "default_pull_concurrency")]
    pub pull_concurrency: NonZeroUsize,

    /// Overall deadline for one pull tick (slot lookup + signature/transaction fetch + apply).
    /// Default 60s per spec, distinct from the Chain Adapter's own per-request timeout.
    #[serde(with = "humantime_serde", default = "default_pull_tick_timeout")]
    pub pull_tick_timeout: Duration,
}

fn default_pull_period() -> Duration {
    Duration::from_secs(300)
}

fn default_pull_limit() -> u32 {
    1_000
}

fn default_pull_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

fn default_pull_tick_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pull_period: default_pull_period(),
            pull_limit: default_pull_limit(),
            pull_concurrency: default_pull_concurrency(),
            pull_tick_timeout: default_pull_tick_timeout(),
        }
    }
}

pub async fn run<S, C, P>(
    config: Config,
    pipeline: Pipeline<S, P>,
    chain_adapter: C,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: oracle_common::domain::Publisher,
{
    let pull_task = tokio::task::spawn(run_pull_ticker(config, pipeline, chain_adapter));

    select! {
        result = pull_task => result
            .context("pull ticker task panicked")
            .and_then(|r| r.context("pull ticker task failed")),

        _ = sigterm.recv() => {
            warn!("SIGTERM received");
            Ok(())
        }
    }
}

/// A single sequential loop, so "only one pull in flight at a time" falls out of the control
/// flow: the next tick can't fire mid-pull because nothing advances the loop until the previous
/// `run_pull_tick` call returns.
async fn run_pull_ticker<S, C, P>(
    config: Config,
    pipeline: Pipeline<S, P>,
    chain_adapter: C,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: oracle_common::domain::Publisher,
{
    let mut interval = time::interval(config.pull_period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(error) = run_pull_tick(&config, &pipeline, &chain_adapter).await {
            warn!(error:%; "pull tick failed, will retry next period");
        }
    }
}

/// Runs one pull tick under the configured overall deadline; a slow or hanging upstream call
/// anywhere in the chain (slot lookup, signature/transaction fetch, batch apply) is cancelled
/// rather than left to run indefinitely, distinct from the Chain Adapter's own per-request timeout.
async fn run_pull_tick<S, C, P>(
    config: &Config,
    pipeline: &Pipeline<S, P>,
    chain_adapter: &C,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: oracle_common::domain::Publisher,
{
    match time::timeout(config.pull_tick_timeout, run_pull_tick_inner(config, pipeline, chain_adapter)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("pull tick exceeded {:?} deadline", config.pull_tick_timeout)),
    }
}

async fn run_pull_tick_inner<S, C, P>(
    config: &Config,
    pipeline: &Pipeline<S, P>,
    chain_adapter: &C,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: oracle_common::domain::Publisher,
{
    let now = now_unix();

    let last_processed_slot = pipeline
        .last_processed_slot()
        .await
        .context("get last processed slot")?;

    let changes = crate::pull::run_once(
        chain_adapter,
        pipeline.mint(),
        last_processed_slot,
        config.pull_limit,
        config.pull_concurrency,
    )
    .await
    .context("pull signatures and transactions")?;

    if !changes.is_empty() {
        pipeline
            .apply_batch(changes, now)
            .await
            .context("apply pulled batch")?;
    }

    Ok(())
}

fn now_unix() -> oracle_common::domain::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
