// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

mod config;
mod tickers;

#[tokio::main]
async fn main() {
    oracle_common::telemetry::init_logging();
    std::panic::set_hook(Box::new(|panic| log::error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let backtrace = error.backtrace();
        let error = format!("{error:#}");
        log::error!(error, backtrace:%; "process exited with ERROR");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    use anyhow::Context;
    use oracle_common::{
        config::ConfigExt,
        domain::InMemoryPubSub,
        infra::{migrations, pool::SqlitePool, storage::SqliteStorage},
    };
    use std::sync::Arc;
    use tokio::{
        select,
        signal::unix::{SignalKind, signal},
        task,
    };

    let config = config::Config::load().context("load configuration")?;
    log::info!(config:?; "starting");

    oracle_common::telemetry::init_tracing(config.telemetry.tracing_config.clone());
    oracle_common::telemetry::init_metrics(config.telemetry.metrics_config.clone());

    let pool = SqlitePool::new(config.pool.clone())
        .await
        .context("create sqlite pool")?;
    migrations::run(&pool).await.context("run sqlite migrations")?;

    let store = SqliteStorage::new(pool);
    let chain_adapter = chain_adapter::infra::helius::HeliusAdapter::new(config.chain_adapter.clone())
        .context("build chain adapter")?;
    let pub_sub = InMemoryPubSub::new();

    let primary_mint = config.gateway.token.mint.clone();
    let pipeline_config = ingest::pipeline::PipelineConfig {
        mint: primary_mint.clone(),
        k_calculator: config.gateway.token.k_calculator(),
        static_min_balance: config.static_min_balance.clone(),
    };
    let pipeline = ingest::pipeline::Pipeline::new(store.clone(), pub_sub.clone(), pipeline_config);

    let token_scorer = scorer::token_scorer::TokenScorer::new(
        store.clone(),
        chain_adapter.clone(),
        pub_sub.clone(),
        config.scorer.token.clone(),
    );

    let registry = Arc::new(fanout::websocket::Registry::with_cap(config.gateway.ws_connection_cap));

    let app_state = gateway::state::AppState::new(
        store.clone(),
        chain_adapter.clone(),
        pub_sub.clone(),
        pipeline.clone(),
        token_scorer.clone(),
        registry.clone(),
        config.gateway.clone(),
    );

    // The Wallet Scorer's ecosystem admission list is kept in lockstep with the Gateway's rather
    // than configured twice, since both gate the same "which mints count towards cross-token K"
    // question.
    let mut scorer_config = config.scorer.clone();
    scorer_config.ecosystem = config.gateway.ecosystem.clone();

    let fanout_config = fanout::application::Config { webhook: config.fanout.clone() };

    let gateway_sigterm = gateway::application::sigterm().context("register SIGTERM handler")?;
    let ingest_sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;
    let snapshot_sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;
    let backup_sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;

    let gateway_task = task::spawn(gateway::application::serve(app_state, gateway_sigterm));
    let ingest_task = task::spawn(ingest::application::run(
        config.ingest.clone(),
        pipeline.clone(),
        chain_adapter.clone(),
        ingest_sigterm,
    ));
    let scorer_task = task::spawn(scorer::application::run(
        scorer_config,
        store.clone(),
        chain_adapter.clone(),
        pub_sub.clone(),
        primary_mint,
        token_scorer,
    ));
    let fanout_task = task::spawn(fanout::application::run(
        fanout_config,
        store.clone(),
        pub_sub,
        registry,
    ));
    let snapshot_task = task::spawn(tickers::run_snapshot_ticker(
        config.snapshot_period,
        pipeline,
        snapshot_sigterm,
    ));
    let backup_task = task::spawn(tickers::run_backup_ticker(
        config.backup_period,
        store,
        config.gateway.backup.clone(),
        backup_sigterm,
    ));

    select! {
        result = gateway_task => result
            .context("gateway task panicked")
            .and_then(|r| r.context("gateway task failed")),

        result = ingest_task => result
            .context("ingest task panicked")
            .and_then(|r| r.context("ingest task failed")),

        result = scorer_task => result
            .context("scorer task panicked")
            .and_then(|r| r.context("scorer task failed")),

        result = fanout_task => result
            .context("fanout task panicked")
            .and_then(|r| r.context("fanout task failed")),

        result = snapshot_task => result
            .context("snapshot ticker task panicked")
            .and_then(|r| r.context("snapshot ticker task failed")),

        result = backup_task => result
            .context("backup ticker task panicked")
            .and_then(|r| r.context("backup ticker task failed")),
    }
}
