// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Wires the Wallet Scorer and Token Scorer worker pools into the process's task set. Each owns
//! its own SIGTERM listener (tokio supports registering more than one for the same signal kind),
//! so either can wind down independently of the other.

use crate::{ecosystem::EcosystemConfig, token_scorer::TokenScorer, wallet_scorer};
use anyhow::Context;
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{Address, Publisher, storage::Storage};
use serde::Deserialize;
use tokio::{
    select, task,
    signal::unix::{SignalKind, signal},
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub wallet: wallet_scorer::Config,
    #[serde(default)]
    pub token: crate::token_scorer::Config,
    #[serde(default)]
    pub ecosystem: EcosystemConfig,
}

pub async fn run<S, C, P>(
    config: Config,
    store: S,
    chain_adapter: C,
    publisher: P,
    primary_mint: Address,
    token_scorer: TokenScorer<S, C, P>,
) -> anyhow::Result<()>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let wallet_sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;
    let token_sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;

    let wallet_task = task::spawn(wallet_scorer::run(
        config.wallet,
        store,
        chain_adapter,
        publisher,
        primary_mint,
        config.ecosystem,
        wallet_sigterm,
    ));
    let token_task = task::spawn(async move { token_scorer.run(token_sigterm).await });

    select! {
        result = wallet_task => result
            .context("wallet scorer task panicked")
            .and_then(|r| r.context("wallet scorer task failed")),

        result = token_task => result
            .context("token scorer task panicked")
            .and_then(|r| r.context("token scorer task failed")),
    }
}
