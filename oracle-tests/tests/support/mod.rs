// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the cross-crate scenarios in this crate: a tempfile-backed
//! [`SqliteStorage`] (the same pattern every crate's own unit tests already use) and a
//! [`FakeChainAdapter`] test double, since no crate exports one of its own.

#![allow(dead_code)]

use chain_adapter::domain::{
    AddressClassification, ChainAdapter, ChainAdapterError, CrossTokenPosition, Holder,
    RawTransactionEvent, SignatureAtSlot, TokenInfo,
};
use oracle_common::{
    domain::{Address, BalanceChange, KCalculatorConfig},
    infra::{migrations, pool, storage::SqliteStorage},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Builds one balance change for `wallet` at `slot`, signed `sig`. `amount` accepts a leading
/// `-` for an outflow (parsed by `SignedAmount`'s `FromStr`).
pub fn change(mint: &str, wallet: &str, slot: u64, amount: &str, sig: &str) -> BalanceChange {
    BalanceChange {
        mint: Address::from(mint),
        wallet: Address::from(wallet),
        slot,
        block_time: slot as i64 * 10,
        amount: amount.parse().unwrap(),
        signature: sig.to_owned(),
    }
}

pub fn k_calculator_config() -> KCalculatorConfig {
    KCalculatorConfig { launch_ts: 0, og_early_window_secs: 7 * 24 * 3_600, og_hold_threshold_secs: 30 * 24 * 3_600 }
}

/// A minimal but complete `gateway::config::Config`, the way every handler test across the
/// workspace builds one: every field set explicitly rather than relying on a `Default` the
/// Gateway config doesn't derive (secrets and the primary mint have no sane default).
pub fn gateway_config() -> gateway::config::Config {
    use gateway::config::{BackupConfig, Config, KGlobalConfig, TokenConfig};
    use secrecy::SecretString;

    Config {
        address: [127, 0, 0, 1].into(),
        port: 0,
        request_body_limit_bytes: 1024 * 1024,
        cors_origins: Vec::new(),
        admin_key: SecretString::from("admin-key".to_owned()),
        production: false,
        maintenance: false,
        token: TokenConfig {
            mint: Address::from("mint"),
            symbol: "MINT".to_owned(),
            decimals: 6,
            launch_ts: 0,
            og_early_window_secs: 7 * 24 * 3_600,
            og_hold_threshold_secs: 30 * 24 * 3_600,
            min_balance: oracle_common::domain::Amount::ZERO,
        },
        helius_webhook_secret: SecretString::from("webhook-secret".to_owned()),
        k_global: KGlobalConfig::default(),
        ws_connection_cap: fanout::websocket::DEFAULT_CONNECTION_CAP,
        ecosystem: scorer::ecosystem::EcosystemConfig::default(),
        backup: BackupConfig::default(),
    }
}

/// Builds a full `AppState` wired to a fresh tempfile-backed store, the given fake chain adapter,
/// and an in-memory bus, mirroring `oracle-standalone::main`'s wiring.
pub async fn app_state(
    store: SqliteStorage,
    chain_adapter: FakeChainAdapter,
    config: gateway::config::Config,
) -> gateway::state::AppState<SqliteStorage, FakeChainAdapter, oracle_common::domain::InMemoryPubSub> {
    use oracle_common::domain::InMemoryPubSub;
    use std::sync::Arc;

    let pub_sub = InMemoryPubSub::new();

    let pipeline_config = ingest::pipeline::PipelineConfig {
        mint: config.token.mint.clone(),
        k_calculator: config.token.k_calculator(),
        static_min_balance: oracle_common::domain::Amount::ZERO,
    };
    let pipeline = ingest::pipeline::Pipeline::new(store.clone(), pub_sub.clone(), pipeline_config);

    let token_scorer = scorer::token_scorer::TokenScorer::new(
        store.clone(),
        chain_adapter.clone(),
        pub_sub.clone(),
        scorer::token_scorer::Config::default(),
    );

    let registry = Arc::new(fanout::websocket::Registry::with_cap(config.ws_connection_cap));

    gateway::state::AppState::new(store, chain_adapter, pub_sub, pipeline, token_scorer, registry, config)
}

pub async fn sqlite_storage() -> SqliteStorage {
    let dir = tempfile::tempdir().unwrap();
    let cnn_url = dir.path().join("oracle-tests.sqlite").display().to_string();
    let pool = pool::SqlitePool::new(pool::Config { cnn_url, ..Default::default() }).await.unwrap();
    migrations::run(&pool).await.unwrap();
    // Leak the tempdir so the file survives for the pool's lifetime within the test.
    std::mem::forget(dir);
    SqliteStorage::new(pool)
}

#[derive(Debug, Default)]
struct FakeState {
    holders: Vec<Holder>,
    token_info: TokenInfo,
    cross_token: HashMap<Address, CrossTokenPosition>,
    classifications: HashMap<Address, AddressClassification>,
    fail_holders: bool,
    fail_cross_token: bool,
}

/// A hand-rolled [`ChainAdapter`] double: every method reads from shared, mutable state so a
/// test can script exactly what the "chain" says, including failures, without a live RPC.
#[derive(Clone, Default)]
pub struct FakeChainAdapter {
    state: Arc<Mutex<FakeState>>,
}

impl FakeChainAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_holders(&self, holders: Vec<Holder>) {
        self.state.lock().await.holders = holders;
    }

    pub async fn fail_holders(&self, fail: bool) {
        self.state.lock().await.fail_holders = fail;
    }

    pub async fn fail_cross_token(&self, fail: bool) {
        self.state.lock().await.fail_cross_token = fail;
    }

    pub async fn set_cross_token(&self, wallet: Address, position: CrossTokenPosition) {
        self.state.lock().await.cross_token.insert(wallet, position);
    }
}

impl ChainAdapter for FakeChainAdapter {
    async fn fetch_holders(&self, _mint: &Address) -> Result<Vec<Holder>, ChainAdapterError> {
        let state = self.state.lock().await;
        if state.fail_holders {
            return Err(ChainAdapterError::Transient(anyhow::anyhow!("fake chain adapter: holders unavailable")));
        }
        Ok(state.holders.clone())
    }

    async fn fetch_token_info(&self, _mint: &Address) -> Result<TokenInfo, ChainAdapterError> {
        Ok(self.state.lock().await.token_info.clone())
    }

    async fn signatures_since(
        &self,
        _mint: &Address,
        _limit: u32,
    ) -> Result<Vec<SignatureAtSlot>, ChainAdapterError> {
        Ok(Vec::new())
    }

    async fn fetch_transaction(&self, _signature: &str) -> Result<RawTransactionEvent, ChainAdapterError> {
        Err(ChainAdapterError::Fatal(anyhow::anyhow!("fake chain adapter: no transactions recorded")))
    }

    async fn cross_token_history(
        &self,
        wallet: &Address,
        _max_pages: u32,
    ) -> Result<HashMap<Address, CrossTokenPosition>, ChainAdapterError> {
        let state = self.state.lock().await;
        if state.fail_cross_token {
            return Err(ChainAdapterError::Transient(anyhow::anyhow!("fake chain adapter: history unavailable")));
        }
        Ok(state
            .cross_token
            .get(wallet)
            .cloned()
            .into_iter()
            .map(|position| (wallet.clone(), position))
            .collect())
    }

    async fn classify_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, AddressClassification>, ChainAdapterError> {
        let state = self.state.lock().await;
        Ok(addresses
            .iter()
            .map(|address| {
                let classification = state
                    .classifications
                    .get(address)
                    .copied()
                    .unwrap_or(AddressClassification { is_pool: false, program: None });
                (address.clone(), classification)
            })
            .collect())
    }
}
