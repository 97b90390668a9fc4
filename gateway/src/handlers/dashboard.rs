// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! `/k-metric/*`: the read models and triggers built around the Gateway's one configured primary
//! token. Everything here reads through `AppState::store`/`chain_adapter`/`pipeline`; nothing
//! here talks to an arbitrary mint (see `handlers::external` for that).

use crate::{
    error::ApiError,
    handlers::{check_admin_key, clamp_limit, now_unix},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chain_adapter::domain::{AddressClassification, ChainAdapter};
use ingest::pull;
use log::warn;
use oracle_common::domain::{
    storage::{HoldersFilter, Storage},
    Address, Classification, Publisher, QueueName, Timestamp, LAST_FULL_SYNC,
    PRIORITY_TX_TRIGGERED, TOKEN_PRICE, civil_date,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroUsize;

/// `k_wallet` older than this is reported `stale: true` on `/k-metric/wallet/:addr/k-global`.
const K_GLOBAL_STALE_SECS: i64 = 3_600;

const SYNC_PULL_LIMIT: u32 = 1_000;

fn sync_pull_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenSummary {
    mint: String,
    symbol: String,
    price_usd: Option<f64>,
    supply: Option<String>,
    liquidity: Option<f64>,
    mcap: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KMetricResponse {
    k: u8,
    holders: u32,
    never_sold: u32,
    accumulators: u32,
    maintained: u32,
    partial_sellers: u32,
    major_sellers: u32,
    avg_hold_days: f64,
    og: u32,
    token: TokenSummary,
    calculated_at: Timestamp,
}

pub async fn k_metric<S, C, P>(State(state): State<AppState<S, C, P>>) -> Result<Response, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if state.is_in_maintenance() {
        return Ok(maintenance_response());
    }

    let snapshot = match state.k_metric_cache.get(&()) {
        Some(snapshot) => Some(snapshot),
        None => {
            let snapshot = state.store.get_latest_snapshot().await?;
            if let Some(snapshot) = &snapshot {
                state.k_metric_cache.insert((), snapshot.clone());
            }
            snapshot
        }
    };

    let Some(snapshot) = snapshot else {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "calculating" })),
        )
            .into_response());
    };

    let token_info = state.chain_adapter.fetch_token_info(&state.config.token.mint).await.unwrap_or_else(|error| {
        warn!(error:%; "token info lookup failed, serving k-metric without live price data");
        Default::default()
    });

    let response = KMetricResponse {
        k: snapshot.k,
        holders: snapshot.holders,
        never_sold: snapshot.never_sold_count,
        accumulators: snapshot.accumulators_count,
        maintained: snapshot.maintained_count,
        partial_sellers: snapshot.reducers_count,
        major_sellers: snapshot.extractors_count,
        avg_hold_days: snapshot.avg_hold_days,
        og: snapshot.og_count,
        token: TokenSummary {
            mint: state.config.token.mint.to_string(),
            symbol: state.config.token.symbol.clone(),
            price_usd: token_info.price_usd,
            supply: token_info.supply.map(|s| s.to_string()),
            liquidity: token_info.liquidity,
            mcap: token_info.mcap,
        },
        calculated_at: snapshot.created_at,
    };

    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    date: String,
    k: u8,
    holders: u32,
    accumulators: u32,
    maintained: u32,
    partial_sellers: u32,
    major_sellers: u32,
    og: u32,
    created_at: Timestamp,
}

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
    count: usize,
}

pub async fn history<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let since = now_unix() - days * 86_400;

    let mut snapshots = state.store.get_snapshot_history(since).await?;
    snapshots.sort_by_key(|s| s.created_at);

    let history: Vec<HistoryEntry> = snapshots
        .into_iter()
        .map(|snapshot| HistoryEntry {
            date: civil_date(snapshot.created_at),
            k: snapshot.k,
            holders: snapshot.holders,
            accumulators: snapshot.accumulators_count,
            maintained: snapshot.maintained_count,
            partial_sellers: snapshot.reducers_count,
            major_sellers: snapshot.extractors_count,
            og: snapshot.og_count,
            created_at: snapshot.created_at,
        })
        .collect();

    Ok(Json(HistoryResponse { count: history.len(), history }))
}

#[derive(Debug, Deserialize)]
pub struct HoldersQuery {
    limit: Option<u32>,
    exclude_pools: Option<bool>,
    min_usd: Option<f64>,
    k_min: Option<u8>,
    classification: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HolderEntry {
    address: String,
    balance: String,
    retention: f64,
    classification: String,
    hold_days: f64,
    is_og: bool,
    is_pool: bool,
    pool_program: Option<&'static str>,
    k_wallet: Option<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldersResponse {
    holders: Vec<HolderEntry>,
    total: u32,
    pools_detected: u32,
    filter: HoldersFilterEcho,
    k_wallet_coverage: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HoldersFilterEcho {
    limit: u32,
    exclude_pools: bool,
    k_min: Option<u8>,
    classification: Option<String>,
    min_usd: Option<f64>,
}

pub async fn holders<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Query(query): Query<HoldersQuery>,
) -> Result<Json<HoldersResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let requested_limit = clamp_limit(query.limit, 100, 1_000);
    let exclude_pools = query.exclude_pools.unwrap_or(false);
    let classification = query
        .classification
        .as_deref()
        .map(parse_classification)
        .transpose()
        .map_err(ApiError::bad_request)?;

    // The Store can't filter on pool membership (that's chain-adapter's call), so when pools
    // must be excluded we over-fetch and trim after classifying, rather than under-filling the
    // page.
    let fetch_limit = if exclude_pools { (requested_limit * 2).min(2_000) } else { requested_limit };
    let filter = HoldersFilter { k_min: query.k_min, classification, exclude_pools: false, limit: fetch_limit };
    let (wallets, total) = state.store.get_holders_filtered(&filter).await?;

    let addresses: Vec<Address> = wallets.iter().map(|w| w.address.clone()).collect();
    let classifications = state.chain_adapter.classify_addresses(&addresses).await?;

    let min_balance_units = min_usd_to_raw(&state, query.min_usd).await;

    let now = now_unix();
    let k_calculator = state.config.token.k_calculator();
    let mut pools_detected = 0u32;

    let mut entries: Vec<HolderEntry> = wallets
        .into_iter()
        .filter_map(|wallet| {
            let address_classification = classifications
                .get(&wallet.address)
                .copied()
                .unwrap_or(AddressClassification { is_pool: false, program: None });

            if address_classification.is_pool {
                pools_detected += 1;
            }
            if exclude_pools && address_classification.is_pool {
                return None;
            }
            if let Some(min_balance) = min_balance_units {
                if wallet.current_balance.to_f64_lossy() < min_balance {
                    return None;
                }
            }

            let hold_days = wallet
                .first_buy_ts
                .map(|ts| (now - ts).max(0) as f64 / 86_400.0)
                .unwrap_or(0.0);
            let is_og = wallet.first_buy_ts.is_some_and(|ts| {
                ts >= k_calculator.launch_ts
                    && ts <= k_calculator.launch_ts + k_calculator.og_early_window_secs
                    && (now - ts) >= k_calculator.og_hold_threshold_secs
            });

            Some(HolderEntry {
                address: wallet.address.to_string(),
                balance: wallet.current_balance.to_string(),
                retention: wallet.retention(),
                classification: Classification::from_retention(wallet.retention()).to_string(),
                hold_days,
                is_og,
                is_pool: address_classification.is_pool,
                pool_program: address_classification.program,
                k_wallet: wallet.k_wallet,
            })
        })
        .collect();

    entries.truncate(requested_limit as usize);

    let k_wallet_coverage = if entries.is_empty() {
        0.0
    } else {
        entries.iter().filter(|e| e.k_wallet.is_some()).count() as f64 / entries.len() as f64
    };

    Ok(Json(HoldersResponse {
        total,
        pools_detected,
        k_wallet_coverage,
        filter: HoldersFilterEcho {
            limit: requested_limit,
            exclude_pools,
            k_min: query.k_min,
            classification: query.classification,
            min_usd: query.min_usd,
        },
        holders: entries,
    }))
}

async fn min_usd_to_raw<S, C, P>(state: &AppState<S, C, P>, min_usd: Option<f64>) -> Option<f64>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let min_usd = min_usd?;
    let price: f64 = state.store.get_sync_state(TOKEN_PRICE).await.ok()??.parse().ok()?;
    if price <= 0.0 {
        return None;
    }
    let decimals = state.config.token.decimals as i32;
    Some((min_usd / price) * 10f64.powi(decimals))
}

fn parse_classification(s: &str) -> Result<Classification, String> {
    match s {
        "accumulator" => Ok(Classification::Accumulator),
        "holder" => Ok(Classification::Holder),
        "reducer" => Ok(Classification::Reducer),
        "extractor" => Ok(Classification::Extractor),
        other => Err(format!("unknown classification: {other}")),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    maintenance: bool,
    uptime_seconds: u64,
    sync: SyncStatus,
    gating: GatingStatus,
    queue: QueueStatus,
    cache: CacheStatus,
    websocket: WebSocketStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatus {
    last_processed_slot: u64,
    last_full_sync: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GatingStatus {
    gated: bool,
    fail_closed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatus {
    k_wallet_pending: u32,
    k_wallet_leased: u32,
    token_pending: u32,
    token_leased: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStatus {
    api_key_entries: usize,
    k_metric_cached: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebSocketStatus {
    connections: usize,
}

pub async fn status<S, C, P>(State(state): State<AppState<S, C, P>>) -> Result<Json<StatusResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let now = now_unix();
    let last_processed_slot = state.pipeline.last_processed_slot().await?;
    let last_full_sync = state.store.get_sync_state(LAST_FULL_SYNC).await?;
    let k_wallet_depth = state.store.queue_depth(QueueName::KWallet, now).await?;
    let token_depth = state.store.queue_depth(QueueName::Token, now).await?;

    Ok(Json(StatusResponse {
        maintenance: state.is_in_maintenance(),
        uptime_seconds: state.uptime_secs(),
        sync: SyncStatus { last_processed_slot, last_full_sync },
        gating: GatingStatus { gated: state.config.k_global.gated, fail_closed: state.config.k_global.fail_closed },
        queue: QueueStatus {
            k_wallet_pending: k_wallet_depth.pending,
            k_wallet_leased: k_wallet_depth.leased,
            token_pending: token_depth.pending,
            token_leased: token_depth.leased,
        },
        cache: CacheStatus {
            api_key_entries: state.api_key_cache.len(),
            k_metric_cached: state.k_metric_cache.get(&()).is_some(),
        },
        websocket: WebSocketStatus { connections: state.registry.connection_count() },
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KScoreResponse {
    address: String,
    k_wallet: Option<u8>,
    tokens_analyzed: Option<u32>,
    slot: Option<u64>,
    updated_at: Option<Timestamp>,
}

pub async fn k_score<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Path(addr): Path<String>,
) -> Result<Json<KScoreResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let address = Address::from(addr.as_str());
    let wallet = state
        .store
        .get_wallet(&address)
        .await?
        .ok_or_else(|| ApiError::not_found("wallet not found"))?;

    Ok(Json(KScoreResponse {
        address: wallet.address.to_string(),
        k_wallet: wallet.k_wallet,
        tokens_analyzed: wallet.k_wallet_tokens_analyzed,
        slot: wallet.k_wallet_slot,
        updated_at: wallet.k_wallet_updated_at,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KGlobalResponse {
    source: &'static str,
    stale: bool,
    age_seconds: i64,
    poh: Poh,
    k_wallet: u8,
    tokens_analyzed: Option<u32>,
}

#[derive(Serialize)]
struct Poh {
    slot: Option<u64>,
}

pub async fn k_global<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Path(addr): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let address = Address::from(addr.as_str());

    if state.config.k_global.gated && !authorize_k_global(&state, &address, &headers).await {
        return Err(ApiError::forbidden("cross-token K is gated").with_kind("verification_unavailable"));
    }

    let wallet = state.store.get_wallet(&address).await?;

    match wallet.and_then(|w| w.k_wallet.map(|k| (w, k))) {
        Some((wallet, k_wallet)) => {
            let updated_at = wallet.k_wallet_updated_at.unwrap_or(0);
            let age_seconds = (now_unix() - updated_at).max(0);
            Ok(Json(KGlobalResponse {
                source: "db",
                stale: age_seconds > K_GLOBAL_STALE_SECS,
                age_seconds,
                poh: Poh { slot: wallet.k_wallet_slot },
                k_wallet,
                tokens_analyzed: wallet.k_wallet_tokens_analyzed,
            })
            .into_response())
        }
        None => {
            state.store.enqueue(QueueName::KWallet, address.as_str(), PRIORITY_TX_TRIGGERED).await?;
            Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response())
        }
    }
}

async fn authorize_k_global<S, C, P>(state: &AppState<S, C, P>, address: &Address, headers: &HeaderMap) -> bool
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if check_admin_key(headers, &state.config.admin_key) {
        return true;
    }

    match state.store.get_wallet(address).await {
        Ok(Some(wallet)) if wallet.current_balance >= state.config.k_global.min_balance => true,
        Ok(_) => match state.chain_adapter.fetch_holders(&state.config.token.mint).await {
            Ok(holders) => {
                holders.iter().any(|h| &h.owner == address && h.balance >= state.config.k_global.min_balance)
            }
            Err(error) => {
                warn!(error:%; "chain adapter unavailable during k-global authorization");
                !state.config.k_global.fail_closed
            }
        },
        Err(error) => {
            warn!(error:%; "store unavailable during k-global authorization");
            !state.config.k_global.fail_closed
        }
    }
}

pub async fn webhook<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let signature = headers.get("x-helius-signature").and_then(|v| v.to_str().ok());
    use secrecy::ExposeSecret;

    let batch = ingest::push::handle_webhook_body(
        &body,
        signature,
        state.config.helius_webhook_secret.expose_secret(),
        &state.config.token.mint,
    )
    .map_err(|error| match error {
        ingest::push::PushError::MissingSignature | ingest::push::PushError::InvalidSignature => {
            ApiError::unauthorized("signature verification failed")
        }
        ingest::push::PushError::MalformedPayload(_) => ApiError::bad_request("malformed webhook payload"),
    })?;

    state.pipeline.apply_batch(batch, now_unix()).await?;
    state.k_metric_cache.invalidate(&());

    Ok(Json(json!({ "received": true })))
}

pub async fn trigger_sync<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if !check_admin_key(&headers, &state.config.admin_key) {
        return Err(ApiError::unauthorized("admin key required"));
    }

    let last_slot = state.pipeline.last_processed_slot().await?;
    let batch = pull::run_once(
        &state.chain_adapter,
        state.pipeline.mint(),
        last_slot,
        SYNC_PULL_LIMIT,
        sync_pull_concurrency(),
    )
    .await?;
    let applied = state.pipeline.apply_batch(batch, now_unix()).await?;
    state.k_metric_cache.invalidate(&());

    Ok(Json(json!({ "synced": true, "applied": applied })))
}

pub async fn trigger_backup<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if !check_admin_key(&headers, &state.config.admin_key) {
        return Err(ApiError::unauthorized("admin key required"));
    }

    std::fs::create_dir_all(&state.config.backup.dir)
        .map_err(|error| ApiError::internal(error.to_string()))?;

    let file_name = format!("oracle-{}.sqlite", now_unix());
    let dest_path = std::path::Path::new(&state.config.backup.dir).join(&file_name);
    state.store.backup(&dest_path.display().to_string()).await?;

    prune_old_backups(&state.config.backup.dir, state.config.backup.retention);

    Ok(Json(json!({ "backed_up": true, "file": file_name })))
}

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

fn maintenance_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "service in maintenance mode", "maintenance": true })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classification_rejects_unknown() {
        assert!(parse_classification("whale").is_err());
        assert_eq!(parse_classification("holder").unwrap(), Classification::Holder);
    }
}
