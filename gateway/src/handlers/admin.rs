// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The admin-key-gated operator surface: API-key CRUD, usage stats, batch K triggers, the
//! K_wallet staleness backfill, and queue status. Every handler here checks
//! [`check_admin_key`] itself rather than relying on a shared layer, since (unlike
//! `X-Oracle-Key` identity resolution) admin access is all-or-nothing per endpoint and doesn't
//! need to flow through rate limiting or usage accounting.

use crate::{
    error::ApiError,
    handlers::{check_admin_key, now_unix},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{
    storage::{NewApiKey, Storage},
    Address, PRIORITY_STALENESS_REFRESH, Publisher, QueueName, Tier, usage_date_key,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

fn require_admin<S, C, P>(state: &AppState<S, C, P>, headers: &HeaderMap) -> Result<(), ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if check_admin_key(headers, &state.config.admin_key) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("admin key required"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    name: String,
    tier: String,
    per_minute_limit: Option<u32>,
    per_day_limit: Option<u32>,
    expires_at: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedApiKeyResponse {
    id: Uuid,
    name: String,
    tier: String,
    key: String,
}

pub async fn create_api_key<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<Json<CreatedApiKeyResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let tier = Tier::from_str(&request.tier).map_err(|error| ApiError::bad_request(error.to_string()))?;
    let (api_key, plaintext) = state
        .store
        .create_api_key(NewApiKey {
            name: request.name,
            tier,
            per_minute_limit: request.per_minute_limit,
            per_day_limit: request.per_day_limit,
            expires_at: request.expires_at,
        })
        .await?;

    Ok(Json(CreatedApiKeyResponse {
        id: api_key.id,
        name: api_key.name,
        tier: api_key.tier.to_string(),
        key: plaintext,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeySummary {
    id: Uuid,
    name: String,
    tier: String,
    per_minute_limit: Option<u32>,
    per_day_limit: Option<u32>,
    is_active: bool,
    created_at: i64,
    expires_at: Option<i64>,
    last_used_at: Option<i64>,
}

pub async fn list_api_keys<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiKeySummary>>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let keys = state.store.list_api_keys().await?;
    Ok(Json(
        keys.into_iter()
            .map(|k| ApiKeySummary {
                id: k.id,
                name: k.name,
                tier: k.tier.to_string(),
                per_minute_limit: k.per_minute_limit,
                per_day_limit: k.per_day_limit,
                is_active: k.is_active,
                created_at: k.created_at,
                expires_at: k.expires_at,
                last_used_at: k.last_used_at,
            })
            .collect(),
    ))
}

pub async fn revoke_api_key<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let revoked = state.store.revoke_api_key(id).await?;
    if !revoked {
        return Err(ApiError::not_found("api key not found"));
    }
    Ok(Json(serde_json::json!({ "revoked": true })))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    date: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageEntry {
    key_id: Uuid,
    name: String,
    date: String,
    requests: u64,
}

pub async fn usage_stats<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Vec<UsageEntry>>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let date = query.date.unwrap_or_else(today);
    let keys = state.store.list_api_keys().await?;

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let usage = state.store.get_usage(key.id, &date).await?;
        entries.push(UsageEntry { key_id: key.id, name: key.name, date: usage.date, requests: usage.requests });
    }

    Ok(Json(entries))
}

fn today() -> String {
    usage_date_key(now_unix())
}

#[derive(Debug, Deserialize)]
pub struct TriggerKRequest {
    mints: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerKResponse {
    enqueued: usize,
}

pub async fn trigger_k<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    Json(request): Json<TriggerKRequest>,
) -> Result<Json<TriggerKResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    for mint in &request.mints {
        state.store.enqueue(QueueName::Token, mint, PRIORITY_STALENESS_REFRESH).await?;
    }

    Ok(Json(TriggerKResponse { enqueued: request.mints.len() }))
}

#[derive(Debug, Deserialize)]
pub struct BackfillQuery {
    staleness_secs: Option<i64>,
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackfillResponse {
    enqueued: usize,
}

const DEFAULT_STALENESS_SECS: i64 = 24 * 3_600;
const DEFAULT_BACKFILL_LIMIT: u32 = 500;

pub async fn backfill_k_wallet<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
    Query(query): Query<BackfillQuery>,
) -> Result<Json<BackfillResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let staleness_secs = query.staleness_secs.unwrap_or(DEFAULT_STALENESS_SECS);
    let limit = query.limit.unwrap_or(DEFAULT_BACKFILL_LIMIT);
    let now = now_unix();

    let stale: Vec<Address> = state.store.get_stale_wallets(staleness_secs, now, limit).await?;
    for address in &stale {
        state.store.enqueue(QueueName::KWallet, address.as_str(), PRIORITY_STALENESS_REFRESH).await?;
    }

    Ok(Json(BackfillResponse { enqueued: stale.len() }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatusResponse {
    k_wallet_pending: u32,
    k_wallet_leased: u32,
    token_pending: u32,
    token_leased: u32,
}

pub async fn queue_status<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    headers: HeaderMap,
) -> Result<Json<QueueStatusResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    require_admin(&state, &headers)?;

    let now = now_unix();
    let k_wallet = state.store.queue_depth(QueueName::KWallet, now).await?;
    let token = state.store.queue_depth(QueueName::Token, now).await?;

    Ok(Json(QueueStatusResponse {
        k_wallet_pending: k_wallet.pending,
        k_wallet_leased: k_wallet.leased,
        token_pending: token.pending,
        token_leased: token.leased,
    }))
}

