// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! `/api/v1/*`: the arbitrary-mint oracle surface. Unlike `handlers::dashboard`, every endpoint
//! here takes a mint (or wallet) from the caller and validates it against
//! `config.ecosystem` before it ever reaches the Token Scorer — the scorer itself trusts its
//! input, so the admission check has to happen here.

use crate::{error::ApiError, handlers::clamp_limit, state::AppState};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{storage::Storage, Address, Publisher};
use scorer::token_scorer::TokenScoreStatus;
use serde::{Deserialize, Serialize};

const MAX_WALLET_BATCH: usize = 100;
const MAX_TOKEN_BATCH: usize = 50;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    primary_mint: String,
}

pub async fn status<S, C, P>(State(state): State<AppState<S, C, P>>) -> Json<StatusResponse>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    Json(StatusResponse {
        status: if state.is_in_maintenance() { "maintenance" } else { "ok" },
        primary_mint: state.config.token.mint.to_string(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
enum TokenResponse {
    #[serde(rename = "ready")]
    Ready { mint: String, k: u8, holders: u32, computed_at: i64 },
    #[serde(rename = "queued")]
    Queued { mint: String },
    #[serde(rename = "syncing")]
    Syncing { mint: String },
}

fn token_response(mint: &Address, status: TokenScoreStatus) -> TokenResponse {
    match status {
        TokenScoreStatus::Ready(result) => TokenResponse::Ready {
            mint: mint.to_string(),
            k: result.k,
            holders: result.holders,
            computed_at: result.computed_at,
        },
        TokenScoreStatus::Queued => TokenResponse::Queued { mint: mint.to_string() },
        TokenScoreStatus::Syncing => TokenResponse::Syncing { mint: mint.to_string() },
    }
}

pub async fn token<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Path(mint): Path<String>,
) -> Result<Json<TokenResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let mint = Address::from(mint.as_str());
    if !state.config.ecosystem.admits(mint.as_str()) {
        return Err(ApiError::bad_request("mint is not part of the tracked ecosystem"));
    }

    let status = state.token_scorer.status(&mint).await?;
    Ok(Json(token_response(&mint, status)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletResponse {
    address: String,
    k_wallet: Option<u8>,
    tokens_analyzed: Option<u32>,
    updated_at: Option<i64>,
}

pub async fn wallet<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Path(addr): Path<String>,
) -> Result<Json<WalletResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let address = Address::from(addr.as_str());
    let wallet = state.store.get_wallet(&address).await?;

    Ok(Json(match wallet {
        Some(wallet) => WalletResponse {
            address: wallet.address.to_string(),
            k_wallet: wallet.k_wallet,
            tokens_analyzed: wallet.k_wallet_tokens_analyzed,
            updated_at: wallet.k_wallet_updated_at,
        },
        None => WalletResponse { address: address.to_string(), k_wallet: None, tokens_analyzed: None, updated_at: None },
    }))
}

#[derive(Deserialize)]
pub struct WalletBatchRequest {
    addresses: Vec<String>,
}

#[derive(Serialize)]
struct WalletBatchResponse {
    results: Vec<WalletResponse>,
    summary: BatchSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchSummary {
    requested: usize,
    known: usize,
    unknown: usize,
}

pub async fn wallets_batch<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Json(request): Json<WalletBatchRequest>,
) -> Result<Json<WalletBatchResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if request.addresses.is_empty() {
        return Err(ApiError::bad_request("addresses must not be empty"));
    }
    if request.addresses.len() > MAX_WALLET_BATCH {
        return Err(ApiError::bad_request(format!("at most {MAX_WALLET_BATCH} addresses per request")));
    }

    let mut results = Vec::with_capacity(request.addresses.len());
    let mut known = 0usize;

    for addr in &request.addresses {
        let address = Address::from(addr.as_str());
        let wallet = state.store.get_wallet(&address).await?;
        results.push(match wallet {
            Some(wallet) => {
                known += 1;
                WalletResponse {
                    address: wallet.address.to_string(),
                    k_wallet: wallet.k_wallet,
                    tokens_analyzed: wallet.k_wallet_tokens_analyzed,
                    updated_at: wallet.k_wallet_updated_at,
                }
            }
            None => WalletResponse {
                address: address.to_string(),
                k_wallet: None,
                tokens_analyzed: None,
                updated_at: None,
            },
        });
    }

    let requested = results.len();
    Ok(Json(WalletBatchResponse {
        summary: BatchSummary { requested, known, unknown: requested - known },
        results,
    }))
}

#[derive(Deserialize)]
pub struct TokenBatchRequest {
    mints: Vec<String>,
}

#[derive(Serialize)]
struct TokenBatchResponse {
    results: Vec<TokenResponse>,
    summary: TokenBatchSummary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenBatchSummary {
    requested: usize,
    ready: usize,
    queued: usize,
    syncing: usize,
    rejected: usize,
}

pub async fn tokens_batch<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Json(request): Json<TokenBatchRequest>,
) -> Result<Json<TokenBatchResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if request.mints.is_empty() {
        return Err(ApiError::bad_request("mints must not be empty"));
    }
    if request.mints.len() > MAX_TOKEN_BATCH {
        return Err(ApiError::bad_request(format!("at most {MAX_TOKEN_BATCH} mints per request")));
    }

    let mut results = Vec::with_capacity(request.mints.len());
    let (mut ready, mut queued, mut syncing, mut rejected) = (0usize, 0usize, 0usize, 0usize);

    for mint in &request.mints {
        let address = Address::from(mint.as_str());
        if !state.config.ecosystem.admits(address.as_str()) {
            rejected += 1;
            continue;
        }

        let status = state.token_scorer.status(&address).await?;
        match &status {
            TokenScoreStatus::Ready(_) => ready += 1,
            TokenScoreStatus::Queued => queued += 1,
            TokenScoreStatus::Syncing => syncing += 1,
        }
        results.push(token_response(&address, status));
    }

    Ok(Json(TokenBatchResponse {
        summary: TokenBatchSummary { requested: request.mints.len(), ready, queued, syncing, rejected },
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HoldersQuery {
    mint: Option<String>,
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HolderSummary {
    address: String,
    balance: String,
}

#[derive(Serialize)]
struct HoldersResponse {
    mint: String,
    holders: Vec<HolderSummary>,
    total: usize,
}

/// Unlike the dashboard's `/k-metric/holders` (cost-basis + classification, primary token only),
/// this is a thin passthrough to the Chain Adapter's live holder list for any admitted mint.
pub async fn holders<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Query(query): Query<HoldersQuery>,
) -> Result<Json<HoldersResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let mint = query.mint.map(|m| Address::from(m.as_str())).unwrap_or_else(|| state.config.token.mint.clone());
    if !state.config.ecosystem.admits(mint.as_str()) && mint != state.config.token.mint {
        return Err(ApiError::bad_request("mint is not part of the tracked ecosystem"));
    }

    let limit = clamp_limit(query.limit, 100, 1_000) as usize;
    let mut holders = state.chain_adapter.fetch_holders(&mint).await?;
    holders.truncate(limit);

    Ok(Json(HoldersResponse {
        mint: mint.to_string(),
        total: holders.len(),
        holders: holders
            .into_iter()
            .map(|h| HolderSummary { address: h.owner.to_string(), balance: h.balance.to_string() })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_tags_ready_variant() {
        let mint = Address::from("mint123");
        let response = token_response(
            &mint,
            TokenScoreStatus::Ready(scorer::token_scorer::TokenScoreResult {
                mint: mint.clone(),
                k: 42,
                holders: 10,
                computed_at: 0,
            }),
        );
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value["status"], "ready");
        assert_eq!(value["k"], 42);
    }
}
