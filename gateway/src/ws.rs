// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The `GET /ws` upgrade endpoint. Tier comes from the same `X-Oracle-Key`/query-param resolution
//! as the REST surface (browsers can't set arbitrary headers on a WS handshake, so a `key` query
//! parameter is accepted too) and is handed to `Registry::accept`, which does the actual framing.

use crate::state::AppState;
use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{Publisher, Tier, storage::Storage};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    key: Option<String>,
}

pub async fn upgrade<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let plaintext = query.key.unwrap_or_default();
    let tier = resolve_tier(&state, &plaintext).await;
    let registry = state.registry.clone();

    ws.on_upgrade(move |socket| async move {
        if let Err(error) = registry.accept(socket, plaintext, tier).await {
            log::debug!(error:%; "websocket connection rejected");
        }
    })
    .into_response()
}

async fn resolve_tier<S, C, P>(state: &AppState<S, C, P>, plaintext: &str) -> Tier
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if plaintext.is_empty() {
        return Tier::Public;
    }

    if let Some(cached) = state.api_key_cache.get(&plaintext.to_owned()) {
        return tier_of(cached);
    }

    match state.store.validate_api_key(plaintext).await {
        Ok(Some(api_key)) => {
            let tier = api_key.tier;
            state
                .api_key_cache
                .insert(plaintext.to_owned(), crate::middleware::api_key::CachedApiKey::Valid(api_key));
            tier
        }
        Ok(None) => {
            state
                .api_key_cache
                .insert(plaintext.to_owned(), crate::middleware::api_key::CachedApiKey::Unknown);
            Tier::Public
        }
        Err(error) => {
            log::warn!(error:%; "api key lookup failed during websocket upgrade, defaulting to public tier");
            Tier::Public
        }
    }
}

fn tier_of(cached: crate::middleware::api_key::CachedApiKey) -> Tier {
    match cached {
        crate::middleware::api_key::CachedApiKey::Valid(api_key) => api_key.tier,
        crate::middleware::api_key::CachedApiKey::Unknown => Tier::Public,
    }
}
