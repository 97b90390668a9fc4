// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Resolves the caller's identity from the `X-Oracle-Key` header. A missing or unrecognized key
//! falls back to `Tier::Public` rather than rejecting the request outright — most routes are
//! readable anonymously at the public tier's (tighter) rate limit; individual handlers that
//! require a key at all (admin routes, webhook management) check `Identity::api_key_id` themselves.
//!
//! Lookups are cached for [`API_KEY_CACHE_TTL`](crate::state), positive and negative alike, since
//! every request pays this cost. A Store error while validating is treated the same as "no such
//! key": we fail open to anonymous access rather than making the Store a single point of failure
//! for read traffic the Store itself doesn't gate.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::Response,
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{ApiKey, Publisher, Tier, storage::Storage};
use uuid::Uuid;

static X_ORACLE_KEY: HeaderName = HeaderName::from_static("x-oracle-key");

/// What the per-key cache stores. `Unknown` is cached too, so a flood of bogus keys doesn't turn
/// into a flood of Store lookups.
#[derive(Debug, Clone)]
pub enum CachedApiKey {
    Valid(ApiKey),
    Unknown,
}

/// Attached to the request as an extension by [`resolve`]; handlers read it via
/// `Extension<Identity>` to know who's calling and at what tier.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub tier: Tier,
    pub api_key_id: Option<Uuid>,
    pub per_minute_limit: Option<u32>,
    pub per_day_limit: Option<u32>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Identity { tier: Tier::Public, api_key_id: None, per_minute_limit: None, per_day_limit: None }
    }

    pub fn rate_limit_key(&self, fallback_ip: &str) -> String {
        match self.api_key_id {
            Some(id) => id.to_string(),
            None => format!("ip:{fallback_ip}"),
        }
    }
}

pub async fn resolve<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    mut req: Request,
    next: Next,
) -> Response
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let plaintext = req.headers().get(&X_ORACLE_KEY).and_then(|v| v.to_str().ok()).map(str::to_owned);

    let identity = match plaintext {
        None => Identity::anonymous(),
        Some(plaintext) => match lookup(&state, &plaintext).await {
            CachedApiKey::Valid(api_key) if api_key.is_usable_at(now()) => Identity {
                tier: api_key.tier,
                api_key_id: Some(api_key.id),
                per_minute_limit: api_key.per_minute_limit,
                per_day_limit: api_key.per_day_limit,
            },
            CachedApiKey::Valid(_) | CachedApiKey::Unknown => Identity::anonymous(),
        },
    };

    req.extensions_mut().insert(identity);
    next.run(req).await
}

async fn lookup<S, C, P>(state: &AppState<S, C, P>, plaintext: &str) -> CachedApiKey
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if let Some(cached) = state.api_key_cache.get(&plaintext.to_owned()) {
        return cached;
    }

    let resolved = match state.store.validate_api_key(plaintext).await {
        Ok(Some(api_key)) => CachedApiKey::Valid(api_key),
        Ok(None) => CachedApiKey::Unknown,
        Err(error) => {
            log::warn!(error:%; "api key lookup failed, treating request as anonymous");
            return CachedApiKey::Unknown;
        }
    };

    state.api_key_cache.insert(plaintext.to_owned(), resolved.clone());
    resolved
}

fn now() -> oracle_common::domain::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
