// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Route handlers, grouped the way spec.md groups the external surface: the dashboard (primary
//! token read models plus the inbound webhook/sync/backup triggers), the external oracle API
//! (arbitrary-mint lookups, batch endpoints), webhook subscription management, and the
//! admin-key-gated operator surface.

pub mod admin;
pub mod dashboard;
pub mod external;
pub mod webhooks;

use axum::http::{HeaderMap, HeaderName};
use oracle_common::domain::Timestamp;
use secrecy::{ExposeSecret, SecretString};

static X_ADMIN_KEY: HeaderName = HeaderName::from_static("x-admin-key");

pub(crate) fn now_unix() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Byte-length-then-XOR comparison: length is revealed (both sides are fixed-format secrets of
/// known shape), but content never short-circuits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Checks the `X-Admin-Key` header against the configured admin key. No key or a mismatched key
/// is treated identically by the caller (401), so this is the only place that needs to compare in
/// constant time.
pub(crate) fn check_admin_key(headers: &HeaderMap, admin_key: &SecretString) -> bool {
    headers
        .get(&X_ADMIN_KEY)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| constant_time_eq(provided.as_bytes(), admin_key.expose_secret().as_bytes()))
}

/// Clamps a caller-supplied `limit` query param to `(0, max]`, defaulting to `default` when
/// absent — shared by every endpoint that paginates a Store read.
pub(crate) fn clamp_limit(limit: Option<u32>, default: u32, max: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, max)
}
