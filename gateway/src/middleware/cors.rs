// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Origin allow-list with single-wildcard-segment patterns (`https://*.example.com`). Unlike
//! `tower_http::cors::CorsLayer::permissive()` (the teacher's choice for its own, closed, API),
//! a disallowed preflight here must be rejected outright with 403 rather than merely omitting the
//! CORS response headers — so this is hand-rolled rather than configured through `CorsLayer`.
//! Requests with no `Origin` header (same-origin, curl, server-to-server) always pass.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use regex::Regex;
use std::sync::Arc;

static ORIGIN: HeaderName = HeaderName::from_static("origin");
static ACCESS_CONTROL_REQUEST_METHOD: HeaderName = HeaderName::from_static("access-control-request-method");
static ACCESS_CONTROL_ALLOW_ORIGIN: HeaderName = HeaderName::from_static("access-control-allow-origin");
static ACCESS_CONTROL_ALLOW_METHODS: HeaderName = HeaderName::from_static("access-control-allow-methods");
static ACCESS_CONTROL_ALLOW_HEADERS: HeaderName = HeaderName::from_static("access-control-allow-headers");
static VARY: HeaderName = HeaderName::from_static("vary");

/// Precompiled allow-list, built once from `Config::cors_origins` at startup.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    patterns: Arc<Vec<Regex>>,
}

impl CorsPolicy {
    pub fn new(origins: &[String]) -> Self {
        let patterns = origins
            .iter()
            .filter_map(|pattern| {
                let escaped = regex::escape(pattern).replace("\\*", "[^.]*");
                Regex::new(&format!("^{escaped}$")).ok()
            })
            .collect();
        CorsPolicy { patterns: Arc::new(patterns) }
    }

    fn allows(&self, origin: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(origin))
    }
}

pub async fn apply(policy: CorsPolicy, req: Request, next: Next) -> Response {
    let origin = req.headers().get(&ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_owned);

    let Some(origin) = origin else {
        // No Origin header: same-origin or a non-browser client. Nothing to enforce.
        return next.run(req).await;
    };

    if !policy.allows(&origin) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let is_preflight =
        req.method() == Method::OPTIONS && req.headers().contains_key(&ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if is_preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN.clone(), value);
    }
    headers.insert(VARY.clone(), HeaderValue::from_static("Origin"));
    if is_preflight {
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS.clone(),
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS.clone(),
            HeaderValue::from_static("content-type, x-oracle-key"),
        );
    }

    response
}
