// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Rate-limit ceiling: an anonymous (public-tier) caller gets exactly `Tier::Public`'s
//! per-minute allowance before the gateway router starts answering 429, with the documented
//! `kind`/`Retry-After`/`X-RateLimit-Remaining` shape.

mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;

#[tokio::test]
async fn public_tier_is_blocked_once_the_per_minute_ceiling_is_reached() {
    let store = support::sqlite_storage().await;
    let chain_adapter = support::FakeChainAdapter::new();
    let config = support::gateway_config();
    let state = support::app_state(store, chain_adapter, config).await;
    let router = gateway::application::router(state);

    let limit = oracle_common::domain::Tier::Public.per_minute_limit().unwrap();

    for i in 0..limit {
        let request = Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} of the allowance should succeed");
    }

    let request = Request::builder().uri("/api/v1/status").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let remaining = response.headers().get("x-ratelimit-remaining").unwrap().to_str().unwrap();
    assert_eq!(remaining, "0");
    let retry_after: u64 = response.headers().get("retry-after").unwrap().to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["kind"], "minute_limit_exceeded");
}
