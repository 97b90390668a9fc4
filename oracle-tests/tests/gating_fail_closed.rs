// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Gating fail-closed: when cross-token K is gated and both the balance check and the chain
//! adapter fallback come up empty/erroring, the gateway must answer 403 with
//! `kind: "verification_unavailable"` rather than fail open.

mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;

#[tokio::test]
async fn ungated_wallet_below_threshold_with_chain_adapter_down_is_rejected() {
    let store = support::sqlite_storage().await;
    let chain_adapter = support::FakeChainAdapter::new();
    chain_adapter.fail_holders(true).await;

    let mut config = support::gateway_config();
    config.k_global.gated = true;
    config.k_global.fail_closed = true;

    let state = support::app_state(store, chain_adapter, config).await;
    let router = gateway::application::router(state);

    // No wallet row exists for this address, so the balance check falls through to the chain
    // adapter, which is configured to fail.
    let request =
        Request::builder().uri("/k-metric/wallet/unknown-wallet/k-global").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["kind"], "verification_unavailable");
}

#[tokio::test]
async fn admin_key_bypasses_gating_even_with_chain_adapter_down() {
    let store = support::sqlite_storage().await;
    let chain_adapter = support::FakeChainAdapter::new();
    chain_adapter.fail_holders(true).await;

    let mut config = support::gateway_config();
    config.k_global.gated = true;
    config.k_global.fail_closed = true;
    let admin_key = "supersecret-admin-key".to_owned();
    config.admin_key = secrecy::SecretString::from(admin_key.clone());

    let state = support::app_state(store, chain_adapter, config).await;
    let router = gateway::application::router(state);

    let request = Request::builder()
        .uri("/k-metric/wallet/unknown-wallet/k-global")
        .header("x-admin-key", admin_key)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    // Gating is bypassed, so the request reaches the normal "no wallet yet" branch: queued.
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}
