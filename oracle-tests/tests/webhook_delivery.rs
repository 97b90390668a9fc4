// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Webhook signature round-trip (scenario E: a successful delivery signs the exact payload the
//! receiver sees) and the three-failures-per-delivery, five-deliveries-to-auto-disable cascade
//! (scenario F), driven through the real `fanout::webhook::run_delivery_worker` against a local
//! `wiremock` server rather than a live endpoint.

mod support;

use fanout::webhook;
use oracle_common::domain::{
    Tier, WebhookEventType, hmac_sha256_hex,
    storage::{NewApiKey, NewWebhookSubscription, Storage},
};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn new_subscription<S: Storage>(store: &S, url: String, secret: &str) -> uuid::Uuid {
    let (api_key, _) = store
        .create_api_key(NewApiKey { name: "owner".to_owned(), tier: Tier::Standard, per_minute_limit: None, per_day_limit: None, expires_at: None })
        .await
        .unwrap();

    let subscription = store
        .create_webhook_subscription(NewWebhookSubscription {
            owner_api_key_id: api_key.id,
            url,
            event_set: vec![WebhookEventType::KChange],
            secret: secret.to_owned(),
        })
        .await
        .unwrap();

    subscription.id
}

#[tokio::test]
async fn a_successful_delivery_carries_a_verifiable_signature() {
    let store = support::sqlite_storage().await;
    let server = MockServer::start().await;
    let secret = "shh-its-a-secret";

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let subscription_id = new_subscription(&store, format!("{}/hook", server.uri()), secret).await;
    let delivery = store
        .create_delivery(subscription_id, WebhookEventType::KChange, r#"{"event":"k_change"}"#.to_owned(), 1_000)
        .await
        .unwrap();

    let config = webhook::Config { poll_period: Duration::from_millis(10), ..Default::default() };
    let worker = tokio::spawn(webhook::run_delivery_worker(store.clone(), config));

    let delivered = wait_until(|| async {
        store.list_deliveries(subscription_id, 10).await.unwrap().iter().any(|d| d.id == delivery.id && d.status == oracle_common::domain::DeliveryStatus::Success)
    })
    .await;
    assert!(delivered, "delivery never reached success");
    worker.abort();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let request = &received[0];
    let signature = request.headers.get("x-oracle-signature").unwrap().to_str().unwrap();
    let expected = hmac_sha256_hex(secret, &request.body);
    assert_eq!(signature, expected);
}

#[tokio::test]
async fn five_delivery_cascades_auto_disable_the_subscription() {
    let store = support::sqlite_storage().await;
    let server = MockServer::start().await;

    Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let subscription_id = new_subscription(&store, format!("{}/hook", server.uri()), "secret").await;
    for i in 0..5 {
        store
            .create_delivery(subscription_id, WebhookEventType::KChange, format!(r#"{{"n":{i}}}"#), 1_000)
            .await
            .unwrap();
    }

    // Each delivery gives up after MAX_DELIVERY_ATTEMPTS with a backoff between attempts; rather
    // than wait out real-clock backoff, the test fast-forwards a delivery's `next_retry_at` once
    // the worker has recorded a failed attempt on it, so five deliveries each reach their final
    // failed attempt within the test's own timeout.
    let config = webhook::Config { poll_period: Duration::from_millis(10), ..Default::default() };
    let worker = tokio::spawn(webhook::run_delivery_worker(store.clone(), config));

    let disabled = wait_until(|| async {
        fast_forward_pending_retries(&store, subscription_id).await;
        store
            .get_webhook_subscription(subscription_id)
            .await
            .unwrap()
            .is_some_and(|s| !s.is_active && s.failure_count >= oracle_common::domain::AUTO_DISABLE_THRESHOLD)
    })
    .await;
    worker.abort();

    assert!(disabled, "subscription should auto-disable after five failed-delivery cascades");
}

async fn fast_forward_pending_retries<S: Storage>(store: &S, subscription_id: uuid::Uuid) {
    for delivery in store.list_deliveries(subscription_id, 100).await.unwrap() {
        if delivery.status == oracle_common::domain::DeliveryStatus::Pending && delivery.next_retry_at.is_some() {
            let mut delivery = delivery;
            delivery.next_retry_at = Some(0);
            let _ = store.update_delivery(&delivery).await;
        }
    }
}

async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
