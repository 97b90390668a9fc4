// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Outbound webhook dispatch: on each relevant [`OracleEvent`], find every active subscription
//! for that event type and queue a [`WebhookDelivery`] row; a periodic worker claims pending
//! deliveries, signs and POSTs them, and applies the delivery's own retry/backoff and the
//! subscription's auto-disable bookkeeping. `threshold_alert` has no dedicated `OracleEvent`
//! variant (nothing in the core publishes one) — it's raised here, by watching `KChange` events
//! against a configured list of K thresholds and firing when a new value crosses one.

use anyhow::Context;
use futures::{StreamExt, stream};
use log::{debug, warn};
use oracle_common::domain::{
    KChange, OracleEvent, StoreError, Subscriber, Timestamp, WebhookEnvelope, WebhookEventType,
    hmac_sha256_hex, storage::Storage,
};
use serde::{Deserialize, Serialize};
use std::{num::NonZeroUsize, time::Duration};
use thiserror::Error;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde", default = "default_poll_period")]
    pub poll_period: Duration,

    #[serde(default = "default_claim_limit")]
    pub claim_limit: u32,

    #[serde(default = "default_concurrency")]
    pub concurrency: NonZeroUsize,

    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub http_timeout: Duration,

    /// K values (ascending) whose crossing raises a `threshold_alert`. Empty disables the check.
    #[serde(default)]
    pub alert_thresholds: Vec<u8>,
}

fn default_poll_period() -> Duration {
    Duration::from_secs(30)
}

fn default_claim_limit() -> u32 {
    20
}

fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(8).unwrap()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_period: default_poll_period(),
            claim_limit: default_claim_limit(),
            concurrency: default_concurrency(),
            http_timeout: default_http_timeout(),
            alert_thresholds: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error")]
    Store(#[from] StoreError),

    #[error("failed to serialize webhook payload")]
    Serialize(#[from] serde_json::Error),
}

/// Queues a delivery row for every active subscription subscribed to `event_type`. Called once
/// per relevant [`OracleEvent`] by [`run_event_watcher`].
async fn dispatch<S, T>(store: &S, event_type: WebhookEventType, data: &T, now: Timestamp) -> Result<(), DispatchError>
where
    S: Storage,
    T: Serialize,
{
    let subscriptions = store.active_subscriptions_for_event(event_type).await?;
    if subscriptions.is_empty() {
        return Ok(());
    }

    let envelope = WebhookEnvelope { event: event_type.as_str(), timestamp: now, data };
    let payload_json = serde_json::to_string(&envelope)?;

    for subscription in subscriptions {
        store.create_delivery(subscription.id, event_type, payload_json.clone(), now).await?;
    }

    Ok(())
}

/// Watches the event bus and turns qualifying events into queued deliveries. `KChange` also
/// feeds the threshold-crossing check (see module docs).
pub async fn run_event_watcher<S, Sub>(store: S, subscriber: Sub, thresholds: Vec<u8>) -> anyhow::Result<()>
where
    S: Storage,
    Sub: Subscriber,
{
    let mut stream = subscriber.subscribe();
    let mut last_k: Option<u8> = None;

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped; "webhook dispatcher lagged behind the event bus");
                continue;
            }
        };

        let now = now_unix();
        let outcome = match &event {
            OracleEvent::KChange(change) => {
                let result = dispatch(&store, WebhookEventType::KChange, change, now).await;
                check_thresholds(&store, &thresholds, &mut last_k, change, now).await;
                result
            }
            OracleEvent::HolderNew(holder) => dispatch(&store, WebhookEventType::HolderNew, holder, now).await,
            OracleEvent::HolderExit(holder) => dispatch(&store, WebhookEventType::HolderExit, holder, now).await,
            OracleEvent::Tx(_) | OracleEvent::WalletScored(_) | OracleEvent::TokenScored(_) => Ok(()),
        };

        if let Err(error) = outcome {
            warn!(error:%; "failed to queue webhook delivery");
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct ThresholdAlertPayload {
    threshold: u8,
    direction: &'static str,
    current_k: u8,
    message: String,
}

async fn check_thresholds<S>(store: &S, thresholds: &[u8], last_k: &mut Option<u8>, change: &KChange, now: Timestamp)
where
    S: Storage,
{
    let previous = last_k.unwrap_or(change.previous_k);
    *last_k = Some(change.new_k);

    for &threshold in thresholds {
        let crossed_up = previous < threshold && change.new_k >= threshold;
        let crossed_down = previous >= threshold && change.new_k < threshold;
        if !crossed_up && !crossed_down {
            continue;
        }

        let direction = if crossed_up { "up" } else { "down" };
        let payload = ThresholdAlertPayload {
            threshold,
            direction,
            current_k: change.new_k,
            message: format!("K crossed the {threshold} threshold going {direction}"),
        };

        if let Err(error) = dispatch(store, WebhookEventType::ThresholdAlert, &payload, now).await {
            warn!(error:%, threshold; "failed to queue threshold_alert delivery");
        }
    }
}

/// Claims and attempts delivery for pending rows, forever, until cancelled.
pub async fn run_delivery_worker<S>(store: S, config: Config) -> anyhow::Result<()>
where
    S: Storage,
{
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("build webhook delivery HTTP client")?;

    let mut interval = tokio::time::interval(config.poll_period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let now = now_unix();

        let deliveries = store
            .claim_pending_deliveries(config.claim_limit, now)
            .await
            .context("claim pending webhook deliveries")?;

        if deliveries.is_empty() {
            continue;
        }

        stream::iter(deliveries)
            .map(|delivery| {
                let store = store.clone();
                let client = client.clone();
                async move {
                    if let Err(error) = attempt_delivery(&store, &client, delivery, now).await {
                        warn!(error:%; "webhook delivery attempt failed unexpectedly");
                    }
                }
            })
            .buffer_unordered(config.concurrency.get())
            .collect::<Vec<()>>()
            .await;
    }
}

async fn attempt_delivery<S>(
    store: &S,
    client: &reqwest::Client,
    mut delivery: oracle_common::domain::WebhookDelivery,
    now: Timestamp,
) -> Result<(), StoreError>
where
    S: Storage,
{
    let Some(mut subscription) = store.get_webhook_subscription(delivery.subscription_id).await? else {
        delivery.record_attempt_failure(now, None, Some("subscription no longer exists".to_owned()));
        store.update_delivery(&delivery).await?;
        return Ok(());
    };

    if !subscription.is_active {
        delivery.record_attempt_failure(now, None, Some("subscription is inactive".to_owned()));
        store.update_delivery(&delivery).await?;
        return Ok(());
    }

    let body = delivery.payload_json.clone();
    let signature = hmac_sha256_hex(&subscription.secret, body.as_bytes());

    let response = client
        .post(&subscription.url)
        .header("X-Oracle-Signature", signature)
        .header("X-Oracle-Event", delivery.event_type.as_str())
        .header("X-Oracle-Timestamp", now.to_string())
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            let code = response.status().as_u16();
            delivery.record_success(now, code);
            subscription.record_success(now);
            store.update_delivery(&delivery).await?;
            store.update_webhook_subscription(&subscription).await?;
            debug!(subscription_id:% = subscription.id, code; "webhook delivered");
        }
        Ok(response) => {
            let code = response.status().as_u16();
            let body = response.text().await.ok();
            let cascade_failed = delivery.record_attempt_failure(now, Some(code), body);
            store.update_delivery(&delivery).await?;
            if cascade_failed {
                record_subscription_failure(store, &mut subscription).await?;
            }
        }
        Err(error) => {
            let cascade_failed = delivery.record_attempt_failure(now, None, Some(error.to_string()));
            store.update_delivery(&delivery).await?;
            if cascade_failed {
                record_subscription_failure(store, &mut subscription).await?;
            }
        }
    }

    Ok(())
}

async fn record_subscription_failure<S>(
    store: &S,
    subscription: &mut oracle_common::domain::WebhookSubscription,
) -> Result<(), StoreError>
where
    S: Storage,
{
    let auto_disabled = subscription.record_failure();
    store.update_webhook_subscription(subscription).await?;
    if auto_disabled {
        warn!(subscription_id:% = subscription.id; "webhook subscription auto-disabled after repeated delivery failures");
    }
    Ok(())
}

fn now_unix() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_common::domain::{Direction as Dir, KChange};

    fn change(previous_k: u8, new_k: u8) -> KChange {
        KChange { previous_k, new_k, delta: new_k as i16 - previous_k as i16, holders: 10, direction: if new_k >= previous_k { Dir::Up } else { Dir::Down } }
    }

    async fn test_storage() -> oracle_common::infra::storage::SqliteStorage {
        let dir = tempfile::tempdir().unwrap();
        let cnn_url = dir.path().join("test.sqlite").display().to_string();
        let pool = oracle_common::infra::pool::SqlitePool::new(oracle_common::infra::pool::Config {
            cnn_url,
            ..Default::default()
        })
        .await
        .unwrap();
        oracle_common::infra::migrations::run(&pool).await.unwrap();
        std::mem::forget(dir);
        oracle_common::infra::storage::SqliteStorage::new(pool)
    }

    #[tokio::test]
    async fn threshold_crossing_queues_an_alert_delivery() {
        let store = test_storage().await;
        let new_key = store
            .create_api_key(oracle_common::domain::storage::NewApiKey {
                name: "owner".into(),
                tier: oracle_common::domain::Tier::Free,
                per_minute_limit: None,
                per_day_limit: None,
                expires_at: None,
            })
            .await
            .unwrap();
        let subscription = store
            .create_webhook_subscription(oracle_common::domain::storage::NewWebhookSubscription {
                owner_api_key_id: new_key.0.id,
                url: "https://example.com/hook".into(),
                event_set: vec![WebhookEventType::ThresholdAlert],
                secret: "s".into(),
            })
            .await
            .unwrap();

        let mut last_k = Some(40);
        check_thresholds(&store, &[50], &mut last_k, &change(40, 60), 1_000).await;

        let deliveries = store.list_deliveries(subscription.id, 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event_type, WebhookEventType::ThresholdAlert);

        // Staying on the same side of every threshold queues nothing further.
        let mut still_above = Some(60);
        check_thresholds(&store, &[50], &mut still_above, &change(60, 65), 2_000).await;
        let deliveries = store.list_deliveries(subscription.id, 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
    }
}
