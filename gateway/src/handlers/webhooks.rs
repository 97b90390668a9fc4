// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! `/api/v1/webhooks/*`: subscription CRUD and delivery history. Pure Storage reads/writes —
//! dispatch itself is `fanout::webhook`'s background worker's job, not a handler's.

use crate::{error::ApiError, handlers::clamp_limit, middleware::api_key::Identity, state::AppState};
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{
    storage::{NewWebhookSubscription, Storage},
    Publisher, WebhookDelivery, WebhookEventType, WebhookSubscription,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

const ALL_EVENT_TYPES: [WebhookEventType; 4] = [
    WebhookEventType::KChange,
    WebhookEventType::HolderNew,
    WebhookEventType::HolderExit,
    WebhookEventType::ThresholdAlert,
];

pub async fn events() -> Json<Vec<&'static str>> {
    Json(ALL_EVENT_TYPES.iter().map(|e| e.as_str()).collect())
}

/// What a subscription CRUD response shows; the signing secret is write-only, never echoed back
/// after creation.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResponse {
    id: Uuid,
    url: String,
    event_set: Vec<&'static str>,
    is_active: bool,
    failure_count: u32,
    last_triggered_at: Option<i64>,
}

impl From<WebhookSubscription> for SubscriptionResponse {
    fn from(subscription: WebhookSubscription) -> Self {
        SubscriptionResponse {
            id: subscription.id,
            url: subscription.url,
            event_set: subscription.event_set.iter().map(|e| e.as_str()).collect(),
            is_active: subscription.is_active,
            failure_count: subscription.failure_count,
            last_triggered_at: subscription.last_triggered_at,
        }
    }
}

fn require_api_key(identity: &Identity) -> Result<Uuid, ApiError> {
    identity.api_key_id.ok_or_else(|| ApiError::unauthorized("an API key is required to manage webhooks"))
}

pub async fn list<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<SubscriptionResponse>>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let owner = require_api_key(&identity)?;
    let subscriptions = state.store.list_webhook_subscriptions(Some(owner)).await?;
    Ok(Json(subscriptions.into_iter().map(SubscriptionResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    url: String,
    events: Vec<String>,
    secret: String,
}

pub async fn create<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let owner = require_api_key(&identity)?;

    if !request.url.starts_with("https://") && !request.url.starts_with("http://") {
        return Err(ApiError::bad_request("url must be an absolute http(s) URL"));
    }
    if request.events.is_empty() {
        return Err(ApiError::bad_request("events must not be empty"));
    }
    if request.secret.len() < 16 {
        return Err(ApiError::bad_request("secret must be at least 16 bytes"));
    }

    let event_set = request
        .events
        .iter()
        .map(|e| WebhookEventType::from_str(e))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| ApiError::bad_request(error.to_string()))?;

    let subscription = state
        .store
        .create_webhook_subscription(NewWebhookSubscription {
            owner_api_key_id: owner,
            url: request.url,
            event_set,
            secret: request.secret,
        })
        .await?;

    Ok(Json(subscription.into()))
}

async fn owned_subscription<S, C, P>(
    state: &AppState<S, C, P>,
    identity: &Identity,
    id: Uuid,
) -> Result<WebhookSubscription, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let owner = require_api_key(identity)?;
    let subscription = state
        .store
        .get_webhook_subscription(id)
        .await?
        .ok_or_else(|| ApiError::not_found("webhook subscription not found"))?;

    if subscription.owner_api_key_id != owner {
        // Same response as not-found: existence of another key's subscription isn't disclosed.
        return Err(ApiError::not_found("webhook subscription not found"));
    }

    Ok(subscription)
}

pub async fn get<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let subscription = owned_subscription(&state, &identity, id).await?;
    Ok(Json(subscription.into()))
}

pub async fn delete<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    owned_subscription(&state, &identity, id).await?;
    state.store.delete_webhook_subscription(id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    limit: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryResponse {
    id: Uuid,
    event_type: &'static str,
    status: &'static str,
    attempts: u32,
    response_code: Option<u16>,
    next_retry_at: Option<i64>,
    created_at: i64,
    completed_at: Option<i64>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(delivery: WebhookDelivery) -> Self {
        DeliveryResponse {
            id: delivery.id,
            event_type: delivery.event_type.as_str(),
            status: delivery.status.as_str(),
            attempts: delivery.attempts,
            response_code: delivery.response_code,
            next_retry_at: delivery.next_retry_at,
            created_at: delivery.created_at,
            completed_at: delivery.completed_at,
        }
    }
}

pub async fn deliveries<S, C, P>(
    State(state): State<AppState<S, C, P>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Vec<DeliveryResponse>>, ApiError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    owned_subscription(&state, &identity, id).await?;
    let limit = clamp_limit(query.limit, 50, 500);
    let deliveries = state.store.list_deliveries(id, limit).await?;
    Ok(Json(deliveries.into_iter().map(DeliveryResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_lists_all_four_types() {
        assert_eq!(ALL_EVENT_TYPES.len(), 4);
    }
}
