// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Builds the axum `Router` and serves it. Mirrors `spo_api::infra::api`'s `make_app`/`serve`
//! split but generic over `Storage`/`ChainAdapter`/`Publisher` rather than tied to one concrete
//! backend, since this Gateway (unlike the teacher's single-purpose SPO API) is assembled by
//! `oracle-standalone` with whatever Store/Chain Adapter/Publisher that binary wires up.

use crate::{
    handlers::{admin, dashboard, external, webhooks},
    middleware::{api_key, cors, cors::CorsPolicy, rate_limit, request_id, security_headers, usage},
    state::AppState,
    ws,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use chain_adapter::domain::ChainAdapter;
use log::info;
use oracle_common::domain::{storage::Storage, Publisher};
use std::{io, net::SocketAddr};
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("cannot bind tcp listener")]
    Bind(#[source] io::Error),

    #[error("cannot serve gateway")]
    Serve(#[source] io::Error),
}

/// Builds the full router: every handler route, then the middleware stack applied in the order
/// `middleware` documents (security headers outermost, usage accounting innermost — a request
/// passes through the list top-to-bottom, the response back through it bottom-to-top).
pub fn router<S, C, P>(state: AppState<S, C, P>) -> Router
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let cors_policy = CorsPolicy::new(&state.config.cors_origins);
    let body_limit = state.config.request_body_limit_bytes as usize;

    let dashboard_routes = Router::new()
        .route("/k-metric", get(dashboard::k_metric))
        .route("/k-metric/history", get(dashboard::history))
        .route("/k-metric/holders", get(dashboard::holders))
        .route("/k-metric/status", get(dashboard::status))
        .route("/k-metric/wallet/{addr}/k-score", get(dashboard::k_score))
        .route("/k-metric/wallet/{addr}/k-global", get(dashboard::k_global))
        .route("/k-metric/webhook", post(dashboard::webhook))
        .route("/k-metric/sync", post(dashboard::trigger_sync))
        .route("/k-metric/backup", post(dashboard::trigger_backup));

    let external_routes = Router::new()
        .route("/api/v1/status", get(external::status))
        .route("/api/v1/token/{mint}", get(external::token))
        .route("/api/v1/wallet/{addr}", get(external::wallet))
        .route("/api/v1/wallets", post(external::wallets_batch))
        .route("/api/v1/tokens", post(external::tokens_batch))
        .route("/api/v1/holders", get(external::holders));

    let webhook_routes = Router::new()
        .route("/api/v1/webhooks/events", get(webhooks::events))
        .route("/api/v1/webhooks", get(webhooks::list).post(webhooks::create))
        .route("/api/v1/webhooks/{id}", get(webhooks::get).delete(webhooks::delete))
        .route("/api/v1/webhooks/{id}/deliveries", get(webhooks::deliveries));

    let admin_routes = Router::new()
        .route("/api/v1/admin/api-keys", get(admin::list_api_keys).post(admin::create_api_key))
        .route("/api/v1/admin/api-keys/{id}", delete(admin::revoke_api_key))
        .route("/api/v1/admin/usage", get(admin::usage_stats))
        .route("/api/v1/admin/k/trigger", post(admin::trigger_k))
        .route("/api/v1/admin/k-wallet/backfill", post(admin::backfill_k_wallet))
        .route("/api/v1/admin/queues", get(admin::queue_status));

    Router::new()
        .route("/healthz", get(health))
        .route("/ws", get(ws::upgrade))
        .merge(dashboard_routes)
        .merge(external_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), security_headers::apply))
                .layer(middleware::from_fn(move |req, next| {
                    cors::apply(cors_policy.clone(), req, next)
                }))
                .layer(middleware::from_fn_with_state(state.clone(), api_key::resolve))
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit::apply))
                .layer(RequestBodyLimitLayer::new(body_limit))
                .layer(middleware::from_fn(request_id::apply))
                .layer(middleware::from_fn_with_state(state.clone(), usage::record)),
        )
        .with_state(state)
}

async fn health<S, C, P>(State(state): State<AppState<S, C, P>>) -> impl IntoResponse
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if state.is_in_maintenance() {
        (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
    } else {
        StatusCode::OK.into_response()
    }
}

/// Binds and serves `router(state)` until SIGTERM, the same graceful-shutdown shape every other
/// binary in this workspace uses.
pub async fn serve<S, C, P>(
    state: AppState<S, C, P>,
    mut sigterm: Signal,
) -> Result<(), ServeError>
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let address = state.config.address;
    let port = state.config.port;
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind((address, port)).await.map_err(ServeError::Bind)?;
    info!(address:?, port; "gateway listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            sigterm.recv().await;
        })
        .await
        .map_err(ServeError::Serve)
}

pub fn sigterm() -> io::Result<Signal> {
    signal(SignalKind::terminate())
}
