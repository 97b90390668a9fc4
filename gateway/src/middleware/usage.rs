// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Records one request against the caller's daily usage counter, after the response has already
//! been produced. Runs as the last layer so it sees the final status, but the actual
//! `Storage::increment_usage` write is spawned rather than awaited inline — a slow or failing
//! usage write must never add latency to, or fail, the response the caller is waiting on.

use crate::{handlers::now_unix, middleware::api_key::Identity, state::AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{Publisher, storage::Storage, usage_date_key};

pub async fn record<S, C, P>(State(state): State<AppState<S, C, P>>, req: Request, next: Next) -> Response
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    let identity = req.extensions().get::<Identity>().copied();
    let response = next.run(req).await;

    if let Some(Identity { api_key_id: Some(key_id), .. }) = identity {
        let store = state.store.clone();
        tokio::spawn(async move {
            let date = usage_date_key(now_unix());
            if let Err(error) = store.increment_usage(key_id, &date).await {
                log::warn!(error:%, key_id:%; "failed to record api usage");
            }
        });
    }

    response
}
