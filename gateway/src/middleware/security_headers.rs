// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! `X-Content-Type-Options`/`X-Frame-Options` on every response; HSTS and an HTTPS redirect when
//! `production` is set (the Gateway itself never terminates TLS — it trusts `X-Forwarded-Proto`
//! from the terminating proxy, same as any reverse-proxied axum service).

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chain_adapter::domain::ChainAdapter;
use oracle_common::domain::{Publisher, storage::Storage};

static X_CONTENT_TYPE_OPTIONS: HeaderName = HeaderName::from_static("x-content-type-options");
static X_FRAME_OPTIONS: HeaderName = HeaderName::from_static("x-frame-options");
static STRICT_TRANSPORT_SECURITY: HeaderName = HeaderName::from_static("strict-transport-security");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

pub async fn apply<S, C, P>(State(state): State<AppState<S, C, P>>, req: Request, next: Next) -> Response
where
    S: Storage,
    C: ChainAdapter,
    P: Publisher,
{
    if state.config.production {
        let proto = req.headers().get(&X_FORWARDED_PROTO).and_then(|v| v.to_str().ok());
        if let Some(proto) = proto {
            if proto != "https" {
                let host = req
                    .headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let location = format!("https://{host}{}", req.uri());
                return Redirect::permanent(&location).into_response();
            }
        }
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(X_CONTENT_TYPE_OPTIONS.clone(), HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS.clone(), HeaderValue::from_static("DENY"));
    if state.config.production {
        headers.insert(
            STRICT_TRANSPORT_SECURITY.clone(),
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}
