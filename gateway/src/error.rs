// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! A stable `{error, kind}` JSON envelope for every failure response the Gateway returns, so
//! external API consumers and the dashboard share one error shape.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chain_adapter::domain::ChainAdapterError;
use ingest::pipeline::IngestError;
use log::warn;
use oracle_common::domain::StoreError;
use scorer::token_scorer::TokenScoreError;
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: Option<&'static str>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError { status, message: message.into(), kind: None, retry_after_secs: None }
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::NOT_FOUND, message)
    }

    pub fn too_many_requests(kind: &'static str, retry_after_secs: u64) -> Self {
        ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            .with_kind(kind)
            .with_retry_after(retry_after_secs)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), message = self.message.as_str(); "request failed");
        }

        let body = ErrorBody { error: &self.message, kind: self.kind };
        let mut response = (self.status, axum::Json(body)).into_response();

        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::internal(error.to_string())
    }
}

impl From<ChainAdapterError> for ApiError {
    fn from(error: ChainAdapterError) -> Self {
        match error {
            ChainAdapterError::Transient(_) => ApiError::service_unavailable(error.to_string()),
            ChainAdapterError::Fatal(_) => ApiError::internal(error.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Store(store_error) => store_error.into(),
            IngestError::Other(_) => ApiError::internal(error.to_string()),
        }
    }
}

impl From<TokenScoreError> for ApiError {
    fn from(error: TokenScoreError) -> Self {
        match error {
            TokenScoreError::Store(store_error) => store_error.into(),
            TokenScoreError::ChainAdapter(chain_error) => chain_error.into(),
        }
    }
}

/// Helper for handlers that need to attach extra headers (e.g. rate-limit headers) without
/// fighting `IntoResponse`'s consuming signature.
pub fn with_headers(mut response: Response, headers: HeaderMap) -> Response {
    response.headers_mut().extend(headers);
    response
}
