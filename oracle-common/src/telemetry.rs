// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Logging, tracing and metrics setup, shared by every conviction-oracle binary. Logging goes
//! through `log` + `logforth`; spans go through `fastrace`, optionally exported to an OTLP
//! collector; request/queue counters go through `metrics`, scraped by Prometheus.

use fastrace::collector::Config as FastraceConfig;
use fastrace_opentelemetry::OpenTelemetryReporter;
use logforth::append;
use opentelemetry::InstrumentationScope;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(rename = "tracing", default)]
    pub tracing_config: TracingConfig,

    #[serde(rename = "metrics", default)]
    pub metrics_config: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    /// Enable OTLP span export. When `false`, spans are collected in-process only (cheap no-op
    /// reporter), which is the default for local/standalone runs.
    pub enabled: bool,

    pub otlp_endpoint: String,

    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_owned(),
            service_name: "conviction-oracle".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,

    pub listen_on: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_on: ([0, 0, 0, 0], 9464).into(),
        }
    }
}

/// Installs the `log` backend. Must be called once, at process start, before any other
/// initialization so that early errors (e.g. config load failures) are still logged.
pub fn init_logging() {
    logforth::builder()
        .dispatch(|d| d.append(append::Stderr::default()))
        .apply();
}

/// Installs the `fastrace` span reporter. A no-op when tracing is disabled, so spans are still
/// collected (cheaply) but never exported.
pub fn init_tracing(config: TracingConfig) {
    if !config.enabled {
        fastrace::set_reporter(fastrace::collector::ConsoleReporter, FastraceConfig::default());
        return;
    }

    let exporter = match SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(error) => {
            log::error!(error:%; "cannot build OTLP span exporter, tracing disabled");
            return;
        }
    };

    let reporter = OpenTelemetryReporter::new(
        exporter,
        opentelemetry::trace::SpanKind::Server,
        std::borrow::Cow::Owned(Resource::builder().with_service_name(config.service_name.clone()).build()),
        InstrumentationScope::builder(config.service_name).build(),
    );

    fastrace::set_reporter(reporter, FastraceConfig::default());
}

/// Installs the Prometheus metrics exporter. No-op (counters still record but are never served)
/// when disabled.
pub fn init_metrics(config: MetricsConfig) {
    if !config.enabled {
        return;
    }

    if let Err(error) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.listen_on)
        .install()
    {
        log::error!(error:%, listen_on:% = config.listen_on; "cannot install Prometheus exporter, metrics disabled");
    }
}

/// Common metric names, kept here so producers and dashboards agree on spelling.
pub mod metric_names {
    pub const INGEST_BATCH_SIZE: &str = "oracle_ingest_batch_size";
    pub const INGEST_LAG_SLOTS: &str = "oracle_ingest_lag_slots";
    pub const QUEUE_DEPTH: &str = "oracle_queue_depth";
    pub const WEBHOOK_DELIVERY_ATTEMPTS: &str = "oracle_webhook_delivery_attempts_total";
    pub const WEBHOOK_DELIVERY_FAILURES: &str = "oracle_webhook_delivery_failures_total";
    pub const HTTP_REQUESTS: &str = "oracle_http_requests_total";
    pub const WS_CONNECTIONS: &str = "oracle_ws_connections";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_config_defaults_disabled() {
        let config = TracingConfig::default();
        assert!(!config.enabled);
    }

    #[test]
    fn metrics_config_defaults_enabled() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
    }
}
