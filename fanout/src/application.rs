// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Wires the WebSocket registry (bus forwarder + heartbeat ticker) and the webhook dispatcher
//! (event watcher + delivery worker) into the process's task set. Mirrors
//! `scorer::application::run`'s shape: each long-lived activity is its own task, raced together
//! with an owned SIGTERM listener per independently-stoppable pair.

use crate::{webhook, websocket};
use crate::websocket::Registry;
use anyhow::Context;
use oracle_common::domain::{Subscriber, storage::Storage};
use serde::Deserialize;
use std::sync::Arc;
use tokio::{
    select, task,
    signal::unix::{SignalKind, signal},
};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub webhook: webhook::Config,
}

/// Returns the shared [`Registry`] so the Gateway can hand upgraded sockets to it.
pub fn build_registry() -> Arc<Registry> {
    Arc::new(Registry::new())
}

pub async fn run<S, Sub>(
    config: Config,
    store: S,
    subscriber: Sub,
    registry: Arc<Registry>,
) -> anyhow::Result<()>
where
    S: Storage,
    Sub: Subscriber,
{
    let mut sigterm = signal(SignalKind::terminate()).context("register SIGTERM handler")?;

    let forwarder_task = task::spawn(websocket::run_bus_forwarder(registry.clone(), subscriber.clone()));
    let heartbeat_task = task::spawn(websocket::run_heartbeat(registry));
    let watcher_task = task::spawn(webhook::run_event_watcher(
        store.clone(),
        subscriber,
        config.webhook.alert_thresholds.clone(),
    ));
    let delivery_task = task::spawn(webhook::run_delivery_worker(store, config.webhook));

    select! {
        result = forwarder_task => {
            result.context("websocket bus forwarder panicked")?;
            Ok(())
        }
        result = heartbeat_task => result
            .context("websocket heartbeat task panicked")
            .and_then(|r| r.context("websocket heartbeat task failed")),

        result = watcher_task => result
            .context("webhook event watcher panicked")
            .and_then(|r| r.context("webhook event watcher failed")),

        result = delivery_task => result
            .context("webhook delivery worker panicked")
            .and_then(|r| r.context("webhook delivery worker failed")),

        _ = sigterm.recv() => {
            log::warn!("SIGTERM received");
            Ok(())
        }
    }
}
