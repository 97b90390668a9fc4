// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! The WebSocket registry: `{connection -> {key, tier, lastPong}}`, plus the heartbeat ticker and
//! the two broadcast primitives (`broadcast`, `broadcastToTier`). The standard upgrade handshake
//! and frame masking rules are handled by axum/tungstenite underneath `axum::extract::ws`; this
//! module only owns what sits above that: who's connected, at what tier, and what they get sent.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use oracle_common::domain::{OracleEvent, Subscriber, Tier, Timestamp};
use serde::Serialize;
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

/// Server pings every connection on this period.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);
/// A connection that hasn't ponged within this long is dropped.
pub const PONG_TIMEOUT_SECS: i64 = 60;
/// Per-API-key connection ceiling.
pub const DEFAULT_CONNECTION_CAP: usize = 5;

#[derive(Debug, Serialize)]
struct WsFrame<'a> {
    event: &'a str,
    data: Value,
    ts: Timestamp,
}

fn text_message(event: &str, data: Value, ts: Timestamp) -> Message {
    let frame = WsFrame { event, data, ts };
    Message::Text(serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_owned()).into())
}

fn is_ping_action(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("action").and_then(Value::as_str).map(str::to_owned))
        .is_some_and(|action| action == "ping")
}

fn now_unix() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Connection {
    key: String,
    tier: Tier,
    sender: mpsc::UnboundedSender<Message>,
    last_pong: Arc<AtomicI64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection cap reached for this API key")]
    CapReached,
}

/// Read-mostly: connects/disconnects write, broadcasts iterate a snapshot so no lock is held
/// during socket I/O (each connection owns its own mpsc sender; `DashMap::iter` only holds a
/// shard lock per entry visited, never the whole map).
pub struct Registry {
    connections: DashMap<Uuid, Connection>,
    per_key_counts: DashMap<String, usize>,
    cap_per_key: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_CONNECTION_CAP)
    }

    pub fn with_cap(cap_per_key: usize) -> Self {
        Registry { connections: DashMap::new(), per_key_counts: DashMap::new(), cap_per_key }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drives one upgraded socket to completion: registers it (subject to the per-key cap), sends
    /// the initial `connected` frame, then splits into a dedicated writer task draining an mpsc
    /// channel (fed by broadcasts and app-level pong replies) and a reader loop handling WS-level
    /// pongs and the JSON `{"action":"ping"}` keepalive. Returns once the socket closes.
    pub async fn accept(&self, socket: WebSocket, key: String, tier: Tier) -> Result<(), RegistryError> {
        {
            let mut count = self.per_key_counts.entry(key.clone()).or_insert(0);
            if *count >= self.cap_per_key {
                return Err(RegistryError::CapReached);
            }
            *count += 1;
        }

        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let last_pong = Arc::new(AtomicI64::new(now_unix()));

        self.connections
            .insert(id, Connection { key: key.clone(), tier, sender: tx.clone(), last_pong: last_pong.clone() });

        let _ = tx.send(text_message("connected", serde_json::json!({ "tier": tier.to_string() }), now_unix()));

        let (mut sink, mut stream) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Pong(_) => last_pong.store(now_unix(), Ordering::Relaxed),
                Message::Text(text) => {
                    if is_ping_action(&text) {
                        let ts = now_unix();
                        let _ = tx.send(text_message("pong", serde_json::json!({ "ts": ts }), ts));
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        writer.abort();
        self.connections.remove(&id);
        if let Some(mut count) = self.per_key_counts.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        debug!(connection_id:% = id; "websocket connection closed");
        Ok(())
    }

    /// Writes to every connection, regardless of tier.
    pub fn broadcast(&self, event: &str, data: Value) {
        let message = text_message(event, data, now_unix());
        for entry in self.connections.iter() {
            let _ = entry.sender.send(message.clone());
        }
    }

    /// Writes only to connections at or above `min_tier` (ordinal: public < free < standard <
    /// premium < internal).
    pub fn broadcast_to_tier(&self, event: &str, data: Value, min_tier: Tier) {
        let message = text_message(event, data, now_unix());
        for entry in self.connections.iter() {
            if entry.tier >= min_tier {
                let _ = entry.sender.send(message.clone());
            }
        }
    }

    /// Pings every live connection, then drops anyone who hasn't ponged within
    /// [`PONG_TIMEOUT_SECS`]. Called on [`HEARTBEAT_PERIOD`] by [`run_heartbeat`].
    fn heartbeat_tick(&self) {
        let now = now_unix();
        let mut stale = Vec::new();
        for entry in self.connections.iter() {
            if now - entry.last_pong.load(Ordering::Relaxed) > PONG_TIMEOUT_SECS {
                stale.push(*entry.key());
            } else {
                let _ = entry.sender.send(Message::Ping(Vec::new().into()));
            }
        }

        for id in stale {
            if let Some((_, connection)) = self.connections.remove(&id) {
                let _ = connection.sender.send(Message::Close(None));
                if let Some(mut count) = self.per_key_counts.get_mut(&connection.key) {
                    *count = count.saturating_sub(1);
                }
                warn!(connection_id:% = id; "dropped websocket connection: missed heartbeat");
            }
        }
    }

    /// `tx` / `holder:new` / `holder:exit` / `k`, per the WS wire protocol's server event set.
    /// `WalletScored`/`TokenScored` aren't part of that set — nothing on the WS side consumes
    /// them today.
    fn dispatch_event(&self, event: &OracleEvent) {
        match event {
            OracleEvent::Tx(tx) => self.broadcast("tx", to_value(tx)),
            OracleEvent::HolderNew(holder) => self.broadcast("holder:new", to_value(holder)),
            OracleEvent::HolderExit(holder) => self.broadcast("holder:exit", to_value(holder)),
            OracleEvent::KChange(change) => self.broadcast("k", to_value(change)),
            OracleEvent::WalletScored(_) | OracleEvent::TokenScored(_) => {}
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Runs until the event bus closes: every published event is translated into a WS broadcast.
pub async fn run_bus_forwarder<Sub>(registry: Arc<Registry>, subscriber: Sub)
where
    Sub: Subscriber,
{
    let mut stream = subscriber.subscribe();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => registry.dispatch_event(&event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped; "websocket fan-out lagged behind the event bus");
            }
        }
    }
}

/// Runs the heartbeat ticker until cancelled (the caller races this against sigterm).
pub async fn run_heartbeat(registry: Arc<Registry>) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(HEARTBEAT_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        registry.heartbeat_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_common::domain::{InMemoryPubSub, Publisher, TxApplied};

    #[test]
    fn connection_cap_is_enforced_per_key() {
        let registry = Registry::with_cap(1);
        *registry.per_key_counts.entry("key-a".to_owned()).or_insert(0) += 1;
        assert_eq!(*registry.per_key_counts.get("key-a").unwrap(), 1);
    }

    #[tokio::test]
    async fn dispatch_event_reaches_registered_connection() {
        let registry = Arc::new(Registry::new());
        let pub_sub = InMemoryPubSub::new();
        let forwarder = tokio::spawn(run_bus_forwarder(registry.clone(), pub_sub.clone()));

        pub_sub
            .publish(OracleEvent::Tx(TxApplied { wallet: "w".into(), signature: "s".into(), slot: 1 }))
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        forwarder.abort();
    }
}
