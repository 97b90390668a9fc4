// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Internal event bus wiring the Ingest Pipeline and K Calculator (publishers) to the Fan-out
//! layer's WebSocket registry and webhook dispatcher (subscribers). Unlike the upstream chain
//! indexer's NATS-backed pub/sub, conviction-oracle is single-process, so a broadcast channel is
//! sufficient; the `Publisher`/`Subscriber` trait split is kept so the rest of the system stays
//! agnostic to the transport, same as the upstream design.

use crate::domain::{Address, Classification, Timestamp};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

const CHANNEL_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OracleEvent {
    Tx(TxApplied),
    HolderNew(HolderNew),
    HolderExit(HolderExit),
    KChange(KChange),
    WalletScored(WalletScored),
    TokenScored(TokenScored),
}

impl OracleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OracleEvent::Tx(_) => "tx",
            OracleEvent::HolderNew(_) => "holder:new",
            OracleEvent::HolderExit(_) => "holder:exit",
            OracleEvent::KChange(_) => "k",
            OracleEvent::WalletScored(_) => "wallet_scored",
            OracleEvent::TokenScored(_) => "token_scored",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TxApplied {
    pub wallet: Address,
    pub signature: String,
    pub slot: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HolderNew {
    pub address: Address,
    pub balance: String,
    pub tx_signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HolderExit {
    pub address: Address,
    pub previous_balance: String,
    pub tx_signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KChange {
    pub previous_k: u8,
    pub new_k: u8,
    pub delta: i16,
    pub holders: u32,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletScored {
    pub wallet: Address,
    pub k_wallet: u8,
    pub tokens_analyzed: u32,
    pub slot: u64,
    pub at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenScored {
    pub mint: Address,
    pub k: u8,
    pub holders: u32,
}

/// Wallet classification, exposed for callers constructing [`KChange`]-adjacent events.
pub fn classification_of(retention: f64) -> Classification {
    Classification::from_retention(retention)
}

#[trait_variant::make(Send)]
pub trait Publisher: Clone + Send + Sync + 'static {
    async fn publish(&self, event: OracleEvent);
}

pub trait Subscriber: Clone + Send + Sync + 'static {
    fn subscribe(&self) -> impl Stream<Item = Result<OracleEvent, BroadcastStreamRecvError>> + Send;
}

/// Single-process broadcast-based implementation of [`Publisher`] and [`Subscriber`].
#[derive(Clone)]
pub struct InMemoryPubSub {
    sender: broadcast::Sender<OracleEvent>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        InMemoryPubSub { sender }
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for InMemoryPubSub {
    async fn publish(&self, event: OracleEvent) {
        // A lagging or absent subscriber must never block or fail the publisher; dropping the
        // event for slow consumers is the correct backpressure policy here (see §3.3
        // Backpressure in the design notes).
        let _ = self.sender.send(event);
    }
}

impl Subscriber for InMemoryPubSub {
    fn subscribe(&self) -> impl Stream<Item = Result<OracleEvent, BroadcastStreamRecvError>> + Send {
        BroadcastStream::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn published_events_reach_subscriber() {
        let pub_sub = InMemoryPubSub::new();
        let mut stream = pub_sub.subscribe();

        pub_sub
            .publish(OracleEvent::Tx(TxApplied {
                wallet: Address::from("w"),
                signature: "s".into(),
                slot: 1,
            }))
            .await;

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.name(), "tx");
    }
}
