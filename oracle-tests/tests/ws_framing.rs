// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! WebSocket framing round-trip: the Registry delegates actual frame masking/boundary handling
//! to axum/tungstenite (see `fanout::websocket`'s module docs), so the right boundary to test is
//! a standards-conformant client (`tokio-tungstenite`) talking to the real served router, not a
//! hand-rolled frame decoder.

mod support;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn client_receives_connected_then_a_ping_pong_round_trip() {
    let store = support::sqlite_storage().await;
    let chain_adapter = support::FakeChainAdapter::new();
    let config = support::gateway_config();
    let state = support::app_state(store, chain_adapter, config).await;
    let router = gateway::application::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });

    let (mut socket, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let connected = socket.next().await.unwrap().unwrap();
    let connected: serde_json::Value = serde_json::from_str(connected.to_text().unwrap()).unwrap();
    assert_eq!(connected["event"], "connected");

    socket.send(Message::Text(r#"{"action":"ping"}"#.into())).await.unwrap();

    let pong = socket.next().await.unwrap().unwrap();
    let pong: serde_json::Value = serde_json::from_str(pong.to_text().unwrap()).unwrap();
    assert_eq!(pong["event"], "pong");

    let _ = socket.close(None).await;
    server.abort();
}

/// Frame payload lengths that straddle tungstenite's own length-prefix encoding boundaries: 125/126
/// (last one-byte length vs. first requiring the 16-bit extended length) and 65535/65536 (last
/// 16-bit length vs. first requiring the 64-bit extended length). The Registry delegates the
/// actual masking/length-prefix work to axum/tungstenite, so this only needs to confirm a
/// standards client decodes a frame at each boundary back to exactly the bytes the server sent.
#[tokio::test]
async fn server_frames_at_length_prefix_boundaries_decode_correctly() {
    let store = support::sqlite_storage().await;
    let chain_adapter = support::FakeChainAdapter::new();
    let config = support::gateway_config();
    let state = support::app_state(store, chain_adapter, config).await;
    let registry = state.registry.clone();
    let router = gateway::application::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });

    let (mut socket, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let _connected = socket.next().await.unwrap().unwrap();

    for target_len in [125usize, 126, 65_535, 65_536] {
        let envelope_overhead = envelope_len(0);
        let pad_len = target_len.saturating_sub(envelope_overhead);
        let payload = envelope(pad_len);
        assert_eq!(payload.len(), target_len, "constructed envelope must land exactly on the boundary");

        registry.broadcast("blob", serde_json::json!({ "pad": "x".repeat(pad_len) }));

        let received = socket.next().await.unwrap().unwrap();
        let text = received.to_text().unwrap();
        assert_eq!(text.len(), target_len, "frame at boundary {target_len} must round-trip at its exact length");
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["event"], "blob");
        assert_eq!(value["data"]["pad"].as_str().unwrap().len(), pad_len);
    }

    let _ = socket.close(None).await;
    server.abort();
}

/// Mirrors `fanout::websocket`'s private `WsFrame { event, data, ts }` shape closely enough to
/// predict the server's serialized length ahead of broadcasting, using a representative
/// ten-digit-second timestamp (true of any Unix time before the year 2286).
fn envelope(pad_len: usize) -> String {
    serde_json::to_string(&serde_json::json!({
        "event": "blob",
        "data": { "pad": "x".repeat(pad_len) },
        "ts": 1_800_000_000i64,
    }))
    .unwrap()
}

fn envelope_len(pad_len: usize) -> usize {
    envelope(pad_len).len()
}
