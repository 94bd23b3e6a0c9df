// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for room broadcast over real WebSocket connections.
//!
//! These tests validate:
//! - A message from one client reaches every client in the room, the sender
//!   included
//! - Each client sees messages in the order the room processed them
//! - A client that stops reading is disconnected while the rest keep
//!   receiving
//! - Disconnecting clients leave the room
//! - Shutting the hub down disconnects everyone

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomcast_relay::hub::{Hub, HubHandle};
use roomcast_relay::server::{self, RelayState};
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

/// Start the relay on an OS-assigned port with the given mailbox capacity.
async fn start_relay(mailbox_capacity: usize) -> (std::net::SocketAddr, Hub, HubHandle) {
    let (hub, hub_handle) = Hub::spawn(256);
    let state = Arc::new(RelayState::new(hub.clone()).with_mailbox_capacity(mailbox_capacity));
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start relay");
    (addr, hub, hub_handle)
}

/// Wait until the hub reports exactly `n` members.
async fn wait_for_members(hub: &Hub, n: usize) {
    tokio::time::timeout(WAIT, async {
        while hub.member_count().await.unwrap() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("room never reached {n} members"));
}

/// Connect a client to `/room` and wait until it has joined.
async fn join(addr: std::net::SocketAddr, hub: &Hub, members_after: usize) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/room"))
        .await
        .expect("failed to connect");
    wait_for_members(hub, members_after).await;
    ws
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_owned().into())).await.unwrap();
}

/// Next text frame, skipping control frames.
async fn recv_text(ws: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Resolves once the server has closed the connection.
async fn expect_closed(ws: &mut Client) {
    tokio::time::timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .expect("connection was not closed");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn message_reaches_every_member_including_sender() {
    let (addr, hub, _hub_handle) = start_relay(16).await;
    let mut h1 = join(addr, &hub, 1).await;
    let mut h2 = join(addr, &hub, 2).await;
    let mut h3 = join(addr, &hub, 3).await;

    send_text(&mut h1, "hello").await;

    assert_eq!(recv_text(&mut h2).await, "hello");
    assert_eq!(recv_text(&mut h3).await, "hello");
    assert_eq!(recv_text(&mut h1).await, "hello");
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let (addr, hub, _hub_handle) = start_relay(16).await;
    let mut h1 = join(addr, &hub, 1).await;
    let mut h2 = join(addr, &hub, 2).await;

    send_text(&mut h1, "a").await;
    send_text(&mut h1, "b").await;

    assert_eq!(recv_text(&mut h2).await, "a");
    assert_eq!(recv_text(&mut h2).await, "b");
}

#[tokio::test]
async fn all_members_agree_on_interleaving_of_senders() {
    let (addr, hub, _hub_handle) = start_relay(128).await;
    let mut alice = join(addr, &hub, 1).await;
    let mut bob = join(addr, &hub, 2).await;
    let mut carol = join(addr, &hub, 3).await;

    for i in 0..10 {
        send_text(&mut alice, &format!("alice {i}")).await;
        send_text(&mut bob, &format!("bob {i}")).await;
    }

    let mut seen_by_alice = Vec::new();
    let mut seen_by_bob = Vec::new();
    let mut seen_by_carol = Vec::new();
    for _ in 0..20 {
        seen_by_alice.push(recv_text(&mut alice).await);
        seen_by_bob.push(recv_text(&mut bob).await);
        seen_by_carol.push(recv_text(&mut carol).await);
    }

    assert_eq!(seen_by_alice, seen_by_carol);
    assert_eq!(seen_by_bob, seen_by_carol);

    // Each sender's own messages stay in order.
    let alice_only: Vec<_> = seen_by_carol
        .iter()
        .filter(|m| m.starts_with("alice"))
        .cloned()
        .collect();
    let expected: Vec<_> = (0..10).map(|i| format!("alice {i}")).collect();
    assert_eq!(alice_only, expected);
}

#[tokio::test]
async fn disconnect_leaves_the_room() {
    let (addr, hub, _hub_handle) = start_relay(16).await;
    let mut h1 = join(addr, &hub, 1).await;
    let mut h2 = join(addr, &hub, 2).await;

    h2.close(None).await.unwrap();
    wait_for_members(&hub, 1).await;

    send_text(&mut h1, "anyone?").await;
    assert_eq!(recv_text(&mut h1).await, "anyone?");
}

#[tokio::test]
async fn dropped_connection_leaves_the_room() {
    let (addr, hub, _hub_handle) = start_relay(16).await;
    let _h1 = join(addr, &hub, 1).await;
    let h2 = join(addr, &hub, 2).await;

    drop(h2);

    wait_for_members(&hub, 1).await;
}

#[tokio::test]
async fn stalled_reader_is_evicted_without_blocking_others() {
    let (addr, hub, _hub_handle) = start_relay(4).await;
    let mut active = join(addr, &hub, 1).await;
    // Never reads; its socket buffers and mailbox eventually fill up.
    let _stalled = join(addr, &hub, 2).await;

    // Enough data to fill the stalled client's socket buffers several times
    // over. The active client keeps reading, so its own mailbox never fills.
    let payload = "x".repeat(64 * 1024);
    let mut received = 0usize;
    for _ in 0..2000 {
        send_text(&mut active, &payload).await;
        assert_eq!(recv_text(&mut active).await.len(), payload.len());
        received += 1;
        if hub.member_count().await.unwrap() == 1 {
            break;
        }
    }

    wait_for_members(&hub, 1).await;
    assert!(received > 0);

    // The survivor still gets broadcasts.
    send_text(&mut active, "still here").await;
    assert_eq!(recv_text(&mut active).await, "still here");
}

#[tokio::test]
async fn hub_shutdown_disconnects_everyone() {
    let (addr, hub, hub_handle) = start_relay(16).await;
    let mut h1 = join(addr, &hub, 1).await;
    let mut h2 = join(addr, &hub, 2).await;

    let stats = hub_handle.shutdown().await;
    assert_eq!(stats.joined, 2);

    expect_closed(&mut h1).await;
    expect_closed(&mut h2).await;
}
