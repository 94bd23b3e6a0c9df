//! Connection abstraction consumed by the peer adapter.
//!
//! A joined peer is represented by two independently owned halves:
//! a [`PayloadSource`] the read-drive pulls inbound payloads from, and a
//! [`PayloadSink`] the write-drive pushes outbound payloads into. Concrete
//! implementations:
//! - [`websocket`] — the axum WebSocket halves used by the server
//! - [`loopback::pair`] — in-process channel pair for testing

pub mod loopback;
pub mod websocket;

use std::fmt;
use std::sync::Arc;

/// An opaque message relayed between peers.
///
/// The relay never looks inside a payload. The frame kind is carried along
/// only so a text frame goes back out as text and a binary frame as binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(Arc<str>),
    /// Binary frame.
    Binary(Arc<[u8]>),
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(Arc::from(text))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(Arc::from(text))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Arc::from(data))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "text({} bytes)", text.len()),
            Self::Binary(data) => write!(f, "binary({} bytes)", data.len()),
        }
    }
}

/// Errors surfaced by a connection half.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection has already been closed.
    #[error("connection closed")]
    Closed,

    /// The underlying WebSocket reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// An underlying I/O error occurred.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inbound half of a peer connection.
pub trait PayloadSource: Send + 'static {
    /// Wait for the next inbound payload.
    ///
    /// Returns `None` once the peer has closed the connection cleanly,
    /// `Some(Err(_))` on a transport failure. Either outcome is terminal.
    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Option<Result<Payload, ConnectionError>>> + Send;
}

/// Outbound half of a peer connection.
pub trait PayloadSink: Send + 'static {
    /// Write one payload to the peer.
    fn send(
        &mut self,
        payload: Payload,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;
}
