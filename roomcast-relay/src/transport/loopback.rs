//! Loopback connection for testing.
//!
//! [`pair`] returns the relay-side halves of a connection together with a
//! [`LoopbackPeer`] that plays the remote client: it injects inbound payloads,
//! reads what the relay wrote, and can hang up or fail either direction.

use tokio::sync::mpsc;

use super::{ConnectionError, Payload, PayloadSink, PayloadSource};

/// Relay-side inbound half of a loopback connection.
pub struct LoopbackSource {
    inbound: mpsc::Receiver<Result<Payload, ConnectionError>>,
}

/// Relay-side outbound half of a loopback connection.
pub struct LoopbackSink {
    /// `None` once closed.
    outbound: Option<mpsc::Sender<Payload>>,
}

/// Remote end of a loopback connection, driven by the test.
pub struct LoopbackPeer {
    inbound: Option<mpsc::Sender<Result<Payload, ConnectionError>>>,
    outbound: mpsc::Receiver<Payload>,
}

/// Create a connected loopback triple.
///
/// `buffer` bounds each direction.
///
/// # Panics
///
/// Panics if `buffer` is zero.
#[must_use]
pub fn pair(buffer: usize) -> (LoopbackSource, LoopbackSink, LoopbackPeer) {
    let (in_tx, in_rx) = mpsc::channel(buffer);
    let (out_tx, out_rx) = mpsc::channel(buffer);
    (
        LoopbackSource { inbound: in_rx },
        LoopbackSink {
            outbound: Some(out_tx),
        },
        LoopbackPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

impl PayloadSource for LoopbackSource {
    async fn recv(&mut self) -> Option<Result<Payload, ConnectionError>> {
        self.inbound.recv().await
    }
}

impl PayloadSink for LoopbackSink {
    async fn send(&mut self, payload: Payload) -> Result<(), ConnectionError> {
        let Some(outbound) = &self.outbound else {
            return Err(ConnectionError::Closed);
        };
        outbound
            .send(payload)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}

impl LoopbackPeer {
    /// Send a payload to the relay.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the relay stopped reading or
    /// the peer already hung up.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), ConnectionError> {
        let Some(inbound) = &self.inbound else {
            return Err(ConnectionError::Closed);
        };
        inbound
            .send(Ok(payload.into()))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Make the relay's next read fail with `error`.
    pub async fn fail_read(&self, error: ConnectionError) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Err(error)).await;
        }
    }

    /// Close the inbound direction cleanly.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Stop accepting payloads so the relay's next write fails.
    pub fn stop_receiving(&mut self) {
        self.outbound.close();
    }

    /// Next payload written by the relay, or `None` once the relay closed
    /// the connection.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.outbound.recv().await
    }
}
