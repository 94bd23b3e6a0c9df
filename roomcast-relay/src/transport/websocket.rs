//! axum WebSocket halves as peer connection halves.
//!
//! Ping and pong frames are answered by the WebSocket layer itself and never
//! reach the relay. A close frame ends the inbound stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use super::{ConnectionError, Payload, PayloadSink, PayloadSource};

/// Inbound half of an upgraded WebSocket.
pub struct WsSource(SplitStream<WebSocket>);

/// Outbound half of an upgraded WebSocket.
pub struct WsSink(SplitSink<WebSocket, Message>);

/// Split an upgraded socket into independently owned halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (WsSource(stream), WsSink(sink))
}

impl PayloadSource for WsSource {
    async fn recv(&mut self) -> Option<Result<Payload, ConnectionError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Payload::Text(Arc::from(text.as_str())))),
                Ok(Message::Binary(data)) => return Some(Ok(Payload::Binary(Arc::from(&data[..])))),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl PayloadSink for WsSink {
    async fn send(&mut self, payload: Payload) -> Result<(), ConnectionError> {
        let msg = match payload {
            Payload::Text(text) => Message::Text(String::from(&*text).into()),
            Payload::Binary(data) => Message::Binary(data.to_vec().into()),
        };
        self.0.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) {
        // Fails harmlessly if the socket is already closed.
        let _ = self.0.close().await;
    }
}
