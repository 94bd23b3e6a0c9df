//! HTTP surface: the chat page and the WebSocket upgrade.
//!
//! `GET /` serves the bundled chat page. `GET /room` upgrades to a WebSocket
//! and hands the connection to a [`Peer`] bound to the shared [`Hub`].

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::{Html, IntoResponse};

use crate::config::RelayConfig;
use crate::hub::{DEFAULT_EVENT_QUEUE_CAPACITY, Hub, HubHandle};
use crate::peer::{DEFAULT_MAILBOX_CAPACITY, Peer};
use crate::transport::websocket;

/// The chat page served at `/`.
const CHAT_PAGE: &str = include_str!("../assets/chat.html");

/// Default WebSocket read/write buffer size in bytes.
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 1024;

/// Shared server state: the room's hub plus per-connection settings.
#[derive(Debug, Clone)]
pub struct RelayState {
    /// Handle to the room's control loop.
    pub hub: Hub,
    /// Outbound mailbox capacity given to each new peer.
    mailbox_capacity: usize,
    /// WebSocket read/write buffer size.
    socket_buffer_size: usize,
}

impl RelayState {
    /// Creates state around an already running hub, using default
    /// per-connection settings.
    #[must_use]
    pub const fn new(hub: Hub) -> Self {
        Self {
            hub,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }

    /// Creates state from the resolved [`RelayConfig`], spawning the hub.
    ///
    /// Returns the state and the handle that shuts the hub down.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> (Self, HubHandle) {
        let (hub, handle) = Hub::spawn(config.event_queue_capacity);
        let state = Self {
            hub,
            mailbox_capacity: config.mailbox_capacity,
            socket_buffer_size: config.socket_buffer_size,
        };
        (state, handle)
    }

    /// Override the per-connection mailbox capacity.
    #[must_use]
    pub const fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

/// Build the axum router for the relay.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::get(chat_page))
        .route("/room", axum::routing::get(ws_handler))
        .with_state(state)
}

/// Starts the relay server on the given address with a fresh hub and
/// returns the bound address, the server's join handle, and the hub handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>, HubHandle),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let (hub, hub_handle) = Hub::spawn(DEFAULT_EVENT_QUEUE_CAPACITY);
    let (bound_addr, handle) = start_server_with_state(addr, Arc::new(RelayState::new(hub))).await?;
    Ok((bound_addr, handle, hub_handle))
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown<F>(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Serves the chat page.
async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.read_buffer_size(state.socket_buffer_size)
        .write_buffer_size(state.socket_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one upgraded connection as a room member until it departs.
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (source, sink) = websocket::split(socket);
    let peer = Peer::new(state.hub.clone(), state.mailbox_capacity);
    let id = peer.id();

    if let Err(e) = peer.run(source, sink).await {
        tracing::warn!(member = %id, error = %e, "hub closed before join, connection refused");
    }
}
