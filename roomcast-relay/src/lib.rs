//! Roomcast relay server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! Clients join a single shared room over WebSocket; every message one
//! client sends is broadcast to every client currently in the room.

pub mod config;
pub mod hub;
pub mod peer;
pub mod server;
pub mod transport;
