//! Parley gateway — the WebSocket front door.
//!
//! This crate provides:
//! - **context**: `GatewayContext` — registry, store and speech backends shared by every connection
//! - **connection**: `SessionConnection` — the per-client state machine (setup, routing, teardown)
//! - **server**: `serve` — the accept loop

pub mod connection;
pub mod context;
pub mod server;

pub use connection::{ConnectionState, SessionConnection};
pub use context::GatewayContext;
pub use server::serve;
