//! Parley core — shared types, errors, configuration, the client protocol
//! and conversation storage.

pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod types;
pub mod utils;

pub use error::GatewayError;
