//! LLM provider layer for Parley.
//!
//! # Architecture
//!
//! - [`traits::ProviderStrategy`] — the two-method contract every vendor implements
//! - [`traits::ChatModel`] — the model handle a strategy produces
//! - [`http_model::HttpChatModel`] — generic HTTP transport (JSON + SSE streaming)
//! - [`dialect::WireDialect`] — per-vendor request/response shapes
//! - [`registry::ProviderRegistry`] — strategy table + active-provider selection

pub mod anthropic;
pub mod azure;
pub mod cohere;
pub mod dialect;
pub mod google;
pub mod http_model;
pub mod huggingface;
pub mod openai;
pub mod registry;
mod sse;
pub mod traits;

// Re-export main types for convenience
pub use http_model::HttpChatModel;
pub use registry::{strategy_for, BoundProvider, ProviderRegistry};
pub use traits::{ChatModel, FragmentStream, ModelReply, ProviderStrategy};
