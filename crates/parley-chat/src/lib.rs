//! Parley chat — conversation state and single-exchange orchestration.
//!
//! This crate contains:
//! - **context**: message list assembly (system prompt, history, user text)
//! - **session**: `ChatSession`, which runs one exchange at a time and logs every turn
//! - **tools**: the tool registry and built-in tools offered on `use_tools` requests

pub mod context;
pub mod session;
pub mod tools;

pub use context::ContextBuilder;
pub use session::{ChatSession, ExchangeOptions, ReplyStream, SessionPhase, StreamedReply};
pub use tools::{Tool, ToolRegistry};
