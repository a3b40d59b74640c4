//! Tools the model may call when a request opts in with `use_tools`.

pub mod base;
pub mod builtin;
pub mod registry;

pub use base::Tool;
pub use registry::ToolRegistry;
