//! Tool registry — the enabled tools, keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use parley_core::types::{ToolCall, ToolDefinition};

use super::base::Tool;
use super::builtin;

/// Stores tools keyed by name and dispatches calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the named built-in tools. Unknown names are logged
    /// and skipped.
    pub fn with_builtins(enabled: &[String]) -> Self {
        let mut registry = Self::new();
        for name in enabled {
            match builtin::by_name(name) {
                Some(tool) => registry.register(tool),
                None => warn!(tool = %name, "Unknown tool in config, skipping"),
            }
        }
        registry
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Names of all registered tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Model-facing definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name.
    ///
    /// The model always gets text back, even when the tool is unknown or
    /// fails.
    pub async fn execute(&self, name: &str, params: HashMap<String, Value>) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Tool not found");
            return format!("Error: Tool '{name}' not found");
        };

        match tool.execute(params).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                format!("Error executing {name}: {e}")
            }
        }
    }

    /// Execute one model tool call. Unparseable arguments count as none.
    pub async fn execute_call(&self, call: &ToolCall) -> String {
        let params: HashMap<String, Value> =
            serde_json::from_str(&call.function.arguments).unwrap_or_default();
        self.execute(&call.function.name, params).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
