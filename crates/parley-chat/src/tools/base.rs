//! Tool trait — what a tool offered to the model must provide.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use parley_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// A function the model may call during an exchange.
///
/// The session offers every registered tool via `to_definition()` and
/// dispatches the model's calls through `execute()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool. The returned text is handed back to the model.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required numeric param. Numeric strings are accepted too.
pub fn require_f64(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<f64> {
    let value = params
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))?;
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("Parameter {key} must be a number"))
}
