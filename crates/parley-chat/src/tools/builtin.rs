//! Built-in tools: `add` and `get_current_time`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_f64, Tool};

/// Look up a built-in tool by name.
pub fn by_name(name: &str) -> Option<Arc<dyn Tool>> {
    match name {
        "add" => Some(Arc::new(AddTool)),
        "get_current_time" => Some(Arc::new(CurrentTimeTool)),
        _ => None,
    }
}

/// Adds two numbers.
pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers together."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First addend" },
                "b": { "type": "number", "description": "Second addend" }
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let a = require_f64(&params, "a")?;
        let b = require_f64(&params, "b")?;
        Ok((a + b).to_string())
    }
}

/// Reports the local time in ISO 8601.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time in ISO format."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
        Ok(chrono::Local::now().to_rfc3339())
    }
}
