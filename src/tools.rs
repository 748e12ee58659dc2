//! Tools exposed over MCP.
//!
//! Two tools per server: the served backend's tool and `ping`. `ping` never
//! touches a subprocess, so clients can check liveness cheaply.

use crate::error::ToolCallError;
use crate::orchestrator::{Orchestrator, ToolResponse};

use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const PING_TOOL: &str = "ping";

/// Name, description and JSON input schema of one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: String,
    pub input_schema: Map<String, Value>,
}

/// Dispatches tool calls by name.
#[derive(Debug, Clone)]
pub struct ToolRouter {
    orchestrator: Arc<Orchestrator>,
}

impl ToolRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        vec![self.backend_tool(), ping_tool()]
    }

    /// Call a tool. Backend failures come back as error responses; only an
    /// unknown name is an `Err`.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResponse, ToolCallError> {
        if name == PING_TOOL {
            return Ok(ToolResponse::success("pong"));
        }

        if name == self.orchestrator.backend().tool_name() {
            return Ok(self.orchestrator.call(arguments).await);
        }

        Err(ToolCallError::UnknownTool(name.to_string()))
    }

    fn backend_tool(&self) -> ToolDescriptor {
        let backend = self.orchestrator.backend();

        let mut properties = Map::new();
        properties.insert(
            "prompt".to_string(),
            json!({
                "type": "string",
                "description": "The question or instruction to send"
            }),
        );
        properties.insert(
            "timeout_ms".to_string(),
            json!({
                "type": "integer",
                "minimum": 1,
                "description": "Total time budget in milliseconds, shared across retries"
            }),
        );
        for option in backend.recognized_options() {
            properties.insert(
                option.name.to_string(),
                json!({
                    "type": option.kind.json_type(),
                    "description": option.description
                }),
            );
        }

        let mut description = backend.kind.description().to_string();
        if let Some(model) = &backend.model {
            description.push_str(&format!(" Model: {model}."));
        }

        ToolDescriptor {
            name: backend.tool_name(),
            description,
            input_schema: object_schema(json!({
                "type": "object",
                "properties": properties,
                "required": ["prompt"],
                "additionalProperties": true
            })),
        }
    }
}

fn ping_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: PING_TOOL,
        description: "Check that the server is alive. Returns \"pong\".".to_string(),
        input_schema: object_schema(json!({
            "type": "object",
            "properties": {}
        })),
    }
}

fn object_schema(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
