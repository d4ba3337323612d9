//! The tool seam: metadata, results, the [`ToolProtocol`] trait, and the
//! single registry agents dispatch through.
//!
//! A [`ToolProtocol`] is anything that can enumerate tools and execute them
//! by name: an in-process toolbox, or a session client speaking to an
//! external tool server (the transport for the latter lives outside this
//! crate; the trait is the contract it must satisfy:
//! `list_tools()` and `call_tool(name, arguments)`).
//!
//! The [`ToolRegistry`] folds every protocol's tools into one namespace with
//! collision detection, and wraps each call in the standard 30 second
//! deadline.
//!
//! # Example
//!
//! ```rust
//! use agentfabric::tool_protocol::ToolRegistry;
//! use agentfabric::tools::calculator::CalculatorTool;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ToolRegistry::new();
//! registry.register_protocol(Arc::new(CalculatorTool::new())).await?;
//!
//! let result = registry
//!     .call("calculator", serde_json::json!({"expression": "2 + 2 * 3"}))
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

use crate::agentfabric::client_wrapper::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Deadline applied around every tool execution.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Describes a tool: its name, what it does, and the JSON schema of its
/// arguments.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the `arguments` map.
    pub input_schema: serde_json::Value,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Convert into the provider-facing [`ToolDefinition`] shape.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.input_schema.clone(),
        }
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    /// Text rendering used for LLM observations.
    pub fn to_text(&self) -> String {
        if self.success {
            self.data.to_string()
        } else {
            format!(
                "error: {}",
                self.error.as_deref().unwrap_or("unspecified failure")
            )
        }
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound { name: String },
    DuplicateTool { name: String },
    InvalidArguments { name: String, reason: String },
    ExecutionFailed { name: String, reason: String },
    Timeout { name: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound { name } => write!(f, "tool '{}' not found", name),
            ToolError::DuplicateTool { name } => {
                write!(f, "tool '{}' is already registered", name)
            }
            ToolError::InvalidArguments { name, reason } => {
                write!(f, "invalid arguments for tool '{}': {}", name, reason)
            }
            ToolError::ExecutionFailed { name, reason } => {
                write!(f, "tool '{}' failed: {}", name, reason)
            }
            ToolError::Timeout { name } => write!(
                f,
                "tool '{}' exceeded the {:?} deadline",
                name, TOOL_CALL_TIMEOUT
            ),
        }
    }
}

impl Error for ToolError {}

/// Anything that can enumerate and execute tools.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError>;
}

struct RegisteredTool {
    metadata: ToolMetadata,
    protocol: Arc<dyn ToolProtocol>,
}

/// A single tool namespace shared by every agent in a runtime.
///
/// Registration discovers each protocol's tools via `list_tools` and rejects
/// name collisions; dispatch routes by name and enforces
/// [`TOOL_CALL_TIMEOUT`].
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Discover and register every tool exposed by `protocol`.
    ///
    /// Fails with [`ToolError::DuplicateTool`] on the first name collision;
    /// tools registered earlier in the same call are kept.
    pub async fn register_protocol(
        &self,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<(), ToolError> {
        let discovered = protocol.list_tools().await?;
        let mut tools = self.tools.write().await;
        for metadata in discovered {
            if tools.contains_key(&metadata.name) {
                return Err(ToolError::DuplicateTool {
                    name: metadata.name,
                });
            }
            tools.insert(
                metadata.name.clone(),
                RegisteredTool {
                    metadata,
                    protocol: protocol.clone(),
                },
            );
        }
        Ok(())
    }

    /// Metadata for every registered tool, sorted by name.
    pub async fn list(&self) -> Vec<ToolMetadata> {
        let tools = self.tools.read().await;
        let mut all: Vec<ToolMetadata> = tools.values().map(|t| t.metadata.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Provider-facing definitions for every registered tool, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .await
            .iter()
            .map(|metadata| metadata.to_tool_definition())
            .collect()
    }

    /// Execute `name` with `arguments`, bounded by [`TOOL_CALL_TIMEOUT`].
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let protocol = {
            let tools = self.tools.read().await;
            tools
                .get(name)
                .map(|tool| tool.protocol.clone())
                .ok_or_else(|| ToolError::NotFound {
                    name: name.to_string(),
                })?
        };
        match tokio::time::timeout(TOOL_CALL_TIMEOUT, protocol.call_tool(name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProtocol {
        tool_name: &'static str,
    }

    #[async_trait]
    impl ToolProtocol for EchoProtocol {
        async fn list_tools(&self) -> Result<Vec<ToolMetadata>, ToolError> {
            Ok(vec![ToolMetadata::new(self.tool_name, "Echoes arguments")])
        }

        async fn call_tool(
            &self,
            _name: &str,
            arguments: serde_json::Value,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(arguments))
        }
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let registry = ToolRegistry::new();
        registry
            .register_protocol(Arc::new(EchoProtocol { tool_name: "echo" }))
            .await
            .unwrap();

        let result = registry
            .call("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.data["x"], 1);
    }

    #[tokio::test]
    async fn test_collision_detection() {
        let registry = ToolRegistry::new();
        registry
            .register_protocol(Arc::new(EchoProtocol { tool_name: "echo" }))
            .await
            .unwrap();
        match registry
            .register_protocol(Arc::new(EchoProtocol { tool_name: "echo" }))
            .await
        {
            Err(ToolError::DuplicateTool { name }) => assert_eq!(name, "echo"),
            other => panic!("expected DuplicateTool, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        match registry.call("missing", serde_json::json!({})).await {
            Err(ToolError::NotFound { name }) => assert_eq!(name, "missing"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_is_sorted() {
        let registry = ToolRegistry::new();
        registry
            .register_protocol(Arc::new(EchoProtocol { tool_name: "zeta" }))
            .await
            .unwrap();
        registry
            .register_protocol(Arc::new(EchoProtocol { tool_name: "alpha" }))
            .await
            .unwrap();
        let names: Vec<String> = registry.list().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
