//! Tool trait: the tool capability.
//!
//! Tools are how a reasoning session acts in the world: run a shell command,
//! execute a code snippet, query an API. The loop looks a tool up by its
//! string id in a [`ToolRegistry`] and invokes it either once or as a stream
//! of partial outputs.

use crate::error::ToolError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Definition of a tool, rendered into the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool id (e.g., "shell", "code_executor")
    pub name: String,

    /// Human-readable description shown to the model
    pub description: String,

    /// JSON Schema for the tool's input
    pub parameters: serde_json::Value,
}

/// A validated request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, unique within a session
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Input as a JSON value
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        let name = name.into();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{name}-{}", &suffix[..8]),
            name,
            input,
        }
    }
}

/// One output of a tool execution.
///
/// A one-shot tool returns a single result with `finished = true`. A
/// streaming tool yields several partials; each reports its own completion
/// flag and only the finished one is kept in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The output, usually a JSON object
    pub output: serde_json::Value,

    /// Whether this is the last partial
    pub finished: bool,
}

impl ToolResult {
    /// A completed result.
    pub fn complete(output: serde_json::Value) -> Self {
        Self {
            output,
            finished: true,
        }
    }

    /// An intermediate partial.
    pub fn partial(output: serde_json::Value) -> Self {
        Self {
            output,
            finished: false,
        }
    }
}

/// Sequence of partial outputs from a streaming tool.
pub type ToolResultStream<'a> = BoxStream<'a, std::result::Result<ToolResult, ToolError>>;

/// The core Tool trait.
///
/// Each built-in (shell, code_executor) implements this trait and is
/// registered in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique id of this tool (e.g., "shell").
    fn name(&self) -> &str;

    /// A description of what this tool does (shown to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value)
    -> std::result::Result<ToolResult, ToolError>;

    /// Whether `execute_stream()` yields real intermediate partials.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Execute the tool, yielding partial outputs as they become available.
    ///
    /// Default implementation yields the single result of `execute()`.
    fn execute_stream<'a>(&'a self, input: serde_json::Value) -> ToolResultStream<'a> {
        Box::pin(futures::stream::once(self.execute(input)))
    }

    /// Convert this tool into a ToolDefinition for the system prompt.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools (the toolkit attached to a session).
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, sorted by name so prompts are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool call once.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.input.clone()).await
    }

    /// Execute a tool call as a stream of partials.
    pub fn execute_stream(
        &self,
        call: &ToolCall,
    ) -> std::result::Result<ToolResultStream<'_>, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        Ok(tool.execute_stream(call.input.clone()))
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
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
    use futures::StreamExt;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            input: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = input["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::complete(serde_json::json!({ "text": text })))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), ["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn tool_call_id_carries_name() {
        let call = ToolCall::new("list_pods", serde_json::json!({}));
        assert!(call.id.starts_with("list_pods-"));
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let call = ToolCall::new("echo", serde_json::json!({"text": "hello world"}));
        let result = registry.execute(&call).await.unwrap();
        assert!(result.finished);
        assert_eq!(result.output["text"], "hello world");
    }

    #[tokio::test]
    async fn default_stream_yields_single_finished_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let call = ToolCall::new("echo", serde_json::json!({"text": "once"}));
        let partials: Vec<_> = registry
            .execute_stream(&call)
            .unwrap()
            .collect::<Vec<_>>()
            .await;
        assert_eq!(partials.len(), 1);
        let only = partials[0].as_ref().unwrap();
        assert!(only.finished);
        assert_eq!(only.output["text"], "once");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("nonexistent", serde_json::json!({}));
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert!(registry.execute_stream(&call).is_err());
    }
}
