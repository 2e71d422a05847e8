//! Shared test helpers for agent tests.

use async_trait::async_trait;
use futures::stream;
use reasonflow_core::error::{ProviderError, ToolError};
use reasonflow_core::provider::{
    Provider, ProviderRequest, ProviderResponse, StreamChunk, StreamReceiver, Usage,
};
use reasonflow_core::tool::{Tool, ToolRegistry, ToolResult, ToolResultStream};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted generation.
#[derive(Clone)]
enum Script {
    Fragments(Vec<String>),
    Fail(ProviderError),
}

/// A mock provider that replays scripted generations in order.
///
/// Batch providers return each script joined as one response; streaming
/// providers send each fragment as its own chunk. Panics if more calls are
/// made than scripts provided, unless built with [`ScriptedProvider::always`].
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    streaming: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn with_scripts(scripts: Vec<Script>, streaming: bool) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            streaming,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Non-streaming provider returning each text in turn.
    pub fn batch<const N: usize>(texts: [&str; N]) -> Self {
        Self::with_scripts(
            texts
                .iter()
                .map(|t| Script::Fragments(vec![t.to_string()]))
                .collect(),
            false,
        )
    }

    /// Streaming provider sending each generation as the given fragments.
    pub fn streaming<const N: usize>(generations: [Vec<&str>; N]) -> Self {
        Self::with_scripts(
            generations
                .iter()
                .map(|g| Script::Fragments(g.iter().map(|f| f.to_string()).collect()))
                .collect(),
            true,
        )
    }

    /// Returns the same text on every call.
    pub fn always(text: &str) -> Self {
        let mut provider = Self::with_scripts(Vec::new(), false);
        provider.repeat = Some(Script::Fragments(vec![text.to_string()]));
        provider
    }

    /// Fails every call with `error`.
    pub fn failing(error: ProviderError) -> Self {
        let mut provider = Self::with_scripts(Vec::new(), false);
        provider.repeat = Some(Script::Fail(error));
        provider
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: ProviderRequest) -> Script {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            return script;
        }
        match &self.repeat {
            Some(script) => script.clone(),
            None => panic!(
                "ScriptedProvider: no more scripts (call #{})",
                requests.len()
            ),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next(request) {
            Script::Fragments(fragments) => Ok(ProviderResponse {
                content: fragments.concat(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
            }),
            Script::Fail(e) => Err(e),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<StreamReceiver, ProviderError> {
        let fragments = match self.next(request) {
            Script::Fragments(fragments) => fragments,
            Script::Fail(e) => return Err(e),
        };
        let (tx, rx) = mpsc::channel(fragments.len() + 1);
        for fragment in fragments {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(fragment),
                    ..Default::default()
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                done: true,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }
}

pub fn registry_with(tools: Vec<Box<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    registry
}

/// Echoes `input.text` back as `{"echo": text}`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text back"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::complete(serde_json::json!({
            "echo": input["text"].as_str().unwrap_or_default()
        })))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Never works"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Streams `{"count": 1}` .. `{"count": 3}`, finishing on the last.
pub struct TickerTool;

#[async_trait]
impl Tool for TickerTool {
    fn name(&self) -> &str {
        "ticker"
    }

    fn description(&self) -> &str {
        "Count to three"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::complete(serde_json::json!({ "count": 3 })))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn execute_stream<'a>(&'a self, _input: serde_json::Value) -> ToolResultStream<'a> {
        Box::pin(stream::iter((1..=3).map(|n| {
            let output = serde_json::json!({ "count": n });
            Ok(if n == 3 {
                ToolResult::complete(output)
            } else {
                ToolResult::partial(output)
            })
        })))
    }
}
