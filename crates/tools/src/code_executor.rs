//! Code executor tool: run a snippet through an interpreter.
//!
//! The snippet is passed as `<interpreter> -c <code>`. The result is
//! `{output, error}`: stdout, and stderr when the snippet failed. A failing
//! snippet is a normal result so the model can read the traceback; only a
//! process that cannot run or times out is a tool error.

use crate::process::{self, ProcessOutput};
use async_trait::async_trait;
use reasonflow_config::CodeExecutorConfig;
use reasonflow_core::error::ToolError;
use reasonflow_core::tool::{Tool, ToolResult, ToolResultStream};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const TOOL_NAME: &str = "code_executor";

pub struct CodeExecutorTool {
    interpreter: String,
    default_timeout_secs: u64,
}

impl CodeExecutorTool {
    pub fn new(interpreter: impl Into<String>, default_timeout_secs: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            default_timeout_secs,
        }
    }

    pub fn from_config(config: &CodeExecutorConfig) -> Self {
        Self::new(&config.interpreter, config.timeout_secs)
    }

    fn parse_input(&self, input: &serde_json::Value) -> Result<(String, u64), ToolError> {
        let code = input["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;

        let timeout = match input.get("timeout") {
            None | Some(serde_json::Value::Null) => self.default_timeout_secs,
            Some(v) => v.as_u64().filter(|t| *t > 0).ok_or_else(|| {
                ToolError::InvalidArguments("'timeout' must be a positive integer".into())
            })?,
        };

        Ok((code.to_string(), timeout))
    }
}

fn render(output: &ProcessOutput) -> serde_json::Value {
    let failed = output.exit_code.is_some_and(|c| c != 0);
    let mut result = serde_json::json!({ "output": output.stdout });
    if failed || !output.stderr.is_empty() {
        let error = if output.stderr.trim().is_empty() {
            format!("exit code {}", output.exit_code.unwrap_or(-1))
        } else {
            output.stderr.trim_end().to_string()
        };
        result["error"] = serde_json::Value::String(error);
    }
    result
}

#[async_trait]
impl Tool for CodeExecutorTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Executes code and returns the output or error message"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Source code to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds",
                    "default": self.default_timeout_secs
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        process::last_result(TOOL_NAME, self.execute_stream(input)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn execute_stream<'a>(&'a self, input: serde_json::Value) -> ToolResultStream<'a> {
        match self.parse_input(&input) {
            Ok((code, timeout_secs)) => {
                debug!(interpreter = %self.interpreter, timeout_secs, "Executing code snippet");
                let mut command = Command::new(&self.interpreter);
                command.arg("-c").arg(code);
                process::stream_command(
                    TOOL_NAME,
                    command,
                    Some(Duration::from_secs(timeout_secs)),
                    render,
                )
            }
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }
}
