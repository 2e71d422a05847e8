//! Shell tool: execute system commands.
//!
//! Supports command allowlisting. Output streams back line by line.

use crate::process::{self, ProcessOutput};
use async_trait::async_trait;
use reasonflow_core::error::ToolError;
use reasonflow_core::tool::{Tool, ToolResult, ToolResultStream};
use tracing::debug;

const TOOL_NAME: &str = "shell";

/// Execute shell commands with an allowlist.
pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true; // No allowlist = all commands allowed
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("");
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    fn command_from(&self, input: &serde_json::Value) -> Result<String, ToolError> {
        let command = input["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: TOOL_NAME.into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        Ok(command.to_string())
    }
}

fn render(output: &ProcessOutput) -> serde_json::Value {
    let mut text = output.stdout.trim_end().to_string();
    if !output.stderr.trim().is_empty() {
        text = format!("{text}\n[stderr]: {}", output.stderr.trim_end());
    }
    serde_json::json!({
        "output": text.trim(),
        "exit_code": output.exit_code,
    })
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output and exit code. Use this for running programs, inspecting files, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolResult, ToolError> {
        process::last_result(TOOL_NAME, self.execute_stream(input)).await
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn execute_stream<'a>(&'a self, input: serde_json::Value) -> ToolResultStream<'a> {
        match self.command_from(&input) {
            Ok(command) => {
                debug!(command = %command, "Executing shell command");
                process::stream_command(TOOL_NAME, process::shell_command(&command), None, render)
            }
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn allowlist_check() {
        let tool = ShellTool::new(vec!["ls".into(), "cat".into(), "git".into()]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("cat file.txt"));
        assert!(tool.is_command_allowed("git status"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("sudo something"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let tool = ShellTool::new(vec![]);
        assert!(tool.is_command_allowed("anything goes"));
    }

    #[test]
    fn render_appends_stderr() {
        let output = ProcessOutput {
            stdout: "ok\n".into(),
            stderr: "warning: x\n".into(),
            exit_code: Some(0),
        };
        let json = render(&output);
        assert_eq!(json["output"], "ok\n[stderr]: warning: x");
        assert_eq!(json["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(result.finished);
        assert_eq!(result.output["output"], "hello");
        assert_eq!(result.output["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(serde_json::json!({"command": "exit 3"}))
            .await
            .unwrap();
        assert_eq!(result.output["exit_code"], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_line_partials() {
        let tool = ShellTool::new(vec![]);
        assert!(tool.supports_streaming());
        let partials: Vec<_> = tool
            .execute_stream(serde_json::json!({"command": "printf 'a\\nb\\n'"}))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(partials.len(), 3);
        assert_eq!(partials[0].output["output"], "a");
        assert_eq!(partials[1].output["output"], "a\nb");
        assert!(!partials[1].finished);
        assert!(partials[2].finished);
    }

    #[tokio::test]
    async fn blocked_command() {
        let tool = ShellTool::new(vec!["ls".into()]);
        let result = tool
            .execute(serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn missing_command_argument() {
        let tool = ShellTool::new(vec![]);
        let result = tool.execute(serde_json::json!({"cmd": "ls"})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
