//! Child-process runner shared by the process-backed tools.
//!
//! Spawns a command, reads stdout line by line and yields the cumulative
//! output so far as a partial [`ToolResult`]. The last item carries stderr
//! and the exit code and is marked finished.

use futures::StreamExt;
use reasonflow_core::error::ToolError;
use reasonflow_core::tool::{ToolResult, ToolResultStream};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Output collected from a child process so far.
#[derive(Debug, Default, Clone)]
pub(crate) struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` while running, or when killed by a signal
    pub exit_code: Option<i32>,
}

/// Turns collected output into the tool's JSON shape.
pub(crate) type Render = fn(&ProcessOutput) -> serde_json::Value;

/// Run `command`, yielding a partial per stdout line and a finished result
/// once the process exits.
pub(crate) fn stream_command(
    tool_name: &'static str,
    mut command: Command,
    timeout: Option<Duration>,
    render: Render,
) -> ToolResultStream<'static> {
    Box::pin(async_stream::stream! {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                yield Err(ToolError::ExecutionFailed {
                    tool_name: tool_name.into(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let (stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                yield Err(ToolError::ExecutionFailed {
                    tool_name: tool_name.into(),
                    reason: "child process pipes unavailable".into(),
                });
                return;
            }
        };

        // Drained concurrently so a chatty stderr cannot block the child.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = || ToolError::Timeout {
            tool_name: tool_name.into(),
            timeout_secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
        };

        let mut collected = ProcessOutput::default();
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, lines.next_line()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(tool = tool_name, "Process timed out, killing");
                        let _ = child.kill().await;
                        yield Err(timed_out());
                        return;
                    }
                },
                None => lines.next_line().await,
            };

            match next {
                Ok(Some(line)) => {
                    collected.stdout.push_str(&line);
                    collected.stdout.push('\n');
                    yield Ok(ToolResult::partial(render(&collected)));
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(ToolError::ExecutionFailed {
                        tool_name: tool_name.into(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }

        let status = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    yield Err(timed_out());
                    return;
                }
            },
            None => child.wait().await,
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                yield Err(ToolError::ExecutionFailed {
                    tool_name: tool_name.into(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        collected.stderr = stderr_task.await.unwrap_or_default();
        collected.exit_code = status.code();
        debug!(tool = tool_name, exit_code = ?collected.exit_code, "Process finished");

        yield Ok(ToolResult::complete(render(&collected)));
    })
}

/// Drive a partial stream to its finished result.
pub(crate) async fn last_result(
    tool_name: &str,
    mut stream: ToolResultStream<'_>,
) -> Result<ToolResult, ToolError> {
    let mut last = None;
    while let Some(item) = stream.next().await {
        let result = item?;
        let finished = result.finished;
        last = Some(result);
        if finished {
            break;
        }
    }
    last.ok_or_else(|| ToolError::ExecutionFailed {
        tool_name: tool_name.into(),
        reason: "tool produced no output".into(),
    })
}

/// Platform shell invocation for a command line.
pub(crate) fn shell_command(command_line: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command_line]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command_line]);
        cmd
    }
}
