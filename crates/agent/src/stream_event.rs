//! Reasoning-session events.
//!
//! `AgentEvent` is what the reasoning loop yields to its consumer and what
//! the delta buffer coalesces for transport. Every variant carries the same
//! `{content, finished}` payload; the variant is the event type.

use serde::{Deserialize, Serialize};

/// Events emitted by a reasoning session.
///
/// Wire shape: `{"type": "...", "content": "...", "finished": bool}`.
/// - `thinking`     : model reasoning, cumulative per span
/// - `tool`         : a validated tool request (`{"name", "input"}` JSON)
/// - `tool_response`: tool output, one per partial for streaming tools
/// - `tool_error`   : invalid tool request or failed execution
/// - `answer`       : the final answer, cumulative per span
/// - `error`        : terminal session error (e.g. iteration bound reached)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { content: String, finished: bool },
    Tool { content: String, finished: bool },
    ToolResponse { content: String, finished: bool },
    ToolError { content: String, finished: bool },
    Answer { content: String, finished: bool },
    Error { content: String, finished: bool },
}

/// The event type without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thinking,
    Tool,
    ToolResponse,
    ToolError,
    Answer,
    Error,
}

impl EventKind {
    /// Wire name for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Tool => "tool",
            Self::ToolResponse => "tool_response",
            Self::ToolError => "tool_error",
            Self::Answer => "answer",
            Self::Error => "error",
        }
    }

    /// Tool-class events carry whole payloads and are never merged.
    pub fn is_tool_class(&self) -> bool {
        matches!(self, Self::Tool | Self::ToolResponse | Self::ToolError)
    }

    /// Content-class events report cumulative text per span.
    pub fn is_content_class(&self) -> bool {
        matches!(self, Self::Thinking | Self::Answer)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentEvent {
    pub fn new(kind: EventKind, content: impl Into<String>, finished: bool) -> Self {
        let content = content.into();
        match kind {
            EventKind::Thinking => Self::Thinking { content, finished },
            EventKind::Tool => Self::Tool { content, finished },
            EventKind::ToolResponse => Self::ToolResponse { content, finished },
            EventKind::ToolError => Self::ToolError { content, finished },
            EventKind::Answer => Self::Answer { content, finished },
            EventKind::Error => Self::Error { content, finished },
        }
    }

    /// A finished `error` event.
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(EventKind::Error, content, true)
    }

    /// A finished `tool_error` event.
    pub fn tool_error(content: impl Into<String>) -> Self {
        Self::new(EventKind::ToolError, content, true)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Thinking { .. } => EventKind::Thinking,
            Self::Tool { .. } => EventKind::Tool,
            Self::ToolResponse { .. } => EventKind::ToolResponse,
            Self::ToolError { .. } => EventKind::ToolError,
            Self::Answer { .. } => EventKind::Answer,
            Self::Error { .. } => EventKind::Error,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Thinking { content, .. }
            | Self::Tool { content, .. }
            | Self::ToolResponse { content, .. }
            | Self::ToolError { content, .. }
            | Self::Answer { content, .. }
            | Self::Error { content, .. } => content,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Thinking { finished, .. }
            | Self::Tool { finished, .. }
            | Self::ToolResponse { finished, .. }
            | Self::ToolError { finished, .. }
            | Self::Answer { finished, .. }
            | Self::Error { finished, .. } => *finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_thinking() {
        let event = AgentEvent::new(EventKind::Thinking, "Let me check", false);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"thinking","content":"Let me check","finished":false}"#
        );
    }

    #[test]
    fn event_serialization_tool_response() {
        let event = AgentEvent::new(EventKind::ToolResponse, r#"{"output":"ok"}"#, true);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_response""#));
        assert!(json.contains(r#""finished":true"#));
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"tool_error","content":"no toolkit available","finished":true}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, AgentEvent::tool_error("no toolkit available"));
    }

    #[test]
    fn accessors_match_constructor() {
        for kind in [
            EventKind::Thinking,
            EventKind::Tool,
            EventKind::ToolResponse,
            EventKind::ToolError,
            EventKind::Answer,
            EventKind::Error,
        ] {
            let event = AgentEvent::new(kind, "x", true);
            assert_eq!(event.kind(), kind);
            assert_eq!(event.content(), "x");
            assert!(event.is_finished());
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], kind.as_str());
        }
    }

    #[test]
    fn event_classes() {
        assert!(EventKind::Tool.is_tool_class());
        assert!(EventKind::ToolResponse.is_tool_class());
        assert!(EventKind::ToolError.is_tool_class());
        assert!(!EventKind::Error.is_tool_class());
        assert!(EventKind::Answer.is_content_class());
        assert!(!EventKind::Error.is_content_class());
    }
}
