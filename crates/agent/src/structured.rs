//! Structured (JSON) model responses.
//!
//! When a model ignores the tag format and replies with a bare JSON object,
//! the object must be one of three well-formed shapes. Anything else is
//! malformed output the loop cannot act on.

use reasonflow_core::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A validated structured response.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredResponse {
    /// `{"response_type": "final", "content": ...}`
    Final { content: String },
    /// `{"response_type": "tool_use", "tool_name": ..., "tool_input": {...}}`
    ToolUse { tool_name: String, tool_input: Value },
    /// `{"response_type": "clarification", "question": ...}`
    Clarification { question: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ResponseType {
    Final,
    ToolUse,
    Clarification,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    response_type: ResponseType,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Map<String, Value>>,
    #[serde(default)]
    question: Option<String>,
}

impl StructuredResponse {
    /// Validate a JSON value as a structured response.
    ///
    /// Each type requires its own fields and forbids the others'.
    pub fn from_value(value: &Value) -> Result<Self> {
        let raw = RawResponse::deserialize(value)
            .map_err(|e| malformed(format!("invalid response structure: {e}")))?;

        match raw.response_type {
            ResponseType::Final => {
                let content = raw
                    .content
                    .ok_or_else(|| malformed("content is required for a final response"))?;
                if raw.tool_name.is_some() || raw.tool_input.is_some() || raw.question.is_some() {
                    return Err(malformed("a final response carries only content"));
                }
                Ok(Self::Final { content })
            }
            ResponseType::ToolUse => {
                let (Some(tool_name), Some(tool_input)) = (raw.tool_name, raw.tool_input) else {
                    return Err(malformed(
                        "tool_name and tool_input are required for a tool_use response",
                    ));
                };
                if raw.content.is_some() || raw.question.is_some() {
                    return Err(malformed(
                        "a tool_use response carries only tool_name and tool_input",
                    ));
                }
                Ok(Self::ToolUse {
                    tool_name,
                    tool_input: Value::Object(tool_input),
                })
            }
            ResponseType::Clarification => {
                let question = raw
                    .question
                    .ok_or_else(|| malformed("question is required for a clarification response"))?;
                if raw.content.is_some() || raw.tool_name.is_some() || raw.tool_input.is_some() {
                    return Err(malformed("a clarification response carries only a question"));
                }
                Ok(Self::Clarification { question })
            }
        }
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedResponse(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_response() {
        let parsed =
            StructuredResponse::from_value(&json!({"response_type": "final", "content": "42"}))
                .unwrap();
        assert_eq!(parsed, StructuredResponse::Final { content: "42".into() });
    }

    #[test]
    fn tool_use_response() {
        let parsed = StructuredResponse::from_value(&json!({
            "response_type": "tool_use",
            "tool_name": "shell",
            "tool_input": {"command": "ls"}
        }))
        .unwrap();
        match parsed {
            StructuredResponse::ToolUse { tool_name, tool_input } => {
                assert_eq!(tool_name, "shell");
                assert_eq!(tool_input["command"], "ls");
            }
            other => panic!("expected tool use, got {other:?}"),
        }
    }

    #[test]
    fn clarification_response() {
        let parsed = StructuredResponse::from_value(&json!({
            "response_type": "clarification",
            "question": "Which namespace?"
        }))
        .unwrap();
        assert_eq!(
            parsed,
            StructuredResponse::Clarification { question: "Which namespace?".into() }
        );
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = StructuredResponse::from_value(&json!({"response_type": "final"})).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));

        let err = StructuredResponse::from_value(&json!({
            "response_type": "tool_use",
            "tool_name": "shell"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("tool_input"));
    }

    #[test]
    fn fields_of_another_type_are_malformed() {
        let err = StructuredResponse::from_value(&json!({
            "response_type": "final",
            "content": "x",
            "question": "y"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn unrelated_fields_are_ignored() {
        let parsed = StructuredResponse::from_value(&json!({
            "response_type": "final",
            "content": "x",
            "mood": "happy"
        }))
        .unwrap();
        assert_eq!(parsed, StructuredResponse::Final { content: "x".into() });
    }

    #[test]
    fn unknown_type_is_malformed() {
        assert!(StructuredResponse::from_value(&json!({"response_type": "poem"})).is_err());
        assert!(StructuredResponse::from_value(&json!({"text": "hi"})).is_err());
    }

    #[test]
    fn non_object_tool_input_is_malformed() {
        assert!(
            StructuredResponse::from_value(&json!({
                "response_type": "tool_use",
                "tool_name": "shell",
                "tool_input": "ls"
            }))
            .is_err()
        );
    }
}
