//! Streaming-envelope unwrapping.
//!
//! Some generation backends hand over raw SSE frames instead of plain text.
//! A chunk whose non-blank lines are all `data:` frames is unwrapped to the
//! text deltas it carries. Anything else is returned unchanged.

use serde_json::Value;
use std::borrow::Cow;

/// Unwrap `chunk` to plain text if it is a recognized delta envelope.
///
/// Recognized payloads:
/// - OpenAI style: `choices[0].delta.content`
/// - Anthropic style: `delta.text`
///
/// `[DONE]`, empty deltas, and frames without text yield nothing. If any
/// frame fails to parse as JSON the chunk is treated as plain text.
pub fn unwrap(chunk: &str) -> Cow<'_, str> {
    let mut frames = chunk
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .peekable();

    if frames.peek().is_none() {
        return Cow::Borrowed(chunk);
    }

    let mut text = String::new();
    for line in frames {
        let Some(payload) = line.strip_prefix("data:") else {
            return Cow::Borrowed(chunk);
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(frame) if frame.is_object() => {
                if let Some(delta) = delta_text(&frame) {
                    text.push_str(delta);
                }
            }
            _ => return Cow::Borrowed(chunk),
        }
    }

    Cow::Owned(text)
}

fn delta_text(frame: &Value) -> Option<&str> {
    frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .or_else(|| frame.pointer("/delta/text").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(unwrap("<thinking>hi"), "<thinking>hi");
        assert!(matches!(unwrap("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn openai_delta_unwrapped() {
        let chunk = "data: {\"choices\":[{\"delta\":{\"content\":\"<ans\"}}]}\n\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"wer>\"}}]}\n\n";
        assert_eq!(unwrap(chunk), "<answer>");
    }

    #[test]
    fn anthropic_delta_unwrapped() {
        let chunk = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"42"}}"#;
        assert_eq!(unwrap(chunk), "42");
    }

    #[test]
    fn end_markers_yield_nothing() {
        assert_eq!(unwrap("data: [DONE]\n\n"), "");
        assert_eq!(unwrap(r#"data: {"choices":[{"delta":{}}]}"#), "");
        assert_eq!(unwrap(r#"data: {"type":"message_stop"}"#), "");
    }

    #[test]
    fn unparseable_frames_kept_verbatim() {
        assert_eq!(unwrap("data: 5 apples"), "data: 5 apples");
        let mixed = "data: {\"choices\":[]}\nnot a frame";
        assert_eq!(unwrap(mixed), mixed);
    }

    #[test]
    fn whitespace_chunk_unchanged() {
        assert_eq!(unwrap("\n  \n"), "\n  \n");
        assert_eq!(unwrap(""), "");
    }
}
