//! `POST /v1/chat/completions`: OpenAI-compatible chat endpoint.
//!
//! Batch requests return one `chat.completion` body carrying the answer.
//! Streaming requests return SSE `chat.completion.chunk` frames rendered from
//! delta-buffer chunks, ending with `data: [DONE]`.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, info};

use reasonflow_agent::{DeltaChunk, EventKind, coalesce};
use reasonflow_core::message::{Conversation, ConversationId, Message, Role};

use crate::SharedState;

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub show_thinking: bool,
    #[serde(default = "default_true")]
    pub show_tool_requests: bool,
    #[serde(default = "default_true")]
    pub show_tool_outputs: bool,
    /// Continue a conversation kept by the gateway.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub conversation_id: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: CompletionUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Chunk rendering ───────────────────────────────────────────────────────

/// Turns delta chunks into chat-completion delta content.
///
/// Thinking is wrapped in `<thinking>` tags across its chunks, tool-class
/// chunks are each wrapped in their own tag, answers pass through.
#[derive(Debug)]
pub struct ChunkRenderer {
    show_thinking: bool,
    show_tool_requests: bool,
    show_tool_outputs: bool,
    thinking_open: bool,
}

/// One rendered delta: content plus an optional finish reason.
#[derive(Debug, PartialEq, Eq)]
pub struct RenderedDelta {
    pub content: String,
    pub finish_reason: Option<&'static str>,
}

impl ChunkRenderer {
    pub fn new(show_thinking: bool, show_tool_requests: bool, show_tool_outputs: bool) -> Self {
        Self {
            show_thinking,
            show_tool_requests,
            show_tool_outputs,
            thinking_open: false,
        }
    }

    fn from_request(request: &ChatCompletionRequest) -> Self {
        Self::new(
            request.show_thinking,
            request.show_tool_requests,
            request.show_tool_outputs,
        )
    }

    /// Render one chunk, or `None` when it is filtered out or empty.
    pub fn render(&mut self, chunk: &DeltaChunk) -> Option<RenderedDelta> {
        let visible = match chunk.tag {
            EventKind::Thinking => self.show_thinking,
            EventKind::Tool => self.show_tool_requests,
            EventKind::ToolResponse | EventKind::ToolError => self.show_tool_outputs,
            EventKind::Answer | EventKind::Error => true,
        };
        if !visible {
            return None;
        }

        let mut finish_reason = None;
        let content = match chunk.tag {
            EventKind::Thinking => {
                let mut out = String::new();
                if !self.thinking_open {
                    out.push_str("<thinking>");
                    self.thinking_open = true;
                }
                out.push_str(&chunk.content);
                if chunk.finished {
                    out.push_str("</thinking>");
                    self.thinking_open = false;
                }
                out
            }
            EventKind::Tool | EventKind::ToolResponse | EventKind::ToolError => {
                format!("<{tag}>{}</{tag}>", chunk.content, tag = chunk.tag)
            }
            EventKind::Answer => {
                if chunk.finished {
                    finish_reason = Some("stop");
                }
                chunk.content.clone()
            }
            EventKind::Error => {
                finish_reason = Some("stop");
                format!("\n\nError: {}", chunk.content)
            }
        };

        if content.is_empty() && finish_reason.is_none() {
            return None;
        }
        Some(RenderedDelta {
            content,
            finish_reason,
        })
    }
}

fn chunk_frame(id: &str, created: i64, model: &str, delta: serde_json::Value, finish_reason: Option<&str>) -> String {
    serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }]
    })
    .to_string()
}

// ── Conversation handling ─────────────────────────────────────────────────

/// Resolve the conversation for a request.
///
/// A known `conversation_id` continues the stored conversation with the
/// request's last user message. Otherwise the request's user and assistant
/// messages seed a fresh one.
async fn take_conversation(
    state: &SharedState,
    request: &ChatCompletionRequest,
    last_user: &str,
) -> Conversation {
    if let Some(id) = &request.conversation_id {
        let conversations = state.conversations.read().await;
        if let Some(existing) = conversations.get(id) {
            let mut conv = existing.clone();
            conv.push(Message::user(last_user));
            return conv;
        }
    }

    let seeded = request
        .messages
        .iter()
        .filter_map(|m| match m.role.as_str() {
            "user" => Some(Message::user(&m.content)),
            "assistant" => Some(Message::assistant(&m.content)),
            _ => None,
        })
        .collect();
    let id = request
        .conversation_id
        .as_deref()
        .map(ConversationId::from)
        .unwrap_or_default();
    Conversation::resume(id, seeded)
}

// ── Handler ───────────────────────────────────────────────────────────────

pub async fn chat_completions_handler(
    State(state): State<SharedState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No messages provided"));
    }
    let Some(last_user) = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User.as_str())
        .map(|m| m.content.clone())
    else {
        return Err(api_error(StatusCode::BAD_REQUEST, "No user message provided"));
    };

    let conversation = take_conversation(&state, &request, &last_user).await;
    info!(
        conversation_id = %conversation.id,
        stream = request.stream,
        messages = conversation.len(),
        "chat completion request"
    );

    if request.stream {
        Ok(stream_completion(state, request, conversation).into_response())
    } else {
        batch_completion(state, conversation).await.map(IntoResponse::into_response)
    }
}

async fn batch_completion(
    state: SharedState,
    mut conversation: Conversation,
) -> Result<Json<ChatCompletionResponse>, ApiError> {
    let mut answer = String::new();
    let mut failure = None;

    {
        let events = state.reasoning.run(&mut conversation);
        let mut chunks = coalesce(events, state.min_flush_size);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) if chunk.tag == EventKind::Answer => answer.push_str(&chunk.content),
                Ok(chunk) if chunk.tag == EventKind::Error => failure = Some(chunk.content),
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Reasoning session failed");
                    return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
                }
            }
        }
    }

    let conversation_id = conversation.id.to_string();
    state.store(conversation).await;

    // A session that ended without an answer reports why.
    if answer.is_empty() {
        if let Some(reason) = failure {
            answer = format!("Error: {reason}");
        }
    }

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".into(),
        created: chrono::Utc::now().timestamp(),
        model: state.model.clone(),
        conversation_id,
        choices: vec![CompletionChoice {
            index: 0,
            message: ChatMessage {
                role: Role::Assistant.as_str().into(),
                content: answer,
            },
            finish_reason: "stop".into(),
        }],
        usage: CompletionUsage::default(),
    }))
}

fn stream_completion(
    state: SharedState,
    request: ChatCompletionRequest,
    conversation: Conversation,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let mut renderer = ChunkRenderer::from_request(&request);
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();

    let stream = async_stream::stream! {
        let mut conversation = conversation;
        let model = state.model.clone();

        yield Ok(SseEvent::default().data(chunk_frame(
            &id,
            created,
            &model,
            serde_json::json!({ "role": "assistant" }),
            None,
        )));

        {
            let events = state.reasoning.run(&mut conversation);
            let mut chunks = coalesce(events, state.min_flush_size);
            while let Some(chunk) = chunks.next().await {
                let rendered = match chunk {
                    Ok(chunk) => renderer.render(&chunk),
                    Err(e) => {
                        error!(error = %e, "Reasoning session failed mid-stream");
                        Some(RenderedDelta {
                            content: format!("\n\nError: {e}"),
                            finish_reason: Some("stop"),
                        })
                    }
                };
                if let Some(delta) = rendered {
                    yield Ok(SseEvent::default().data(chunk_frame(
                        &id,
                        created,
                        &model,
                        serde_json::json!({ "content": delta.content }),
                        delta.finish_reason,
                    )));
                }
            }
        }

        state.store(conversation).await;
        yield Ok(SseEvent::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: EventKind, content: &str, finished: bool) -> DeltaChunk {
        DeltaChunk {
            tag,
            content: content.into(),
            finished,
        }
    }

    fn rendered(content: &str, finish_reason: Option<&'static str>) -> Option<RenderedDelta> {
        Some(RenderedDelta {
            content: content.into(),
            finish_reason,
        })
    }

    #[test]
    fn thinking_wrapped_across_chunks() {
        let mut renderer = ChunkRenderer::new(true, true, true);
        assert_eq!(
            renderer.render(&chunk(EventKind::Thinking, "Let me ", false)),
            rendered("<thinking>Let me ", None)
        );
        assert_eq!(
            renderer.render(&chunk(EventKind::Thinking, "check", true)),
            rendered("check</thinking>", None)
        );
        assert_eq!(
            renderer.render(&chunk(EventKind::Thinking, "again", true)),
            rendered("<thinking>again</thinking>", None)
        );
    }

    #[test]
    fn tool_chunks_wrapped_in_own_tag() {
        let mut renderer = ChunkRenderer::new(true, true, true);
        assert_eq!(
            renderer.render(&chunk(EventKind::Tool, r#"{"name":"shell"}"#, true)),
            rendered(r#"<tool>{"name":"shell"}</tool>"#, None)
        );
        assert_eq!(
            renderer.render(&chunk(EventKind::ToolError, "boom", true)),
            rendered("<tool_error>boom</tool_error>", None)
        );
    }

    #[test]
    fn answer_finish_carries_stop() {
        let mut renderer = ChunkRenderer::new(true, true, true);
        assert_eq!(
            renderer.render(&chunk(EventKind::Answer, "4", false)),
            rendered("4", None)
        );
        assert_eq!(
            renderer.render(&chunk(EventKind::Answer, "", true)),
            rendered("", Some("stop"))
        );
    }

    #[test]
    fn hidden_tags_are_filtered() {
        let mut renderer = ChunkRenderer::new(false, false, false);
        assert!(renderer.render(&chunk(EventKind::Thinking, "x", true)).is_none());
        assert!(renderer.render(&chunk(EventKind::Tool, "x", true)).is_none());
        assert!(renderer.render(&chunk(EventKind::ToolResponse, "x", true)).is_none());
        assert!(renderer.render(&chunk(EventKind::Answer, "x", true)).is_some());
        assert!(renderer.render(&chunk(EventKind::Error, "x", true)).is_some());
    }
}
