//! The bounded reasoning loop.
//!
//! Each round submits `[system] + conversation` to the generation provider,
//! routes the text through a [`TagStreamParser`], and acts on the segments:
//!
//! 1. **thinking** → `thinking` events; once finished, recorded in the
//!    conversation and the round continues
//! 2. **answer** → `answer` events; once finished, recorded and the session
//!    ends as answered
//! 3. **tool** (finished) → validated, dispatched to the toolkit, output
//!    recorded; the round ends and the model is invoked again
//! 4. leftover **raw** text in a round with no tagged block → a structured
//!    JSON response or a plain answer; beside tagged blocks it is ignored
//!
//! The session ends when an answer arrives, the provider fails, or the
//! iteration bound is reached. Events are produced lazily: nothing happens
//! until the consumer polls, and dropping the stream stops the session.

use crate::parser::{Segment, SegmentContent, SegmentTag, TagStreamParser};
use crate::prompt::SystemPrompt;
use crate::stream_event::{AgentEvent, EventKind};
use crate::structured::StructuredResponse;
use futures::StreamExt;
use futures::stream::BoxStream;
use reasonflow_config::{
    AppConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use reasonflow_core::error::{ProviderError, Result, ToolError};
use reasonflow_core::message::{Conversation, Message};
use reasonflow_core::provider::{Provider, ProviderRequest};
use reasonflow_core::tool::{ToolCall, ToolRegistry, ToolResult};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Content of the `tool_error` event when no toolkit is attached.
pub const NO_TOOLKIT: &str = "no toolkit available";

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalState {
    /// Still running, or abandoned by the consumer
    #[default]
    None,
    Answered,
    Clarification,
    Error,
    Exhausted,
}

/// Per-session bookkeeping: rounds used, the bound, and the outcome.
#[derive(Debug, Clone)]
pub struct ReasoningSession {
    iteration_count: usize,
    iteration_bound: usize,
    terminal_state: TerminalState,
}

impl ReasoningSession {
    pub fn new(iteration_bound: usize) -> Self {
        Self {
            iteration_count: 0,
            iteration_bound: iteration_bound.max(1),
            terminal_state: TerminalState::None,
        }
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn iteration_bound(&self) -> usize {
        self.iteration_bound
    }

    pub fn terminal_state(&self) -> TerminalState {
        self.terminal_state
    }

    fn exhausted(&self) -> bool {
        self.iteration_count >= self.iteration_bound
    }
}

/// One step of a tool dispatch: something to tell the consumer, or
/// something to record in the conversation.
enum DispatchStep {
    Emit(AgentEvent),
    Record(Message),
}

/// Drives a conversation to an answer through bounded generation rounds.
pub struct ReasoningLoop {
    provider: Arc<dyn Provider>,
    model: String,
    system_prompt: SystemPrompt,
    tools: Option<Arc<ToolRegistry>>,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: usize,
    stream_generation: bool,
}

impl ReasoningLoop {
    /// Create a loop with no toolkit attached.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system_prompt: SystemPrompt,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt,
            tools: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stream_generation: true,
        }
    }

    /// Create a loop from application configuration.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Option<Arc<ToolRegistry>>,
        config: &AppConfig,
    ) -> Self {
        let mut reasoning = Self::new(
            provider,
            &config.default_model,
            SystemPrompt::from(&config.identity),
        )
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens)
        .with_max_iterations(config.reasoning.max_iterations)
        .with_streaming(config.reasoning.stream_generation);
        reasoning.tools = tools;
        reasoning
    }

    /// Attach a toolkit.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the maximum number of generation rounds per session.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Stream generation fragments when the provider supports it.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_generation = enabled;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// A fresh session bounded by this loop's iteration limit.
    pub fn new_session(&self) -> ReasoningSession {
        ReasoningSession::new(self.max_iterations)
    }

    /// Run a session over `conversation`.
    ///
    /// Yields events in order. An `Err` item means the model produced a
    /// structured response that could not be validated; the stream ends
    /// after it.
    pub fn run<'a>(
        &'a self,
        conversation: &'a mut Conversation,
    ) -> BoxStream<'a, Result<AgentEvent>> {
        Box::pin(async_stream::stream! {
            let mut session = self.new_session();
            let mut events = self.run_with_session(conversation, &mut session);
            while let Some(event) = events.next().await {
                yield event;
            }
        })
    }

    /// Run with caller-owned session state, so the outcome and round count
    /// can be inspected once the stream is done.
    pub fn run_with_session<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        session: &'a mut ReasoningSession,
    ) -> BoxStream<'a, Result<AgentEvent>> {
        Box::pin(async_stream::stream! {
            let system = Message::system(self.system_prompt.render(self.tool_definitions().as_deref()));

            info!(
                conversation_id = %conversation.id,
                messages = conversation.len(),
                bound = session.iteration_bound,
                "Starting reasoning session"
            );

            loop {
                if session.exhausted() {
                    session.terminal_state = TerminalState::Exhausted;
                    warn!(
                        conversation_id = %conversation.id,
                        iterations = session.iteration_count,
                        "Iteration bound reached without an answer"
                    );
                    yield Ok(AgentEvent::error(format!(
                        "iteration limit of {} reached without an answer",
                        session.iteration_bound
                    )));
                    return;
                }

                session.iteration_count += 1;
                debug!(
                    conversation_id = %conversation.id,
                    iteration = session.iteration_count,
                    "Reasoning round"
                );

                let mut messages = Vec::with_capacity(conversation.len() + 1);
                messages.push(system.clone());
                messages.extend_from_slice(conversation.messages());

                let mut segments = self.generate(self.request(messages));
                let mut pending_call: Option<ToolCall> = None;
                // Leftover text only stands in for a response when the round
                // completed no tagged block.
                let mut tagged = false;

                while let Some(item) = segments.next().await {
                    let segment = match item {
                        Ok(segment) => segment,
                        Err(e) => {
                            session.terminal_state = TerminalState::Error;
                            error!(
                                conversation_id = %conversation.id,
                                error = %e,
                                "Generation failed"
                            );
                            yield Ok(AgentEvent::error(format!("generation failed: {e}")));
                            return;
                        }
                    };

                    match (segment.tag, segment.finished) {
                        (SegmentTag::Thinking, false) => {
                            yield Ok(AgentEvent::new(EventKind::Thinking, segment.content.as_text(), false));
                        }
                        (SegmentTag::Thinking, true) => {
                            tagged = true;
                            let text = segment.content.as_text().into_owned();
                            yield Ok(AgentEvent::new(EventKind::Thinking, text.as_str(), true));
                            conversation.push(Message::assistant(format!("[Thinking] {text}")));
                        }
                        (SegmentTag::Answer, false) => {
                            yield Ok(AgentEvent::new(EventKind::Answer, segment.content.as_text(), false));
                        }
                        (SegmentTag::Answer, true) => {
                            let text = segment.content.as_text().into_owned();
                            conversation.push(Message::assistant(text.as_str()));
                            session.terminal_state = TerminalState::Answered;
                            info!(
                                conversation_id = %conversation.id,
                                iterations = session.iteration_count,
                                "Session answered"
                            );
                            yield Ok(AgentEvent::new(EventKind::Answer, text, true));
                            return;
                        }
                        (SegmentTag::Tool, true) => {
                            tagged = true;
                            match parse_tool_request(&segment.content) {
                                Ok(call) => pending_call = Some(call),
                                Err(reason) => {
                                    warn!(conversation_id = %conversation.id, %reason, "Invalid tool request");
                                    conversation.push(Message::tool_result(
                                        "tool_request",
                                        serde_json::json!({ "error": reason }).to_string(),
                                    ));
                                    yield Ok(AgentEvent::tool_error(reason));
                                }
                            }
                            break;
                        }
                        (SegmentTag::Raw, true) if tagged => {
                            debug!(
                                conversation_id = %conversation.id,
                                leftover = %segment.content.as_text(),
                                "Ignoring untagged text beside tagged blocks"
                            );
                        }
                        (SegmentTag::Raw, true) => {
                            match leftover_step(segment) {
                                Ok(LeftoverStep::Answer(text)) => {
                                    conversation.push(Message::assistant(text.as_str()));
                                    session.terminal_state = TerminalState::Answered;
                                    yield Ok(AgentEvent::new(EventKind::Answer, text, true));
                                    return;
                                }
                                Ok(LeftoverStep::Clarify(question)) => {
                                    conversation.push(Message::assistant(question.as_str()));
                                    session.terminal_state = TerminalState::Clarification;
                                    info!(conversation_id = %conversation.id, "Session needs clarification");
                                    yield Ok(AgentEvent::new(EventKind::Answer, question, true));
                                    return;
                                }
                                Ok(LeftoverStep::Call(call)) => {
                                    pending_call = Some(call);
                                    break;
                                }
                                Err(e) => {
                                    session.terminal_state = TerminalState::Error;
                                    error!(conversation_id = %conversation.id, error = %e, "Malformed model response");
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                        (SegmentTag::Tool, false) | (SegmentTag::Raw, false) => {}
                    }
                }

                // The rest of this generation is not consumed once a tool
                // has been requested.
                drop(segments);

                if let Some(call) = pending_call {
                    let mut steps = self.dispatch(call);
                    while let Some(step) = steps.next().await {
                        match step {
                            DispatchStep::Emit(event) => yield Ok(event),
                            DispatchStep::Record(message) => conversation.push(message),
                        }
                    }
                }
            }
        })
    }

    fn tool_definitions(&self) -> Option<Vec<reasonflow_core::ToolDefinition>> {
        self.tools.as_ref().map(|registry| registry.definitions())
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream_generation,
            stop: vec![],
        }
    }

    /// Run one generation through a fresh parser.
    fn generate(
        &self,
        request: ProviderRequest,
    ) -> BoxStream<'_, std::result::Result<Segment, ProviderError>> {
        let streaming = self.stream_generation && self.provider.supports_streaming();
        Box::pin(async_stream::stream! {
            let mut parser = TagStreamParser::new();

            if streaming {
                let rx = match self.provider.stream(request).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let mut fragments = ReceiverStream::new(rx);
                while let Some(chunk) = fragments.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    if let Some(text) = chunk.content.as_deref() {
                        for segment in parser.feed(text) {
                            yield Ok(segment);
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
            } else {
                match self.provider.complete(request).await {
                    Ok(response) => {
                        for segment in parser.feed(&response.content) {
                            yield Ok(segment);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            for segment in parser.finish() {
                yield Ok(segment);
            }
        })
    }

    /// Execute a validated tool call, one step at a time.
    fn dispatch(&self, call: ToolCall) -> BoxStream<'_, DispatchStep> {
        Box::pin(async_stream::stream! {
            let registry = match self.tools.as_deref() {
                Some(registry) => registry,
                None => {
                    warn!(tool = %call.name, "Tool requested but no toolkit is attached");
                    yield DispatchStep::Record(error_message(&call, NO_TOOLKIT));
                    yield DispatchStep::Emit(AgentEvent::tool_error(NO_TOOLKIT));
                    return;
                }
            };

            let tool = match registry.get(&call.name) {
                Some(tool) => tool,
                None => {
                    let reason = ToolError::NotFound(call.name.clone()).to_string();
                    warn!(tool = %call.name, "Unknown tool requested");
                    yield DispatchStep::Record(error_message(&call, &reason));
                    yield DispatchStep::Emit(AgentEvent::tool_error(reason));
                    return;
                }
            };

            let request = serde_json::json!({ "name": call.name, "input": call.input });
            yield DispatchStep::Emit(AgentEvent::new(EventKind::Tool, request.to_string(), true));

            info!(tool = %call.name, call_id = %call.id, streaming = tool.supports_streaming(), "Dispatching tool");
            let start = std::time::Instant::now();

            if tool.supports_streaming() {
                let mut partials = tool.execute_stream(call.input.clone());
                let mut last: Option<ToolResult> = None;

                while let Some(item) = partials.next().await {
                    match item {
                        Ok(result) if result.finished => {
                            debug!(tool = %call.name, duration_ms = start.elapsed().as_millis() as u64, "Tool finished");
                            yield DispatchStep::Record(output_message(&call, &result));
                            yield DispatchStep::Emit(response_event(&result));
                            return;
                        }
                        Ok(result) => {
                            yield DispatchStep::Emit(response_event(&result));
                            last = Some(result);
                        }
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "Tool execution failed");
                            let reason = e.to_string();
                            yield DispatchStep::Record(error_message(&call, &reason));
                            yield DispatchStep::Emit(AgentEvent::tool_error(reason));
                            return;
                        }
                    }
                }

                // The stream ended without a finished partial; the last one stands.
                match last {
                    Some(mut result) => {
                        result.finished = true;
                        yield DispatchStep::Record(output_message(&call, &result));
                        yield DispatchStep::Emit(response_event(&result));
                    }
                    None => {
                        let reason = ToolError::ExecutionFailed {
                            tool_name: call.name.clone(),
                            reason: "tool produced no output".into(),
                        }
                        .to_string();
                        yield DispatchStep::Record(error_message(&call, &reason));
                        yield DispatchStep::Emit(AgentEvent::tool_error(reason));
                    }
                }
            } else {
                match tool.execute(call.input.clone()).await {
                    Ok(mut result) => {
                        debug!(tool = %call.name, duration_ms = start.elapsed().as_millis() as u64, "Tool finished");
                        result.finished = true;
                        yield DispatchStep::Record(output_message(&call, &result));
                        yield DispatchStep::Emit(response_event(&result));
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool execution failed");
                        let reason = e.to_string();
                        yield DispatchStep::Record(error_message(&call, &reason));
                        yield DispatchStep::Emit(AgentEvent::tool_error(reason));
                    }
                }
            }
        })
    }
}

fn response_event(result: &ToolResult) -> AgentEvent {
    AgentEvent::new(
        EventKind::ToolResponse,
        result.output.to_string(),
        result.finished,
    )
}

fn output_message(call: &ToolCall, result: &ToolResult) -> Message {
    let body = serde_json::json!({
        "name": call.name,
        "input": call.input,
        "output": result.output,
    });
    Message::tool_result(&call.id, body.to_string())
}

fn error_message(call: &ToolCall, reason: &str) -> Message {
    let body = serde_json::json!({
        "name": call.name,
        "input": call.input,
        "error": reason,
    });
    Message::tool_result(&call.id, body.to_string())
}

/// Validate a finished `<tool>` body into a call.
///
/// The body must be a JSON object with a string `name` and an `input` (or
/// `args`) that is an object or a JSON-encoded object.
fn parse_tool_request(content: &SegmentContent) -> std::result::Result<ToolCall, String> {
    let value = match content {
        SegmentContent::Json(value) => value.clone(),
        SegmentContent::Text(text) => serde_json::from_str::<serde_json::Value>(text)
            .map_err(|e| format!("tool request is not valid JSON: {e}"))?,
    };

    let serde_json::Value::Object(mut body) = value else {
        return Err("tool request must be a JSON object".into());
    };

    let name = match body.get("name").and_then(|n| n.as_str()) {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err("tool request is missing a name".into()),
    };

    let input = body
        .remove("input")
        .or_else(|| body.remove("args"))
        .ok_or_else(|| format!("tool request for '{name}' is missing input/args"))?;

    let input = match input {
        serde_json::Value::String(encoded) => serde_json::from_str::<serde_json::Value>(&encoded)
            .map_err(|e| format!("tool input for '{name}' is not valid JSON: {e}"))?,
        other => other,
    };

    if !input.is_object() {
        return Err(format!("tool input for '{name}' must be a JSON object"));
    }

    Ok(ToolCall::new(name, input))
}

enum LeftoverStep {
    Answer(String),
    Clarify(String),
    Call(ToolCall),
}

/// Interpret text left over at the end of a generation.
fn leftover_step(segment: Segment) -> Result<LeftoverStep> {
    match segment.content {
        SegmentContent::Json(value) => match StructuredResponse::from_value(&value)? {
            StructuredResponse::Final { content } => Ok(LeftoverStep::Answer(content)),
            StructuredResponse::Clarification { question } => Ok(LeftoverStep::Clarify(question)),
            StructuredResponse::ToolUse {
                tool_name,
                tool_input,
            } => Ok(LeftoverStep::Call(ToolCall::new(tool_name, tool_input))),
        },
        SegmentContent::Text(text) => Ok(LeftoverStep::Answer(text)),
    }
}
