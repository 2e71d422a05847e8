//! Event coalescing for transport.
//!
//! The reasoning loop reports `thinking` and `answer` content cumulatively:
//! every event carries everything seen so far for that block. The
//! [`EventDeltaBuffer`] turns that into suffix deltas and batches them until
//! at least `min_flush_size` bytes are pending, the block finishes, or
//! another tag takes over. Tool-class and error events carry their full
//! payload and pass straight through after flushing whatever is pending.

use crate::stream_event::{AgentEvent, EventKind};
use futures::stream::{BoxStream, Stream, StreamExt};
use reasonflow_core::error::Result;
use serde::Serialize;
use std::collections::HashMap;

/// One transport chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaChunk {
    pub tag: EventKind,
    pub content: String,
    pub finished: bool,
}

impl DeltaChunk {
    fn new(tag: EventKind, content: impl Into<String>, finished: bool) -> Self {
        Self {
            tag,
            content: content.into(),
            finished,
        }
    }
}

#[derive(Debug, Default)]
struct TagState {
    last_seen: String,
    pending: String,
    finished: bool,
}

/// Coalesces cumulative events into ordered delta chunks.
#[derive(Debug)]
pub struct EventDeltaBuffer {
    min_flush_size: usize,
    tags: HashMap<EventKind, TagState>,
    /// Tag whose working buffer may hold unflushed content
    active: Option<EventKind>,
}

impl EventDeltaBuffer {
    pub fn new(min_flush_size: usize) -> Self {
        Self {
            min_flush_size: min_flush_size.max(1),
            tags: HashMap::new(),
            active: None,
        }
    }

    /// Accept one event and return the chunks it releases, in order.
    pub fn push(&mut self, event: &AgentEvent) -> Vec<DeltaChunk> {
        let kind = event.kind();
        let mut out = Vec::new();

        // A repeated completion only counts as a duplicate when nothing else
        // arrived in between; any other event starts the next block afresh.
        self.tags.retain(|tag, state| *tag == kind || !state.finished);

        if !kind.is_content_class() {
            self.flush_active(&mut out, false);
            out.push(DeltaChunk::new(kind, event.content(), event.is_finished()));
            return out;
        }

        if self.active.is_some_and(|active| active != kind) {
            self.flush_active(&mut out, false);
        }

        let min_flush_size = self.min_flush_size;
        let state = self.tags.entry(kind).or_default();
        let content = event.content();

        if state.finished {
            if content == state.last_seen {
                // Repeated completion for a block already closed
                return out;
            }
            // A new block of the same tag
            state.last_seen.clear();
            state.finished = false;
        }

        let delta = match content.strip_prefix(state.last_seen.as_str()) {
            Some(suffix) => suffix,
            None => {
                tracing::debug!(tag = %kind, "Cumulative content diverged; restarting block");
                content
            }
        };
        state.pending.push_str(delta);
        state.last_seen = content.to_string();
        self.active = Some(kind);

        if event.is_finished() {
            let pending = std::mem::take(&mut state.pending);
            out.push(DeltaChunk::new(kind, pending, true));
            state.finished = true;
            self.active = None;
        } else if state.pending.len() >= min_flush_size {
            out.push(DeltaChunk::new(kind, std::mem::take(&mut state.pending), false));
        }

        out
    }

    /// End of stream: release any remaining content as a finished chunk.
    pub fn finish(&mut self) -> Vec<DeltaChunk> {
        let mut out = Vec::new();
        self.flush_active(&mut out, true);
        out
    }

    fn flush_active(&mut self, out: &mut Vec<DeltaChunk>, finished: bool) {
        let Some(kind) = self.active.take() else {
            return;
        };
        if let Some(state) = self.tags.get_mut(&kind) {
            if !state.pending.is_empty() {
                out.push(DeltaChunk::new(kind, std::mem::take(&mut state.pending), finished));
                state.finished |= finished;
            }
        }
    }
}

/// Coalesce an event stream lazily.
///
/// An `Err` item flushes pending content, is passed on, and ends the stream.
pub fn coalesce<'a, S>(events: S, min_flush_size: usize) -> BoxStream<'a, Result<DeltaChunk>>
where
    S: Stream<Item = Result<AgentEvent>> + Send + 'a,
{
    Box::pin(async_stream::stream! {
        let mut buffer = EventDeltaBuffer::new(min_flush_size);
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    for chunk in buffer.push(&event) {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    for chunk in buffer.finish() {
                        yield Ok(chunk);
                    }
                    yield Err(e);
                    return;
                }
            }
        }

        for chunk in buffer.finish() {
            yield Ok(chunk);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reasonflow_core::Error;

    fn thinking(content: &str, finished: bool) -> AgentEvent {
        AgentEvent::new(EventKind::Thinking, content, finished)
    }

    fn answer(content: &str, finished: bool) -> AgentEvent {
        AgentEvent::new(EventKind::Answer, content, finished)
    }

    fn push_all(buffer: &mut EventDeltaBuffer, events: &[AgentEvent]) -> Vec<DeltaChunk> {
        let mut out: Vec<_> = events.iter().flat_map(|e| buffer.push(e)).collect();
        out.extend(buffer.finish());
        out
    }

    #[test]
    fn threshold_then_finish_flush() {
        let mut buffer = EventDeltaBuffer::new(2);
        let chunks = push_all(
            &mut buffer,
            &[thinking("A", false), thinking("AB", false), thinking("ABC", true)],
        );
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Thinking, "AB", false),
                DeltaChunk::new(EventKind::Thinking, "C", true),
            ]
        );
    }

    #[test]
    fn tool_events_flush_pending_and_pass_through() {
        let mut buffer = EventDeltaBuffer::new(100);
        let mut chunks = buffer.push(&thinking("short", false));
        assert!(chunks.is_empty());

        chunks.extend(buffer.push(&AgentEvent::new(
            EventKind::Tool,
            r#"{"name":"shell"}"#,
            true,
        )));
        chunks.extend(buffer.push(&AgentEvent::new(EventKind::ToolResponse, "{\"n\":1}", false)));
        chunks.extend(buffer.push(&AgentEvent::new(EventKind::ToolResponse, "{\"n\":2}", true)));

        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Thinking, "short", false),
                DeltaChunk::new(EventKind::Tool, r#"{"name":"shell"}"#, true),
                DeltaChunk::new(EventKind::ToolResponse, "{\"n\":1}", false),
                DeltaChunk::new(EventKind::ToolResponse, "{\"n\":2}", true),
            ]
        );
    }

    #[test]
    fn tag_change_flushes_previous_tag() {
        let mut buffer = EventDeltaBuffer::new(100);
        let chunks = push_all(&mut buffer, &[thinking("plan", false), answer("4", false)]);
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Thinking, "plan", false),
                DeltaChunk::new(EventKind::Answer, "4", true),
            ]
        );
    }

    #[test]
    fn finish_without_new_content_emits_one_empty_chunk() {
        let mut buffer = EventDeltaBuffer::new(1);
        let chunks = push_all(
            &mut buffer,
            &[answer("42", false), answer("42", true), answer("42", true)],
        );
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Answer, "42", false),
                DeltaChunk::new(EventKind::Answer, "", true),
            ]
        );
    }

    #[test]
    fn new_block_after_finish_starts_fresh() {
        let mut buffer = EventDeltaBuffer::new(1);
        let chunks = push_all(
            &mut buffer,
            &[thinking("first", true), thinking("second", true)],
        );
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Thinking, "first", true),
                DeltaChunk::new(EventKind::Thinking, "second", true),
            ]
        );
    }

    #[test]
    fn identical_blocks_separated_by_tools_are_all_emitted() {
        let mut buffer = EventDeltaBuffer::new(1);
        let tool = AgentEvent::new(EventKind::Tool, "{}", true);
        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(thinking("Need pods", true));
            events.push(tool.clone());
        }

        let chunks = push_all(&mut buffer, &events);

        let thinking_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.tag == EventKind::Thinking)
            .collect();
        assert_eq!(thinking_chunks.len(), 3);
        assert!(
            thinking_chunks
                .iter()
                .all(|c| c.content == "Need pods" && c.finished)
        );
        assert_eq!(chunks.len(), 6);
    }

    #[test]
    fn identical_block_after_other_tag_is_emitted() {
        let mut buffer = EventDeltaBuffer::new(1);
        let chunks = push_all(
            &mut buffer,
            &[thinking("again", true), answer("x", false), thinking("again", true)],
        );
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Thinking, "again", true),
                DeltaChunk::new(EventKind::Answer, "x", false),
                DeltaChunk::new(EventKind::Thinking, "again", true),
            ]
        );
    }

    #[test]
    fn errors_flush_pending_first() {
        let mut buffer = EventDeltaBuffer::new(100);
        let mut chunks = buffer.push(&answer("partial", false));
        chunks.extend(buffer.push(&AgentEvent::error("boom")));
        assert_eq!(
            chunks,
            vec![
                DeltaChunk::new(EventKind::Answer, "partial", false),
                DeltaChunk::new(EventKind::Error, "boom", true),
            ]
        );
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn chunks_reconstruct_cumulative_content() {
        let text = "The quick brown fox jumps over the lazy dog";
        for min in [1, 3, 7, 64] {
            let mut events: Vec<_> = (1..text.len())
                .step_by(4)
                .map(|end| thinking(&text[..end], false))
                .collect();
            events.push(thinking(text, true));
            events.push(answer("done", true));

            let mut buffer = EventDeltaBuffer::new(min);
            let chunks = push_all(&mut buffer, &events);

            let thinking_text: String = chunks
                .iter()
                .filter(|c| c.tag == EventKind::Thinking)
                .map(|c| c.content.as_str())
                .collect();
            assert_eq!(thinking_text, text, "min_flush_size={min}");
            assert_eq!(
                chunks.iter().filter(|c| c.finished && c.tag == EventKind::Thinking).count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn coalesce_passes_errors_and_stops() {
        let events = futures::stream::iter(vec![
            Ok(answer("par", false)),
            Err(Error::MalformedResponse("bad".into())),
            Ok(answer("partial", true)),
        ]);
        let out: Vec<_> = coalesce(events, 100).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].as_ref().unwrap(),
            &DeltaChunk::new(EventKind::Answer, "par", true)
        );
        assert!(matches!(out[1], Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn coalesce_flushes_at_end() {
        let events = futures::stream::iter(vec![Ok(thinking("abc", false))]);
        let out: Vec<_> = coalesce(events, 100).collect().await;
        assert_eq!(
            out.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![DeltaChunk::new(EventKind::Thinking, "abc", true)]
        );
    }
}
