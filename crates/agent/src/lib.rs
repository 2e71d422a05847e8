//! The reasoning engine of reasonflow.
//!
//! A session runs in three pull-based stages:
//!
//! 1. **Parse**: [`TagStreamParser`] turns generation fragments into
//!    `thinking`, `tool`, `answer` and raw segments
//! 2. **Reason**: [`ReasoningLoop`] acts on those segments, dispatches tools,
//!    records context, and yields [`AgentEvent`]s until an answer arrives or
//!    the iteration bound is hit
//! 3. **Coalesce**: [`EventDeltaBuffer`] turns cumulative events into small
//!    delta chunks for transport
//!
//! Nothing runs until the consumer polls, and dropping a stream cancels
//! everything upstream of it.

pub mod delta_buffer;
pub mod parser;
pub mod prompt;
pub mod reasoning;
pub mod stream_event;
pub mod structured;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use delta_buffer::{DeltaChunk, EventDeltaBuffer, coalesce};
pub use parser::{Segment, SegmentContent, SegmentTag, TagStreamParser};
pub use prompt::{RESPONSE_FORMAT_PROMPT, SystemPrompt};
pub use reasoning::{ReasoningLoop, ReasoningSession, TerminalState};
pub use stream_event::{AgentEvent, EventKind};
pub use structured::StructuredResponse;
