//! Incremental tag parser for model output.
//!
//! [`TagStreamParser`] consumes text in arbitrary fragments and extracts
//! `<thinking>`, `<tool>` and `<answer>` blocks as [`Segment`]s. Text outside
//! any block is reported as a `raw` segment and kept for reclassification at
//! [`TagStreamParser::finish`].
//!
//! The parser never fails. A close marker with no matching open marker is
//! dropped, and a `<tool>` body that is not a JSON object stays text.

pub mod envelope;

use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

/// The structural role of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentTag {
    Thinking,
    Tool,
    Answer,
    /// Text outside any recognized block
    Raw,
}

const MARKED_TAGS: [SegmentTag; 3] = [SegmentTag::Thinking, SegmentTag::Tool, SegmentTag::Answer];

impl SegmentTag {
    /// Start marker; empty for `Raw`.
    pub fn open_marker(&self) -> &'static str {
        match self {
            Self::Thinking => "<thinking>",
            Self::Tool => "<tool>",
            Self::Answer => "<answer>",
            Self::Raw => "",
        }
    }

    /// End marker; empty for `Raw`.
    pub fn close_marker(&self) -> &'static str {
        match self {
            Self::Thinking => "</thinking>",
            Self::Tool => "</tool>",
            Self::Answer => "</answer>",
            Self::Raw => "",
        }
    }
}

/// Segment payload: plain text, or a decoded JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SegmentContent {
    Text(String),
    Json(Value),
}

impl SegmentContent {
    /// Decode `text` as a JSON object, or keep it as text.
    fn object_or_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() => Self::Json(value),
            _ => Self::Text(text.to_string()),
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Json(v) => Cow::Owned(v.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Text(_) => None,
        }
    }
}

/// A classified unit of model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub tag: SegmentTag,
    pub content: SegmentContent,
    pub finished: bool,
}

impl Segment {
    fn unfinished(tag: SegmentTag, text: &str) -> Self {
        Self {
            tag,
            content: SegmentContent::Text(text.to_string()),
            finished: false,
        }
    }

    fn finished(tag: SegmentTag, inner: &str) -> Self {
        let text = inner.trim();
        let content = match tag {
            SegmentTag::Tool | SegmentTag::Raw => SegmentContent::object_or_text(text),
            SegmentTag::Thinking | SegmentTag::Answer => SegmentContent::Text(text.to_string()),
        };
        Self {
            tag,
            content,
            finished: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    None,
    Open {
        tag: SegmentTag,
        /// Byte offset in the buffer where the block's content begins
        content_start: usize,
    },
}

/// Incremental extractor for tagged model output.
///
/// Feed fragments in arrival order; call [`finish`](Self::finish) once the
/// generation ends. Content reported for an unfinished span is cumulative
/// and trimmed, so each report extends the previous one.
#[derive(Debug)]
pub struct TagStreamParser {
    buffer: String,
    state: ParserState,
    /// Length of the content last reported for the open span
    open_reported: usize,
    /// Stray text last reported as raw
    raw_reported: String,
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: ParserState::None,
            open_reported: 0,
            raw_reported: String::new(),
        }
    }

    /// Consume one fragment and return the segments it completes or extends.
    pub fn feed(&mut self, chunk: &str) -> Vec<Segment> {
        let text = envelope::unwrap(chunk);
        let mut out = Vec::new();
        if text.is_empty() {
            return out;
        }
        self.buffer.push_str(&text);
        self.scan(&mut out);
        out
    }

    /// Flush remaining state at the end of a generation.
    ///
    /// An unterminated block is closed with the content it has so far.
    /// Leftover stray text becomes a finished `raw` segment. The parser is
    /// reset afterwards and can be reused.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();

        if let ParserState::Open { tag, content_start } = self.state {
            let tail = &self.buffer[content_start..];
            let stable = tail.len() - partial_marker_len(tail, &[tag.close_marker()]);
            out.push(Segment::finished(tag, &tail[..stable]));
            self.buffer.truncate(content_start - tag.open_marker().len());
        }

        let mut leftover = std::mem::take(&mut self.buffer);
        for tag in MARKED_TAGS {
            leftover = leftover.replace(tag.close_marker(), "");
        }
        if !leftover.trim().is_empty() {
            out.push(Segment::finished(SegmentTag::Raw, &leftover));
        }

        self.reset();
        out
    }

    /// Discard all buffered state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParserState::None;
        self.open_reported = 0;
        self.raw_reported.clear();
    }

    /// Whether a block is currently open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, ParserState::Open { .. })
    }

    /// Repeat single-pair scans until no complete block remains.
    fn scan(&mut self, out: &mut Vec<Segment>) {
        loop {
            match self.state {
                ParserState::Open { tag, content_start } => {
                    let close = tag.close_marker();
                    match self.buffer[content_start..].find(close) {
                        Some(rel) => {
                            let close_at = content_start + rel;
                            let segment = Segment::finished(tag, &self.buffer[content_start..close_at]);
                            let span_start = content_start - tag.open_marker().len();
                            self.buffer.replace_range(span_start..close_at + close.len(), "");
                            self.state = ParserState::None;
                            self.open_reported = 0;
                            out.push(segment);
                        }
                        None => {
                            let tail = &self.buffer[content_start..];
                            let stable = tail.len() - partial_marker_len(tail, &[close]);
                            let content = tail[..stable].trim();
                            if content.len() > self.open_reported {
                                self.open_reported = content.len();
                                out.push(Segment::unfinished(tag, content));
                            }
                            return;
                        }
                    }
                }
                ParserState::None => {
                    self.drop_orphan_closes();
                    match self.earliest_open() {
                        Some((tag, at)) => {
                            self.state = ParserState::Open {
                                tag,
                                content_start: at + tag.open_marker().len(),
                            };
                            self.open_reported = 0;
                        }
                        None => {
                            self.report_raw(out);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn earliest_open(&self) -> Option<(SegmentTag, usize)> {
        MARKED_TAGS
            .iter()
            .filter_map(|tag| self.buffer.find(tag.open_marker()).map(|at| (*tag, at)))
            .min_by_key(|(_, at)| *at)
    }

    fn earliest_close(&self) -> Option<(SegmentTag, usize)> {
        MARKED_TAGS
            .iter()
            .filter_map(|tag| self.buffer.find(tag.close_marker()).map(|at| (*tag, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Remove close markers that precede every open marker.
    fn drop_orphan_closes(&mut self) {
        while let Some((tag, close_at)) = self.earliest_close() {
            let open_at = self.earliest_open().map_or(usize::MAX, |(_, at)| at);
            if close_at > open_at {
                break;
            }
            self.buffer
                .replace_range(close_at..close_at + tag.close_marker().len(), "");
        }
    }

    fn report_raw(&mut self, out: &mut Vec<Segment>) {
        let all_markers: Vec<&str> = MARKED_TAGS
            .iter()
            .flat_map(|tag| [tag.open_marker(), tag.close_marker()])
            .collect();
        let stable = self.buffer.len() - partial_marker_len(&self.buffer, &all_markers);
        let text = self.buffer[..stable].trim();
        if !text.is_empty() && text != self.raw_reported {
            self.raw_reported = text.to_string();
            out.push(Segment::unfinished(SegmentTag::Raw, text));
        }
    }
}

impl Default for TagStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of one of
/// `markers`. That suffix may complete into a marker with the next fragment.
fn partial_marker_len(text: &str, markers: &[&str]) -> usize {
    let longest = markers.iter().map(|m| m.len()).max().unwrap_or(0);
    let mut held = 0;
    for (at, _) in text.rmatch_indices('<') {
        let suffix = &text[at..];
        if suffix.len() >= longest {
            break;
        }
        if markers
            .iter()
            .any(|m| suffix.len() < m.len() && m.starts_with(suffix))
        {
            held = suffix.len();
        }
    }
    held
}
