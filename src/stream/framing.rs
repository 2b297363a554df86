//! Line-level reassembly of JSON documents from a streaming HTTP response
//!
//! The assembler is a pure state machine: it is fed one line at a time
//! (already stripped of its line terminator) and reports what it did with it.
//! It never performs I/O, which keeps the framing rules testable in isolation.

use crate::queue::Payload;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// How complete payloads are recognised in the line stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Accumulate lines until they parse as one JSON document
    #[default]
    Json,
    /// Every line starting with `{` is a payload on its own
    Line,
}

/// Result of a non-throwing parse attempt on accumulated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Complete,
    /// The parser ran out of input; more lines may complete it
    Incomplete,
    Malformed(String),
}

/// Classify `text` as a complete, incomplete or malformed JSON document
pub fn check_document(text: &str) -> DocumentStatus {
    match serde_json::from_str::<IgnoredAny>(text) {
        Ok(_) => DocumentStatus::Complete,
        Err(e) if e.is_eof() => DocumentStatus::Incomplete,
        Err(e) => DocumentStatus::Malformed(e.to_string()),
    }
}

/// A chunked-transfer size token: at most four characters, all alphanumeric.
///
/// The empty line qualifies.
pub fn is_chunk_size_line(line: &str) -> bool {
    line.chars().count() <= 4 && line.chars().all(char::is_alphanumeric)
}

/// Why an in-progress fragment was thrown away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    Malformed(String),
    Oversized { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discarded {
    pub bytes: usize,
    pub reason: DiscardReason,
}

/// What happened to a single line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Part of the status line or headers
    HeaderSkipped,
    /// Blank line that terminated the header block
    HeaderEnded,
    ChunkSizeSkipped,
    /// No fragment in progress and the line does not start with `{`
    Ignored,
    /// Appended to a fragment that is not yet complete
    Buffered,
    Completed(Payload),
    /// The line ended up in a discarded fragment
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    pub event: LineEvent,
    pub discarded: Option<Discarded>,
}

impl LineOutcome {
    fn event(event: LineEvent) -> Self {
        Self {
            event,
            discarded: None,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.event {
            LineEvent::Completed(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Stateful reassembler for one response stream
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    mode: FramingMode,
    max_fragment_bytes: usize,
    in_headers: bool,
    pending: String,
}

impl FrameAssembler {
    pub fn new(mode: FramingMode, max_fragment_bytes: usize) -> Self {
        Self {
            mode,
            max_fragment_bytes,
            in_headers: true,
            pending: String::new(),
        }
    }

    pub fn in_header_phase(&self) -> bool {
        self.in_headers
    }

    /// Text accumulated for the fragment in progress
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn max_fragment_bytes(&self) -> usize {
        self.max_fragment_bytes
    }

    /// Account for a line too long to buffer. `prefix` is the start of the
    /// line and `bytes` its full length; the rest was never read into memory.
    pub fn reject_oversized_line(&mut self, prefix: &str, bytes: usize) -> LineOutcome {
        if self.in_headers {
            if !prefix.starts_with('{') {
                return LineOutcome::event(LineEvent::HeaderSkipped);
            }
            self.in_headers = false;
        }

        if self.pending.is_empty() && !prefix.starts_with('{') {
            return LineOutcome::event(LineEvent::Ignored);
        }

        let mut discarded = self.discard(DiscardReason::Oversized {
            limit: self.max_fragment_bytes,
        });
        discarded.bytes += bytes;
        LineOutcome {
            event: LineEvent::Dropped,
            discarded: Some(discarded),
        }
    }

    pub fn push_line(&mut self, line: &str) -> LineOutcome {
        if self.in_headers {
            if line.is_empty() {
                self.in_headers = false;
                return LineOutcome::event(LineEvent::HeaderEnded);
            }
            if !line.starts_with('{') {
                return LineOutcome::event(LineEvent::HeaderSkipped);
            }
            self.in_headers = false;
        }

        if is_chunk_size_line(line) {
            return LineOutcome::event(LineEvent::ChunkSizeSkipped);
        }

        if self.pending.is_empty() && !line.starts_with('{') {
            return LineOutcome::event(LineEvent::Ignored);
        }

        match self.mode {
            FramingMode::Line => {
                LineOutcome::event(LineEvent::Completed(Payload::new(line)))
            }
            FramingMode::Json => self.append(line),
        }
    }

    fn append(&mut self, line: &str) -> LineOutcome {
        let before = self.pending.len();
        let started_here = before == 0;
        self.pending.push_str(line);

        match check_document(&self.pending) {
            DocumentStatus::Complete => {
                let text = std::mem::take(&mut self.pending);
                LineOutcome::event(LineEvent::Completed(Payload::new(text)))
            }
            DocumentStatus::Incomplete if self.pending.len() > self.max_fragment_bytes => {
                let discarded = self.discard(DiscardReason::Oversized {
                    limit: self.max_fragment_bytes,
                });
                LineOutcome {
                    event: LineEvent::Dropped,
                    discarded: Some(discarded),
                }
            }
            DocumentStatus::Incomplete => LineOutcome::event(LineEvent::Buffered),
            DocumentStatus::Malformed(reason) => {
                if !started_here && line.starts_with('{') {
                    // Only the earlier lines are lost; this one starts over
                    self.pending.truncate(before);
                    let discarded = self.discard(DiscardReason::Malformed(reason));
                    let mut restarted = self.append(line);
                    restarted.discarded = Some(match restarted.discarded.take() {
                        None => discarded,
                        Some(again) => Discarded {
                            bytes: discarded.bytes + again.bytes,
                            reason: discarded.reason,
                        },
                    });
                    return restarted;
                }
                let discarded = self.discard(DiscardReason::Malformed(reason));
                LineOutcome {
                    event: LineEvent::Dropped,
                    discarded: Some(discarded),
                }
            }
        }
    }

    fn discard(&mut self, reason: DiscardReason) -> Discarded {
        let bytes = self.pending.len();
        self.pending.clear();
        Discarded { bytes, reason }
    }
}
