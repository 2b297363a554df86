//! Streaming HTTP source
//!
//! [`framing`] holds the pure line reassembly rules; [`reader`] owns the TCP
//! connection and feeds completed payloads into the queue.

pub mod framing;
pub mod reader;

pub use framing::{check_document, DocumentStatus, FrameAssembler, FramingMode, LineEvent};
pub use reader::{build_request, relay_lines, StreamEnd, StreamError, StreamReader};
