//! Stream reader: one plaintext HTTP request, one long-lived response
//!
//! The worker connects, sends a minimal GET and then reads the response line
//! by line for as long as the server keeps it open. Every network wait is
//! raced against the stop signal so `stop` never hangs on a silent server.

use crate::config::StreamSection;
use crate::lifecycle::{shutdown_requested, ComponentState, LifecycleError, WorkerControl};
use crate::observability::metrics::metrics;
use crate::queue::PayloadQueue;
use crate::stream::framing::{DiscardReason, FrameAssembler, LineEvent, LineOutcome};
use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

const COMPONENT: &str = "stream reader";

/// Terminal failures of a stream reader
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to send request: {0}")]
    Write(#[source] io::Error),
    #[error("Failed to read from stream: {0}")]
    Read(#[source] io::Error),
    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),
}

/// How a healthy read loop finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server closed the connection
    Eof,
    /// A stop was requested
    Cancelled,
}

/// The request sent once per connection
pub fn build_request(path: &str, host: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: keep-alive\r\n\r\n")
}

/// Strip the line terminator and decode, replacing invalid UTF-8
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line)
}

/// Result of one bounded line read
#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Eof,
    /// `buf` holds the whole line
    Complete,
    /// The line was longer than allowed. `buf` holds its first bytes and the
    /// rest was skipped; `bytes` is the full length.
    TooLong { bytes: usize },
}

/// Consume input up to and including the next newline without keeping it
async fn skip_line<R>(reader: &mut R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(skipped);
        }
        let (used, found) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        reader.consume(used);
        skipped += used;
        if found {
            return Ok(skipped);
        }
    }
}

async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_line_bytes: usize,
) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(max_line_bytes as u64)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.last() == Some(&b'\n') || read < max_line_bytes {
        return Ok(ReadLine::Complete);
    }
    let skipped = skip_line(reader).await?;
    Ok(ReadLine::TooLong {
        bytes: read + skipped,
    })
}

async fn next_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_line_bytes: usize,
    idle_timeout: Option<Duration>,
) -> Result<ReadLine, StreamError>
where
    R: AsyncBufRead + Unpin,
{
    let read = read_bounded_line(reader, buf, max_line_bytes);
    let result = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| StreamError::IdleTimeout(limit))?,
        None => read.await,
    };
    result.map_err(StreamError::Read)
}

/// Record what the assembler did with a line and enqueue completed payloads
fn apply_outcome(outcome: LineOutcome, queue: &PayloadQueue) {
    let m = metrics();

    if let Some(discarded) = &outcome.discarded {
        m.fragment_discarded(discarded.bytes);
        match &discarded.reason {
            DiscardReason::Malformed(reason) => {
                warn!(bytes = discarded.bytes, reason = %reason, "Discarding malformed JSON fragment")
            }
            DiscardReason::Oversized { limit } => {
                warn!(bytes = discarded.bytes, limit, "Discarding oversized JSON fragment")
            }
        }
    }

    match outcome.event {
        LineEvent::HeaderSkipped => m.header_line_skipped(),
        LineEvent::HeaderEnded => debug!("Response headers finished"),
        LineEvent::ChunkSizeSkipped => m.chunk_line_skipped(),
        LineEvent::Ignored => m.line_ignored(),
        LineEvent::Buffered | LineEvent::Dropped => {}
        LineEvent::Completed(payload) => {
            debug!(bytes = payload.len(), "Payload complete");
            queue.enqueue(payload);
        }
    }
}

/// Read `source` line by line through `assembler` until EOF, stop or error
pub async fn relay_lines<S>(
    source: S,
    assembler: &mut FrameAssembler,
    queue: &PayloadQueue,
    shutdown_rx: &mut watch::Receiver<bool>,
    idle_timeout: Option<Duration>,
) -> Result<StreamEnd, StreamError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut buf = Vec::with_capacity(8 * 1024);
    // Room for a full fragment plus its CRLF
    let max_line_bytes = assembler.max_fragment_bytes().saturating_add(2);

    loop {
        if *shutdown_rx.borrow() {
            return Ok(StreamEnd::Cancelled);
        }

        buf.clear();
        let read = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return Ok(StreamEnd::Cancelled),
            read = next_line(&mut reader, &mut buf, max_line_bytes, idle_timeout) => read?,
        };

        let outcome = match read {
            ReadLine::Eof => return Ok(StreamEnd::Eof),
            ReadLine::Complete => assembler.push_line(&decode_line(&buf)),
            ReadLine::TooLong { bytes } => {
                assembler.reject_oversized_line(&decode_line(&buf), bytes)
            }
        };
        metrics().line_read();
        apply_outcome(outcome, queue);
    }
}

async fn read_stream(
    config: &StreamSection,
    queue: &PayloadQueue,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<StreamEnd, StreamError> {
    metrics().stream_connection_attempt();
    info!("Connecting to stream");

    let connect = TcpStream::connect((config.host.as_str(), config.port));
    let mut socket = tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => return Ok(StreamEnd::Cancelled),
        result = connect => result.map_err(|source| StreamError::Connect {
            host: config.host.clone(),
            port: config.port,
            source,
        })?,
    };
    metrics().stream_connection_established();

    socket
        .write_all(build_request(&config.path, &config.host).as_bytes())
        .await
        .map_err(StreamError::Write)?;
    info!("Request sent, reading stream");

    let mut assembler = FrameAssembler::new(config.framing, config.max_fragment_bytes);
    let end = relay_lines(
        &mut socket,
        &mut assembler,
        queue,
        shutdown_rx,
        config.read_timeout(),
    )
    .await;

    if !assembler.pending().is_empty() {
        let bytes = assembler.pending().len();
        metrics().fragment_discarded(bytes);
        warn!(bytes, "Stream ended inside an incomplete JSON fragment");
    }

    end
}

async fn run_worker(
    config: StreamSection,
    queue: Arc<PayloadQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    match read_stream(&config, &queue, &mut shutdown_rx).await {
        Ok(StreamEnd::Eof) => {
            metrics().stream_connection_closed();
            info!("Stream closed by server");
        }
        Ok(StreamEnd::Cancelled) => {
            metrics().stream_connection_closed();
            info!("Stream reader stopped");
        }
        Err(e) => {
            metrics().stream_failed();
            error!(error = %e, "Stream reader failed");
        }
    }
}

/// Reads the configured stream and enqueues every completed payload
#[derive(Debug)]
pub struct StreamReader {
    config: StreamSection,
    queue: Arc<PayloadQueue>,
    control: WorkerControl,
}

impl StreamReader {
    pub fn new(config: StreamSection, queue: Arc<PayloadQueue>) -> Self {
        Self {
            config,
            queue,
            control: WorkerControl::new(COMPONENT),
        }
    }

    /// Spawn the reader task. Valid only once.
    ///
    /// Fails without changing state when host or path is unusable.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.config
            .validate()
            .map_err(|source| LifecycleError::InvalidSettings {
                component: COMPONENT,
                source,
            })?;
        let config = self.config.clone();
        let queue = self.queue.clone();

        self.control.launch(move |shutdown_rx| {
            let span = crate::stream_span!(
                host = %config.host,
                port = config.port,
                path = %config.path
            );
            run_worker(config, queue, shutdown_rx).instrument(span)
        })?;

        info!(host = %self.config.host, path = %self.config.path, "Stream reader started");
        Ok(())
    }

    /// Stop reading and close the socket; returns once the task has exited
    pub async fn stop(&mut self) {
        self.control.stop().await;
    }

    pub fn state(&self) -> ComponentState {
        self.control.state()
    }

    /// Receiver that observes every state change
    pub fn state_watch(&self) -> watch::Receiver<ComponentState> {
        self.control.subscribe_state()
    }

    pub fn config(&self) -> &StreamSection {
        &self.config
    }
}
