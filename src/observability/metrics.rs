//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected latency window for tracking
//! the stream reader, the payload queue and broker publishing.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of publish latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<RelayMetrics> = Lazy::new(RelayMetrics::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static RelayMetrics {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct RelayMetrics {
    // Stream reader
    stream_connected: AtomicBool,
    stream_connect_attempts: AtomicU64,
    stream_failures: AtomicU64,
    lines_read: AtomicU64,
    header_lines_skipped: AtomicU64,
    chunk_lines_skipped: AtomicU64,
    lines_ignored: AtomicU64,
    fragments_discarded: AtomicU64,
    bytes_discarded: AtomicU64,

    // Queue
    payloads_enqueued: AtomicU64,
    queue_depth: AtomicU64,
    max_queue_depth: AtomicU64,

    // Publisher and broker
    broker_connected: AtomicBool,
    broker_connect_attempts: AtomicU64,
    broker_connect_failures: AtomicU64,
    messages_published: AtomicU64,
    messages_truncated: AtomicU64,
    payloads_skipped: AtomicU64,
    publish_failures: AtomicU64,
    bytes_published: AtomicU64,
    last_publish: AtomicU64,
    publish_times: Mutex<Vec<u64>>, // microseconds

    uptime_start: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            stream_connected: AtomicBool::new(false),
            stream_connect_attempts: AtomicU64::new(0),
            stream_failures: AtomicU64::new(0),
            lines_read: AtomicU64::new(0),
            header_lines_skipped: AtomicU64::new(0),
            chunk_lines_skipped: AtomicU64::new(0),
            lines_ignored: AtomicU64::new(0),
            fragments_discarded: AtomicU64::new(0),
            bytes_discarded: AtomicU64::new(0),
            payloads_enqueued: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            max_queue_depth: AtomicU64::new(0),
            broker_connected: AtomicBool::new(false),
            broker_connect_attempts: AtomicU64::new(0),
            broker_connect_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_truncated: AtomicU64::new(0),
            payloads_skipped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            last_publish: AtomicU64::new(0),
            publish_times: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Stream reader metrics
    pub fn stream_connection_attempt(&self) {
        self.stream_connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_connection_established(&self) {
        self.stream_connected.store(true, Ordering::Relaxed);
    }

    pub fn stream_connection_closed(&self) {
        self.stream_connected.store(false, Ordering::Relaxed);
    }

    pub fn stream_failed(&self) {
        self.stream_failures.fetch_add(1, Ordering::Relaxed);
        self.stream_connected.store(false, Ordering::Relaxed);
    }

    pub fn line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn header_line_skipped(&self) {
        self.header_lines_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_line_skipped(&self) {
        self.chunk_lines_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn line_ignored(&self) {
        self.lines_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragment_discarded(&self, bytes: usize) {
        self.fragments_discarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_discarded
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Queue metrics
    pub fn payload_enqueued(&self, depth: usize) {
        self.payloads_enqueued.fetch_add(1, Ordering::Relaxed);
        self.set_queue_depth(depth);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        let depth = depth as u64;
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.max_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    // Broker metrics
    pub fn broker_connection_attempt(&self) {
        self.broker_connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_connection_established(&self) {
        self.broker_connected.store(true, Ordering::Relaxed);
    }

    pub fn broker_connection_failed(&self) {
        self.broker_connect_failures.fetch_add(1, Ordering::Relaxed);
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    pub fn broker_connection_lost(&self) {
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    pub fn message_published(&self, bytes: usize, truncated: bool, duration: Duration) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if truncated {
            self.messages_truncated.fetch_add(1, Ordering::Relaxed);
        }
        self.last_publish
            .store(current_timestamp(), Ordering::Relaxed);
        self.record_publish_time(duration);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_skipped(&self) {
        self.payloads_skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_publish_time(&self, duration: Duration) {
        if let Ok(mut times) = self.publish_times.lock() {
            times.push(duration.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.remove(0);
            }
        }
    }

    pub fn is_stream_connected(&self) -> bool {
        self.stream_connected.load(Ordering::Relaxed)
    }

    pub fn is_broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }

    /// Reset all metrics (for testing)
    pub fn reset(&self) {
        for counter in [
            &self.stream_connect_attempts,
            &self.stream_failures,
            &self.lines_read,
            &self.header_lines_skipped,
            &self.chunk_lines_skipped,
            &self.lines_ignored,
            &self.fragments_discarded,
            &self.bytes_discarded,
            &self.payloads_enqueued,
            &self.queue_depth,
            &self.max_queue_depth,
            &self.broker_connect_attempts,
            &self.broker_connect_failures,
            &self.messages_published,
            &self.messages_truncated,
            &self.payloads_skipped,
            &self.publish_failures,
            &self.bytes_published,
            &self.last_publish,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.stream_connected.store(false, Ordering::Relaxed);
        self.broker_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.publish_times.lock() {
            times.clear();
        }
    }

    /// Mean and p50/p95/p99 of recent publish latencies, in milliseconds
    fn calculate_publish_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.publish_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;

        (
            avg / 1000.0,
            percentile(&sorted, 50.0) / 1000.0,
            percentile(&sorted, 95.0) / 1000.0,
            percentile(&sorted, 99.0) / 1000.0,
        )
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.calculate_publish_time_statistics();

        MetricsSnapshot {
            stream: StreamMetrics {
                connected: self.stream_connected.load(Ordering::Relaxed),
                connect_attempts: self.stream_connect_attempts.load(Ordering::Relaxed),
                failures: self.stream_failures.load(Ordering::Relaxed),
                lines_read: self.lines_read.load(Ordering::Relaxed),
                header_lines_skipped: self.header_lines_skipped.load(Ordering::Relaxed),
                chunk_lines_skipped: self.chunk_lines_skipped.load(Ordering::Relaxed),
                lines_ignored: self.lines_ignored.load(Ordering::Relaxed),
                fragments_discarded: self.fragments_discarded.load(Ordering::Relaxed),
                bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            },
            queue: QueueMetrics {
                payloads_enqueued: self.payloads_enqueued.load(Ordering::Relaxed),
                depth: self.queue_depth.load(Ordering::Relaxed),
                max_depth: self.max_queue_depth.load(Ordering::Relaxed),
            },
            publisher: PublisherMetrics {
                broker_connected: self.broker_connected.load(Ordering::Relaxed),
                connect_attempts: self.broker_connect_attempts.load(Ordering::Relaxed),
                connect_failures: self.broker_connect_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                messages_truncated: self.messages_truncated.load(Ordering::Relaxed),
                payloads_skipped: self.payloads_skipped.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                bytes_published: self.bytes_published.load(Ordering::Relaxed),
                last_publish: self.last_publish.load(Ordering::Relaxed),
                avg_publish_time_ms: avg,
                publish_time_p50_ms: p50,
                publish_time_p95_ms: p95,
                publish_time_p99_ms: p99,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub stream: StreamMetrics,
    pub queue: QueueMetrics,
    pub publisher: PublisherMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamMetrics {
    pub connected: bool,
    pub connect_attempts: u64,
    pub failures: u64,
    pub lines_read: u64,
    pub header_lines_skipped: u64,
    pub chunk_lines_skipped: u64,
    pub lines_ignored: u64,
    pub fragments_discarded: u64,
    pub bytes_discarded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub payloads_enqueued: u64,
    pub depth: u64,
    pub max_depth: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherMetrics {
    pub broker_connected: bool,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub messages_published: u64,
    pub messages_truncated: u64,
    pub payloads_skipped: u64,
    pub publish_failures: u64,
    pub bytes_published: u64,
    pub last_publish: u64,
    pub avg_publish_time_ms: f64,
    pub publish_time_p50_ms: f64,
    pub publish_time_p95_ms: f64,
    pub publish_time_p99_ms: f64,
}

// Helper functions
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower = sorted_data[index.floor() as usize] as f64;
        let upper = sorted_data[index.ceil() as usize] as f64;
        lower + (upper - lower) * index.fract()
    }
}
