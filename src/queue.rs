//! Unbounded FIFO hand-off between the stream reader and the publisher
//!
//! Any number of producers may enqueue concurrently; a consumer either polls
//! with [`PayloadQueue::try_dequeue`] or parks on [`PayloadQueue::dequeue`]
//! until an item arrives.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// One reassembled text item, normally a complete JSON object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload(String);

impl Payload {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in UTF-8 bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the text starts with `{`
    pub fn is_object_like(&self) -> bool {
        self.0.starts_with('{')
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Thread-safe unbounded FIFO of payloads
#[derive(Debug, Default)]
pub struct PayloadQueue {
    items: Mutex<VecDeque<Payload>>,
    available: Notify,
}

impl PayloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail; never blocks beyond the internal lock
    pub fn enqueue(&self, payload: Payload) {
        self.lock().push_back(payload);
        self.available.notify_one();
        let depth = self.len();
        crate::observability::metrics::metrics().payload_enqueued(depth);
        tracing::debug!(depth, "Payload enqueued");
    }

    /// Remove the head if present
    pub fn try_dequeue(&self) -> Option<Payload> {
        let item = self.lock().pop_front();
        if item.is_some() {
            crate::observability::metrics::metrics().set_queue_depth(self.len());
        }
        item
    }

    /// Wait until an item is available and remove it.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn dequeue(&self) -> Payload {
        loop {
            if let Some(payload) = self.try_dequeue() {
                return payload;
            }
            self.available.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Payload>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = PayloadQueue::new();
        queue.enqueue(Payload::from("{\"n\":1}"));
        queue.enqueue(Payload::from("{\"n\":2}"));
        queue.enqueue(Payload::from("{\"n\":3}"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue().unwrap().as_str(), "{\"n\":1}");
        assert_eq!(queue.try_dequeue().unwrap().as_str(), "{\"n\":2}");
        assert_eq!(queue.try_dequeue().unwrap().as_str(), "{\"n\":3}");
        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_payload_helpers() {
        let payload = Payload::new("{\"a\":\"é\"}");
        assert!(payload.is_object_like());
        assert_eq!(payload.len(), 10);
        assert!(!Payload::from("[1,2]").is_object_like());
        assert!(Payload::from("").is_empty());
        assert_eq!(payload.to_string(), "{\"a\":\"é\"}");
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(PayloadQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(Payload::from("{}"));
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(got.as_str(), "{}");
    }

    #[tokio::test]
    async fn test_dequeue_cancellation_keeps_items() {
        let queue = PayloadQueue::new();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), queue.dequeue()).await;
        assert!(timed_out.is_err());

        queue.enqueue(Payload::from("{\"kept\":true}"));
        let got = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap();
        assert_eq!(got.as_str(), "{\"kept\":true}");
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let queue = Arc::new(PayloadQueue::new());
        let mut handles = Vec::new();
        for producer in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    queue.enqueue(Payload::new(format!("{{\"p\":{producer},\"i\":{i}}}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut drained = 0;
        while queue.try_dequeue().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 100);
    }
}
