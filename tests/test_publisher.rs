//! Publisher behavior tests with the in-memory mock broker

use std::sync::Arc;
use std::time::Duration;
use stream_relay::broker::BrokerClient;
use stream_relay::lifecycle::ComponentState;
use stream_relay::publisher::Publisher;
use stream_relay::queue::{Payload, PayloadQueue};
use stream_relay::testing::MockBroker;

#[tokio::test]
async fn test_oversized_payload_is_truncated_to_exact_cap() {
    let broker = MockBroker::new();
    let queue = Arc::new(PayloadQueue::new());
    let mut publisher = Publisher::new(broker.clone(), queue.clone(), 16);
    publisher.start().unwrap();

    let big = format!("{{\"data\":\"{}\"}}", "x".repeat(100));
    queue.enqueue(Payload::new(big.clone()));
    queue.enqueue(Payload::new("{\"small\":1}"));

    assert!(broker.wait_for_published(2, Duration::from_secs(1)).await);
    publisher.stop().await;

    let published = broker.published().await;
    assert_eq!(published[0].len(), 16);
    assert_eq!(&published[0][..], &big.as_bytes()[..16]);
    assert_eq!(&published[1][..], b"{\"small\":1}");
}

#[tokio::test]
async fn test_payloads_published_in_enqueue_order() {
    let broker = MockBroker::new();
    let queue = Arc::new(PayloadQueue::new());
    let mut publisher = Publisher::new(broker.clone(), queue.clone(), 1024);

    // Items queued before start are still delivered
    for n in 0..10 {
        queue.enqueue(Payload::new(format!("{{\"n\":{n}}}")));
    }
    publisher.start().unwrap();
    for n in 10..50 {
        queue.enqueue(Payload::new(format!("{{\"n\":{n}}}")));
    }

    assert!(broker.wait_for_published(50, Duration::from_secs(2)).await);
    publisher.stop().await;

    let expected: Vec<String> = (0..50).map(|n| format!("{{\"n\":{n}}}")).collect();
    assert_eq!(broker.published_strings().await, expected);
}

#[tokio::test]
async fn test_stop_disconnects_before_returning() {
    let broker = MockBroker::new();
    let queue = Arc::new(PayloadQueue::new());
    let mut publisher = Publisher::new(broker.clone(), queue, 1024);

    publisher.start().unwrap();
    assert!(
        tokio::time::timeout(Duration::from_secs(1), async {
            while !broker.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok(),
        "publisher should connect"
    );

    publisher.stop().await;
    assert_eq!(publisher.state(), ComponentState::Stopped);
    assert!(!broker.is_connected());
    assert_eq!(broker.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_idle_publisher_stops_promptly() {
    let broker = MockBroker::new();
    let mut publisher = Publisher::new(broker.clone(), Arc::new(PayloadQueue::new()), 1024);
    publisher.start().unwrap();

    // The worker is parked on an empty queue; stop must still get through
    tokio::time::timeout(Duration::from_secs(1), publisher.stop())
        .await
        .expect("stop should wake the idle worker");
    assert_eq!(publisher.state(), ComponentState::Stopped);
    assert!(broker.published().await.is_empty());
}
