//! End-to-end relay tests: loopback HTTP stream in, mock broker out

mod test_helpers;

use std::time::Duration;
use stream_relay::config::RelayConfig;
use stream_relay::error::RelayError;
use stream_relay::lifecycle::ComponentState;
use stream_relay::relay::Relay;
use stream_relay::testing::MockBroker;
use test_helpers::{eventually, test_config, AfterScript, StreamServer};

#[tokio::test]
async fn test_single_object_reaches_broker() {
    let server = StreamServer::start(
        vec![b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"a\":1}\r\n"],
        AfterScript::HoldOpen,
    )
    .await;
    let broker = MockBroker::new();
    let mut relay = Relay::new(test_config(server.port), Some(broker.clone())).unwrap();

    relay.start().await.unwrap();
    assert!(broker.wait_for_published(1, Duration::from_secs(2)).await);

    relay.stop().await;
    assert_eq!(broker.published_strings().await, vec!["{\"a\":1}"]);
    assert_eq!(relay.reader_state(), ComponentState::Stopped);
    assert_eq!(relay.publisher_state(), Some(ComponentState::Stopped));
    assert_eq!(broker.disconnect_calls(), 1);
    server.finished().await;
}

#[tokio::test]
async fn test_split_objects_and_noise_are_relayed_in_order() {
    let server = StreamServer::start(
        vec![
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
            b"{\"a\":\r\n",
            b"1}\r\n",
            b"ok\r\n",
            b"keepalive ping\r\n",
            b"{\"b\":\"two\"}\r\n",
        ],
        AfterScript::Close,
    )
    .await;
    let broker = MockBroker::new();
    let mut relay = Relay::new(test_config(server.port), Some(broker.clone())).unwrap();

    relay.start().await.unwrap();
    assert!(broker.wait_for_published(2, Duration::from_secs(2)).await);

    // The server closed the stream, so the reader stops on its own
    assert!(
        eventually(Duration::from_secs(2), || relay.reader_state()
            == ComponentState::Stopped)
        .await
    );
    assert_eq!(relay.publisher_state(), Some(ComponentState::Running));

    relay.stop().await;
    assert_eq!(
        broker.published_strings().await,
        vec!["{\"a\":1}", "{\"b\":\"two\"}"]
    );
}

#[tokio::test]
async fn test_run_until_stops_on_shutdown_signal() {
    let server = StreamServer::start(
        vec![b"HTTP/1.1 200 OK\r\n\r\n{\"n\":1}\r\n"],
        AfterScript::HoldOpen,
    )
    .await;
    let broker = MockBroker::new();
    let mut relay = Relay::new(test_config(server.port), Some(broker.clone())).unwrap();

    let observer = broker.clone();
    let shutdown = async move {
        observer.wait_for_published(1, Duration::from_secs(2)).await;
    };

    tokio::time::timeout(Duration::from_secs(5), relay.run_until(shutdown))
        .await
        .expect("relay should stop after the shutdown future resolves")
        .unwrap();

    assert_eq!(relay.reader_state(), ComponentState::Stopped);
    assert_eq!(relay.publisher_state(), Some(ComponentState::Stopped));
    assert_eq!(broker.published_strings().await, vec!["{\"n\":1}"]);
}

#[tokio::test]
async fn test_permissive_mode_without_broker_only_queues() {
    let server = StreamServer::start(
        vec![b"HTTP/1.1 200 OK\r\n\r\n{\"a\":1}\r\n"],
        AfterScript::HoldOpen,
    )
    .await;
    let mut config = test_config(server.port);
    config.broker = None;
    config.relay.permissive = true;

    let mut relay = Relay::<MockBroker>::new(config, None).unwrap();
    assert_eq!(relay.publisher_state(), None);

    relay.start().await.unwrap();
    let queue = relay.queue().clone();
    assert!(eventually(Duration::from_secs(2), || queue.len() == 1).await);
    assert_eq!(relay.reader_state(), ComponentState::Running);

    relay.stop().await;
    assert_eq!(relay.reader_state(), ComponentState::Stopped);
    assert_eq!(queue.try_dequeue().map(|p| p.into_string()), Some("{\"a\":1}".to_string()));
}

#[tokio::test]
async fn test_broker_connect_failure_leaves_reader_running() {
    let server = StreamServer::start(
        vec![b"HTTP/1.1 200 OK\r\n\r\n{\"a\":1}\r\n"],
        AfterScript::HoldOpen,
    )
    .await;
    let broker = MockBroker::failing_connect();
    let mut relay = Relay::new(test_config(server.port), Some(broker.clone())).unwrap();

    relay.start().await.unwrap();
    assert!(
        eventually(Duration::from_secs(2), || relay.publisher_state()
            == Some(ComponentState::Stopped))
        .await
    );
    let queue = relay.queue().clone();
    assert!(eventually(Duration::from_secs(2), || queue.len() == 1).await);
    assert_eq!(relay.reader_state(), ComponentState::Running);

    relay.stop().await;
    assert!(broker.published().await.is_empty());
}

#[tokio::test]
async fn test_relay_cannot_be_started_twice() {
    let server = StreamServer::start(vec![b"HTTP/1.1 200 OK\r\n\r\n"], AfterScript::HoldOpen).await;
    let mut relay = Relay::new(test_config(server.port), Some(MockBroker::new())).unwrap();

    relay.start().await.unwrap();
    assert!(matches!(
        relay.start().await,
        Err(RelayError::Lifecycle(_))
    ));
    relay.stop().await;
}

#[test]
fn test_missing_broker_is_fatal_without_permissive() {
    let mut config: RelayConfig = test_config(8080);
    config.broker = None;

    let result = Relay::<MockBroker>::new(config, None);
    assert!(matches!(result, Err(RelayError::Config(_))));
}
