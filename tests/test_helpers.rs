//! Test helpers and utilities for integration tests

use std::time::Duration;
use stream_relay::config::{BrokerSection, RelayConfig, StreamSection};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How the scripted server ends the response
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Close the connection once every chunk is written
    Close,
    /// Keep the connection open until the client goes away
    HoldOpen,
}

/// A one-connection HTTP stream server on loopback
#[allow(dead_code)]
pub struct StreamServer {
    pub port: u16,
    request: Option<oneshot::Receiver<String>>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl StreamServer {
    /// Bind to an ephemeral port and serve `chunks` to the first client
    pub async fn start(chunks: Vec<&'static [u8]>, after: AfterScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (request_tx, request_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read until the blank line that ends the request
            let mut request = Vec::new();
            let mut buf = [0u8; 512];
            while !request.ends_with(b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = request_tx.send(String::from_utf8_lossy(&request).into_owned());

            for chunk in chunks {
                socket.write_all(chunk).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            if after == AfterScript::HoldOpen {
                // Returns once the client closes its end
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        Self {
            port,
            request: Some(request_rx),
            handle,
        }
    }

    /// The raw request the client sent
    pub async fn request(&mut self) -> String {
        let rx = self.request.take().expect("request already taken");
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("client never sent a request")
            .expect("server task ended before the request")
    }

    /// Wait for the server task to finish
    pub async fn finished(self) {
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("server did not finish")
            .unwrap();
    }
}

/// Stream section pointing at a loopback server
#[allow(dead_code)]
pub fn stream_section(port: u16) -> StreamSection {
    StreamSection {
        host: "127.0.0.1".to_string(),
        path: "/feed".to_string(),
        port,
        read_timeout_secs: 5,
        ..StreamSection::default()
    }
}

/// Full relay configuration for integration tests
#[allow(dead_code)]
pub fn test_config(port: u16) -> RelayConfig {
    RelayConfig {
        stream: stream_section(port),
        broker: Some(BrokerSection::new("mqtt://localhost:1883")),
        ..RelayConfig::default()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
