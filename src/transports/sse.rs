//! Server-Sent Events transport using `reqwest`.
//!
//! This module provides [`SseTransport`], a [`Transport`] that reads a
//! `text/event-stream` response body, and [`SseConnector`], which opens one
//! such response per connection attempt.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-sse` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), fairmocracy_client::SyncError> {
//! use fairmocracy_client::transport::{Connector, Transport};
//! use fairmocracy_client::SseConnector;
//!
//! let connector = SseConnector::new("http://localhost:8000/sse", "message")?;
//! let mut transport = connector.connect().await?;
//!
//! if let Some(Ok(snapshot)) = transport.recv().await {
//!     println!("received: {snapshot}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};

use super::frame::SseDecoder;
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::transport::{Connector, Transport};

/// Time allowed for the server to answer with response headers.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw body chunks of an event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SyncError>> + Send>>;

/// A [`Transport`] over a `text/event-stream` response body.
///
/// Only events whose type matches the configured name are delivered; their
/// `data` is returned verbatim.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Decoded events are
/// queued inside the transport, and a chunk is only consumed once it has been
/// fully decoded.
pub struct SseTransport {
    stream: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    event: String,
    closed: bool,
}

impl SseTransport {
    /// Open the event stream at `url` and deliver events named `event`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportConnect`] if the request fails, or
    /// [`SyncError::HttpStatus`] if the server answers with a non-success
    /// status.
    pub async fn connect(
        client: &reqwest::Client,
        url: &str,
        event: impl Into<String>,
    ) -> Result<Self, SyncError> {
        tracing::debug!(url = %url, "opening event stream");

        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| SyncError::TransportConnect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        tracing::info!(url = %url, "event stream established");

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| SyncError::TransportReceive(e.to_string()))
        });
        Ok(Self::from_stream(stream, event))
    }

    /// Create an [`SseTransport`] over an existing byte stream.
    pub fn from_stream<S>(stream: S, event: impl Into<String>) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, SyncError>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            event: event.into(),
            closed: false,
        }
    }
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("event", &self.event)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                return Some(Ok(data));
            }
            if self.closed {
                return None;
            }

            let chunk = match self.stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            };
            for event in self.decoder.feed(&chunk) {
                if event.event == self.event {
                    self.pending.push_back(event.data);
                } else {
                    tracing::debug!(event = %event.event, "skipping event of another type");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();
        // Dropping the body stream releases the connection.
        self.stream = Box::pin(futures_util::stream::empty());
        Ok(())
    }
}

/// Opens [`SseTransport`]s against a fixed URL.
#[derive(Debug, Clone)]
pub struct SseConnector {
    client: reqwest::Client,
    url: String,
    event: String,
    open_timeout: Duration,
}

impl SseConnector {
    /// Create a connector for the event stream at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, event: impl Into<String>) -> Result<Self, SyncError> {
        // No overall request timeout: the response body is open-ended.
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, url, event))
    }

    /// Create a connector for the push channel described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SyncError> {
        Self::new(config.stream_url(), config.stream_event.clone())
    }

    /// Create a connector that reuses an existing `reqwest` client. The client
    /// must not carry an overall request timeout.
    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            event: event.into(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    /// Set how long to wait for the server's response headers.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// URL of the event stream.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for SseConnector {
    type Transport = SseTransport;

    async fn connect(&self) -> Result<SseTransport, SyncError> {
        tokio::time::timeout(
            self.open_timeout,
            SseTransport::connect(&self.client, &self.url, self.event.clone()),
        )
        .await
        .map_err(|_| SyncError::Timeout)?
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn sse_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SseTransport>();
    }

    // ── Mock-server helpers ─────────────────────────────────────────

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
    }

    /// Serve one event-stream response with the given status and body, then
    /// close the connection.
    async fn serve_stream(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let head = format!(
                "HTTP/1.1 {status}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{addr}/sse")
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_yields_matching_events_then_none() {
        let url = serve_stream(
            "200 OK",
            ": hello\n\ndata: {\"id\": 1}\n\nevent: other\ndata: skipped\n\ndata: a\ndata: b\n\n",
        )
        .await;

        let connector = SseConnector::new(url, "message").unwrap();
        let mut transport = connector.connect().await.unwrap();

        assert_eq!(transport.recv().await.unwrap().unwrap(), "{\"id\": 1}");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "a\nb");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = serve_stream("503 Service Unavailable", "").await;
        let connector = SseConnector::new(url, "message").unwrap();

        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_error() {
        let connector = SseConnector::new("http://127.0.0.1:1/sse", "message").unwrap();
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::TransportConnect(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            std::future::pending::<()>().await;
        });

        let connector = SseConnector::new(format!("http://{addr}/sse"), "message")
            .unwrap()
            .with_open_timeout(Duration::from_millis(50));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
    }

    #[tokio::test]
    async fn from_stream_decodes_split_chunks() {
        let chunks: Vec<Result<Vec<u8>, SyncError>> = vec![
            Ok(b"da".to_vec()),
            Ok(b"ta: x\r\n".to_vec()),
            Ok(b"\r\ndata: y\n\n".to_vec()),
        ];
        let mut transport =
            SseTransport::from_stream(futures_util::stream::iter(chunks), "message");

        assert_eq!(transport.recv().await.unwrap().unwrap(), "x");
        assert_eq!(transport.recv().await.unwrap().unwrap(), "y");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_is_reported() {
        let chunks: Vec<Result<Vec<u8>, SyncError>> =
            vec![Err(SyncError::TransportReceive("reset".into()))];
        let mut transport =
            SseTransport::from_stream(futures_util::stream::iter(chunks), "message");

        let err = transport.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::TransportReceive(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_the_stream() {
        let chunks: Vec<Result<Vec<u8>, SyncError>> = vec![Ok(b"data: x\n\n".to_vec())];
        let mut transport =
            SseTransport::from_stream(futures_util::stream::iter(chunks), "message");

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connector_from_config_uses_stream_url() {
        let config = ClientConfig::new("http://host:8000").with_stream_path("/events");
        let connector = SseConnector::from_config(&config).unwrap();
        assert_eq!(connector.url(), "http://host:8000/events");
    }
}
