//! Transport abstraction for the game-state push channel.
//!
//! The server pushes JSON-encoded game-state snapshots to the client; the
//! client never writes to the channel. A [`Transport`] therefore only yields
//! complete text payloads, one per pushed event, and handles framing
//! internally (Server-Sent Events, WebSocket frames, a test script...).
//!
//! Because the sync loop re-establishes the channel after failures, it is
//! handed a [`Connector`] rather than a single connected transport. Each call
//! to [`Connector::connect`] opens a fresh connection.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use fairmocracy_client::error::SyncError;
//! use fairmocracy_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Return the next JSON payload, or None when the stream ends
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self) -> Result<MyTransport, SyncError> {
//!         Ok(MyTransport {})
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;

/// A receive-only text message channel carrying pushed game-state snapshots.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Receive the next pushed payload.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete payload was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the server closed the stream cleanly
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<(), SyncError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        (**self).close().await
    }
}

/// Opens new push-channel connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful connection.
    type Transport: Transport;

    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self) -> Result<Self::Transport, SyncError>;
}
