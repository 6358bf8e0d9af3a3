//! Push-channel transport implementations.
//!
//! The event-stream decoder in [`frame`] is always available. Concrete
//! [`Transport`](crate::Transport) implementations live behind feature gates:
//!
//! | Feature          | Transport                          |
//! |------------------|------------------------------------|
//! | `transport-sse`  | [`SseTransport`] / [`SseConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), fairmocracy_client::SyncError> {
//! use fairmocracy_client::{Connector, SseConnector, Transport};
//!
//! let connector = SseConnector::new("http://localhost:8000/sse", "message")?;
//! let mut sse = connector.connect().await?;
//!
//! while let Some(Ok(snapshot)) = sse.recv().await {
//!     println!("server pushed: {snapshot}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod frame;

#[cfg(feature = "transport-sse")]
pub mod sse;

#[cfg(feature = "transport-sse")]
pub use sse::{SseConnector, SseTransport};
