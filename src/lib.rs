//! # Fairmocracy Client
//!
//! Client-side game-state synchronisation for Fairmocracy, a multiplayer
//! voting game.
//!
//! The crate keeps one player's view of a running game consistent with the
//! server: it persists the player's profile, mirrors the game state pushed by
//! the server, lazily fetches auxiliary player and party data, and derives
//! which screen the player should see.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for
//!   any push channel
//! - **Server-Sent Events built-in**: default `transport-sse` feature
//!   provides [`SseConnector`]
//! - **HTTP API built-in**: default `http-api` feature provides
//!   [`HttpInfoApi`]
//! - **Event-driven**: receive typed [`SyncEvent`]s via a channel
//!
//! ## Layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`protocol`] | Wire types: snapshots, reward tables, HTTP payloads |
//! | [`profile`] | Persisted player profile and its storage |
//! | [`game_state`] | Merged mirror of the server's game state |
//! | [`fetcher`] | De-duplicated auxiliary-info fetching |
//! | [`screen`] | Screen selection |
//! | [`session`] | The state container tying the above together |
//! | [`client`] | The async sync loop and its handle |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "transport-sse", feature = "http-api"))]
//! # async fn example() -> Result<(), fairmocracy_client::SyncError> {
//! use fairmocracy_client::{
//!     ClientConfig, FileStorage, GameSyncClient, HttpInfoApi, ProfileUpdate, SseConnector,
//!     SyncEvent,
//! };
//!
//! let config = ClientConfig::from_env()?;
//! let connector = SseConnector::from_config(&config)?;
//! let api = HttpInfoApi::new(&config.base_url)?;
//! let (client, mut events) =
//!     GameSyncClient::start(connector, api, FileStorage::new(".fairmocracy"), config);
//!
//! client.set_user_data(ProfileUpdate::join_game("12", "ABCD"))?;
//! client.init_connection()?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SyncEvent::ScreenChanged(screen) = event {
//!         println!("show {screen}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod game_state;
pub mod profile;
pub mod protocol;
pub mod screen;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
#[cfg(feature = "http-api")]
pub use api::HttpInfoApi;
pub use api::InfoApi;
pub use client::GameSyncClient;
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::SyncError;
pub use event::SyncEvent;
pub use game_state::{EventCounterPolicy, GameStateMirror};
pub use profile::{Affiliation, FileStorage, MemoryStorage, ProfileStorage, ProfileUpdate, UserProfile};
pub use protocol::{GameSnapshot, GameStatus, Id};
pub use screen::Screen;
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-sse")]
pub use transports::{SseConnector, SseTransport};
