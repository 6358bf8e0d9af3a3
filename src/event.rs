//! Events emitted by the sync loop.

use std::time::Duration;

use crate::game_state::GameStateMirror;
use crate::profile::UserProfile;
use crate::screen::Screen;

/// An event delivered on the receiver returned by
/// [`GameSyncClient::start`](crate::client::GameSyncClient::start).
///
/// State-carrying variants hold a full copy of the new value so consumers
/// never have to call back into the client to render.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The push channel is open.
    Connected,
    /// The push channel closed. Never dropped, even when the channel is full.
    Disconnected {
        /// Why the channel closed; `None` for a clean close by the server.
        reason: Option<String>,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Automatic reconnection gave up; call
    /// [`init_connection`](crate::client::GameSyncClient::init_connection)
    /// to try again.
    ReconnectFailed {
        /// Number of reconnect attempts made.
        attempts: u32,
    },
    /// The game-state mirror changed.
    GameStateChanged(Box<GameStateMirror>),
    /// The player profile changed.
    ProfileChanged(Box<UserProfile>),
    /// A different screen should be shown.
    ScreenChanged(Screen),
}
