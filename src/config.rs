//! Client configuration and the reconnect policy.

use std::time::Duration;

use rand::Rng;

use crate::error::{Result, SyncError};
use crate::game_state::EventCounterPolicy;
use crate::profile::DEFAULT_STORAGE_KEY;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default path of the push channel, relative to the base URL.
const DEFAULT_STREAM_PATH: &str = "/sse";

/// Default name of the server-sent event carrying snapshots.
const DEFAULT_STREAM_EVENT: &str = "message";

// ── Reconnect policy ────────────────────────────────────────────────

/// Exponential backoff with jitter for re-establishing the push channel.
///
/// The delay before attempt `n` (starting at 1) is
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`. With jitter
/// enabled the actual delay is drawn uniformly from the upper half of that
/// value.
///
/// # Example
///
/// ```
/// use fairmocracy_client::config::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default()
///     .with_initial_delay(Duration::from_millis(100))
///     .with_max_attempts(Some(3))
///     .with_jitter(false);
/// assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
/// assert_eq!(policy.delay_for(4), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between attempts. Values below 1 are clamped to 1.
    pub multiplier: f64,
    /// Give up after this many consecutive failed attempts. `None` retries
    /// forever; `Some(0)` disables automatic reconnection.
    pub max_attempts: Option<u32>,
    /// Randomise each delay within its upper half.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(10),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect automatically; the caller re-triggers the connection
    /// with `init_connection`.
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Set the delay before the first attempt.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Set the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before attempt `attempt` (1-based), or `None` once
    /// the attempt limit is exceeded.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(millis as u64))
    }

    /// Delay before attempt `attempt`, with jitter applied if enabled.
    pub fn jittered_delay_for(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for(attempt)?;
        if !self.jitter || delay.is_zero() {
            return Some(delay);
        }
        let half = delay / 2;
        let spread = rand::rng().random_range(0..=half.as_millis() as u64);
        Some(half + Duration::from_millis(spread))
    }
}

// ── Client configuration ────────────────────────────────────────────

/// Configuration for a [`GameSyncClient`](crate::client::GameSyncClient).
///
/// The only required field is `base_url`; all others have sensible defaults.
///
/// # Example
///
/// ```
/// use fairmocracy_client::config::{ClientConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = ClientConfig::new("http://localhost:8000")
///     .with_stream_path("/game/events")
///     .with_event_channel_capacity(64)
///     .with_reconnect(ReconnectPolicy::disabled());
/// assert_eq!(config.stream_url(), "http://localhost:8000/game/events");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Path of the push channel relative to `base_url`.
    pub stream_path: String,
    /// Name of the server-sent event that carries snapshots.
    pub stream_event: String,
    /// Key the profile is persisted under.
    pub storage_key: String,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) rather than blocking the sync loop. `Disconnected` is always
    /// delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the sync loop gets to close the transport on shutdown before it
    /// is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// How the push channel is re-established after failures.
    pub reconnect: ReconnectPolicy,
    /// How the event ordinal behaves across rounds.
    pub event_counter_policy: EventCounterPolicy,
}

impl ClientConfig {
    /// Create a configuration for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            stream_event: DEFAULT_STREAM_EVENT.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            event_counter_policy: EventCounterPolicy::default(),
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// `FAIRMOCRACY_BACKEND_URL` is required; `FAIRMOCRACY_STREAM_PATH` and
    /// `FAIRMOCRACY_STORAGE_KEY` override their defaults when set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingConfig`] if `FAIRMOCRACY_BACKEND_URL` is
    /// not set.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("FAIRMOCRACY_BACKEND_URL").map_err(|_| {
            SyncError::MissingConfig {
                var: "FAIRMOCRACY_BACKEND_URL",
            }
        })?;
        let mut config = Self::new(base_url);
        if let Ok(path) = std::env::var("FAIRMOCRACY_STREAM_PATH") {
            config = config.with_stream_path(path);
        }
        if let Ok(key) = std::env::var("FAIRMOCRACY_STORAGE_KEY") {
            config = config.with_storage_key(key);
        }
        Ok(config)
    }

    /// Full URL of the push channel.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }

    /// Set the push-channel path.
    #[must_use]
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.stream_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set the name of the server-sent event carrying snapshots.
    #[must_use]
    pub fn with_stream_event(mut self, event: impl Into<String>) -> Self {
        self.stream_event = event.into();
        self
    }

    /// Set the profile storage key.
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the event-counter policy.
    #[must_use]
    pub fn with_event_counter_policy(mut self, policy: EventCounterPolicy) -> Self {
        self.event_counter_policy = policy;
        self
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

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("http://host:8000/");
        assert_eq!(config.base_url, "http://host:8000");
        assert_eq!(config.stream_url(), "http://host:8000/sse");
        assert_eq!(config.stream_event, "message");
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.event_counter_policy, EventCounterPolicy::ResetPerRound);
    }

    #[test]
    fn stream_path_gets_leading_slash() {
        let config = ClientConfig::new("http://host").with_stream_path("events");
        assert_eq!(config.stream_url(), "http://host/events");
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = ClientConfig::new("http://host").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_max_attempts(None)
            .with_jitter(false);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.delay_for(50), Some(Duration::from_millis(350)));
        assert_eq!(policy.delay_for(0), None);
    }

    #[test]
    fn attempts_stop_at_limit() {
        let policy = ReconnectPolicy::default().with_max_attempts(Some(2));
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
        assert!(ReconnectPolicy::disabled().delay_for(1).is_none());
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let policy = ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(400))
            .with_max_attempts(None);
        for _ in 0..100 {
            let delay = policy.jittered_delay_for(1).unwrap();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(400));
        }
    }

    #[test]
    fn multiplier_is_clamped() {
        let policy = ReconnectPolicy::default()
            .with_multiplier(0.5)
            .with_jitter(false);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.delay_for(1), policy.delay_for(5));
    }
}
