//! Async client that keeps a player's view of a Fairmocracy game in sync.
//!
//! [`GameSyncClient`] is a thin handle that communicates with a background
//! sync loop task via an unbounded MPSC channel. The loop owns the
//! [`GameSession`] and is the only place state is mutated; consumers observe
//! it through [`SyncEvent`]s on the bounded channel returned from
//! [`GameSyncClient::start`], or through the snapshot accessors.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::from_env()?;
//! let connector = SseConnector::new(config.stream_url(), &config.stream_event)?;
//! let api = HttpInfoApi::new(&config.base_url)?;
//! let storage = FileStorage::new(".fairmocracy");
//! let (client, mut events) = GameSyncClient::start(connector, api, storage, config);
//!
//! client.set_user_data(ProfileUpdate::join_game("12", "ABCD"))?;
//! client.init_connection()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SyncEvent::ScreenChanged(screen) => { /* … */ }
//!         SyncEvent::ReconnectFailed { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::InfoApi;
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::{Result, SyncError};
use crate::event::SyncEvent;
use crate::fetcher::{self, FetchKey, FetchOutcome, FetchRequest};
use crate::game_state::GameStateMirror;
use crate::profile::{Affiliation, ProfileStorage, ProfileStore, ProfileUpdate, UserProfile};
use crate::protocol::{Id, VotingState};
use crate::screen::Screen;
use crate::session::{GameSession, Ingest};
use crate::transport::{Connector, Transport};

// ── Commands ────────────────────────────────────────────────────────

/// Requests from the handle to the sync loop.
#[derive(Debug)]
enum Command {
    InitConnection,
    SetUserData(ProfileUpdate),
    ClearUserData,
    LeaveGame,
    RecordAffiliation {
        round_id: Id,
        affiliation: Affiliation,
    },
    RecordVote {
        event_id: Id,
        choice: String,
    },
    AcknowledgeInfo,
    RefreshVotingState,
}

// ── Shared state ────────────────────────────────────────────────────

/// The last state published by the sync loop.
#[derive(Debug, Clone, Default)]
struct SessionView {
    profile: UserProfile,
    mirror: GameStateMirror,
    screen: Screen,
}

/// Internal shared state between the client handle and the sync loop.
struct ClientState {
    connected: AtomicBool,
    view: Mutex<SessionView>,
}

impl ClientState {
    fn new(view: SessionView) -> Self {
        Self {
            connected: AtomicBool::new(false),
            view: Mutex::new(view),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for one player's game session.
///
/// Created via [`GameSyncClient::start`], which spawns a background sync loop
/// and returns this handle together with an event receiver.
///
/// All mutating methods queue a command to the sync loop and return
/// immediately. Their effects become visible through [`SyncEvent`]s and the
/// accessors once the loop has processed them.
pub struct GameSyncClient {
    /// Sender half of the command channel to the sync loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Shared state published by the sync loop.
    state: Arc<ClientState>,
    /// Handle to the background sync loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the sync loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl GameSyncClient {
    /// Load the stored profile and start the sync loop.
    ///
    /// The push channel is not opened until
    /// [`init_connection`](Self::init_connection) is called. Must be called
    /// from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `connector`: Opens push-channel connections.
    /// * `api`: Serves auxiliary player, party and voting data.
    /// * `storage`: Durable storage for the player profile.
    /// * `config`: Client configuration.
    ///
    /// # Returns
    ///
    /// A tuple of `(client_handle, event_receiver)`. The event receiver yields
    /// [`SyncEvent`]s until the client shuts down.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start<C, A, S>(
        connector: C,
        api: A,
        storage: S,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>)
    where
        C: Connector,
        A: InfoApi,
        S: ProfileStorage,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let profile = ProfileStore::open(storage, config.storage_key.clone());
        let mut session = GameSession::new(profile, config.event_counter_policy);
        let view = SessionView {
            profile: session.profile().clone(),
            mirror: session.mirror().clone(),
            screen: session.screen(),
        };

        let state = Arc::new(ClientState::new(view));
        let sync_loop = SyncLoop {
            connector: Arc::new(connector),
            api: Arc::new(api),
            session,
            link: Link::Idle,
            tasks: JoinSet::new(),
            reconnect: config.reconnect,
            event_tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(sync_loop.run(cmd_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Open the push channel. Does nothing while a connection is open or
    /// being opened; cancels a pending reconnect delay otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn init_connection(&self) -> Result<()> {
        self.send(Command::InitConnection)
    }

    /// Merge `update` into the stored profile.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn set_user_data(&self, update: ProfileUpdate) -> Result<()> {
        self.send(Command::SetUserData(update))
    }

    /// Reset the stored profile to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn clear_user_data(&self) -> Result<()> {
        self.send(Command::ClearUserData)
    }

    /// Leave the current game: clear the profile and the game mirror.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn leave_game(&self) -> Result<()> {
        self.send(Command::LeaveGame)
    }

    /// Record the party the player chose for a round.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn record_affiliation(&self, round_id: impl Into<Id>, affiliation: Affiliation) -> Result<()> {
        self.send(Command::RecordAffiliation {
            round_id: round_id.into(),
            affiliation,
        })
    }

    /// Record the player's vote for a voting event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn record_vote(&self, event_id: impl Into<Id>, choice: impl Into<String>) -> Result<()> {
        self.send(Command::RecordVote {
            event_id: event_id.into(),
            choice: choice.into(),
        })
    }

    /// Record that the player moved on from the info screen.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn acknowledge_info(&self) -> Result<()> {
        self.send(Command::AcknowledgeInfo)
    }

    /// Fetch the current voting system and reward tables of the joined game
    /// and merge them into the game mirror.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] if the sync loop has exited.
    pub fn refresh_voting_state(&self) -> Result<()> {
        self.send(Command::RefreshVotingState)
    }

    /// Shut down the client, closing the push channel and stopping the
    /// background task.
    ///
    /// After calling this method, the event receiver will yield `None` once the
    /// sync loop exits.
    pub async fn shutdown(&mut self) {
        debug!("GameSyncClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the sync loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("sync loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("sync loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("sync loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the push channel is open.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// The screen that should currently be shown.
    pub async fn current_screen(&self) -> Screen {
        self.state.view.lock().await.screen
    }

    /// A copy of the current game mirror.
    pub async fn game_state(&self) -> GameStateMirror {
        self.state.view.lock().await.mirror.clone()
    }

    /// A copy of the current player profile.
    pub async fn profile(&self) -> UserProfile {
        self.state.view.lock().await.profile.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| SyncError::NotConnected)
    }
}

impl std::fmt::Debug for GameSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSyncClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for GameSyncClient {
    fn drop(&mut self) {
        // `Drop` cannot await the graceful path, so the loop is aborted and
        // the transport is dropped without `close()`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Sync loop ───────────────────────────────────────────────────────

type ConnectFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// State of the push channel.
enum Link<T> {
    /// No connection and none scheduled.
    Idle,
    /// A connection attempt is in progress. `attempt` is 0 for a
    /// caller-initiated connection.
    Connecting {
        attempt: u32,
        future: ConnectFuture<T>,
    },
    Connected(T),
    /// Waiting to retry.
    Backoff { until: Instant, attempt: u32 },
}

enum LinkEvent<T> {
    Opened { attempt: u32, result: Result<T> },
    Message(Option<Result<String>>),
    RetryDue { attempt: u32 },
}

/// Work spawned off the sync loop.
enum Completion {
    Fetch(FetchOutcome),
    VotingState {
        game_id: Id,
        result: Result<VotingState>,
    },
}

/// Wait for the next thing to happen on the push channel. Cancel-safe: the
/// connect future lives in `link` and transports are cancel-safe.
async fn next_link_event<T: Transport>(link: &mut Link<T>) -> LinkEvent<T> {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Connecting { attempt, future } => {
            let attempt = *attempt;
            let result = future.as_mut().await;
            LinkEvent::Opened { attempt, result }
        }
        Link::Connected(transport) => LinkEvent::Message(transport.recv().await),
        Link::Backoff { until, attempt } => {
            let attempt = *attempt;
            tokio::time::sleep_until(*until).await;
            LinkEvent::RetryDue { attempt }
        }
    }
}

struct SyncLoop<C: Connector, A: InfoApi> {
    connector: Arc<C>,
    api: Arc<A>,
    session: GameSession,
    link: Link<C::Transport>,
    tasks: JoinSet<Completion>,
    reconnect: ReconnectPolicy,
    event_tx: mpsc::Sender<SyncEvent>,
    state: Arc<ClientState>,
}

impl<C: Connector, A: InfoApi> SyncLoop<C, A> {
    /// Multiplex commands, push-channel traffic and finished background work
    /// until shutdown is requested or the handle is dropped.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("sync loop started");

        // The restored profile may already warrant fetches.
        self.reconcile().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("command channel closed, shutting down sync loop");
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }

                event = next_link_event(&mut self.link) => {
                    self.handle_link_event(event).await;
                }

                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.handle_completion(done).await;
                }
            }
        }

        if let Link::Connected(transport) = &mut self.link {
            if let Err(e) = transport.close().await {
                debug!("error closing push channel: {e}");
            }
        }
        self.link = Link::Idle;
        self.tasks.abort_all();
        emit_disconnected(&self.event_tx, &self.state, Some("client shut down".into())).await;

        debug!("sync loop exited");
    }

    async fn handle_command(&mut self, cmd: Command) {
        let persisted = match cmd {
            Command::InitConnection => {
                self.init_connection();
                return;
            }
            Command::RefreshVotingState => {
                self.refresh_voting_state();
                return;
            }
            Command::SetUserData(update) => self.session.set_user_data(update),
            Command::ClearUserData => self.session.clear_user_data(),
            Command::LeaveGame => {
                info!("leaving game");
                self.session.leave_game()
            }
            Command::RecordAffiliation {
                round_id,
                affiliation,
            } => self.session.record_affiliation(round_id, affiliation),
            Command::RecordVote { event_id, choice } => self.session.record_vote(event_id, choice),
            Command::AcknowledgeInfo => {
                self.session.acknowledge_info();
                Ok(())
            }
        };
        if let Err(e) = persisted {
            warn!("failed to persist profile: {e}");
        }
        self.reconcile().await;
    }

    async fn handle_link_event(&mut self, event: LinkEvent<C::Transport>) {
        match event {
            LinkEvent::Opened {
                attempt,
                result: Ok(transport),
            } => {
                info!(attempt, "push channel connected");
                self.link = Link::Connected(transport);
                self.state.connected.store(true, Ordering::Release);
                emit_event(&self.event_tx, SyncEvent::Connected);
            }
            LinkEvent::Opened {
                attempt,
                result: Err(e),
            } => {
                warn!(attempt, "failed to open push channel: {e}");
                self.schedule_reconnect(attempt.saturating_add(1));
            }
            LinkEvent::Message(Some(Ok(text))) => match self.session.ingest(&text) {
                Ingest::Applied(_) => self.reconcile().await,
                Ingest::Malformed | Ingest::ForeignGame => {}
            },
            LinkEvent::Message(Some(Err(e))) => {
                error!("transport receive error: {e}");
                self.link = Link::Idle;
                emit_disconnected(
                    &self.event_tx,
                    &self.state,
                    Some(format!("transport receive error: {e}")),
                )
                .await;
                self.schedule_reconnect(1);
            }
            LinkEvent::Message(None) => {
                debug!("push channel closed by server");
                self.link = Link::Idle;
                emit_disconnected(&self.event_tx, &self.state, None).await;
                self.schedule_reconnect(1);
            }
            LinkEvent::RetryDue { attempt } => self.connect(attempt),
        }
    }

    async fn handle_completion(&mut self, done: std::result::Result<Completion, JoinError>) {
        match done {
            Ok(Completion::Fetch(outcome)) => {
                let succeeded = outcome.succeeded();
                let key = outcome.key().clone();
                self.session.complete_fetch(outcome);
                // The key may have moved on while the request was out. A
                // failure for the still-current key is not retried here.
                let moved_on = FetchKey::current(self.session.profile(), self.session.mirror())
                    .as_ref()
                    != Some(&key);
                if succeeded || moved_on {
                    self.reconcile().await;
                } else {
                    self.publish().await;
                }
            }
            Ok(Completion::VotingState { game_id, result }) => match result {
                Ok(voting_state) => {
                    debug!(game_id = %game_id, "merging voting state");
                    if let Ingest::Applied(_) =
                        self.session.apply_snapshot(voting_state.into_snapshot(game_id))
                    {
                        self.reconcile().await;
                    }
                }
                Err(e) => warn!(game_id = %game_id, "failed to fetch voting state: {e}"),
            },
            Err(e) => warn!("background task failed: {e}"),
        }
    }

    fn init_connection(&mut self) {
        match self.link {
            Link::Connected(_) | Link::Connecting { .. } => {
                debug!("push channel already open or opening");
            }
            Link::Idle | Link::Backoff { .. } => self.connect(0),
        }
    }

    fn connect(&mut self, attempt: u32) {
        debug!(attempt, "opening push channel");
        let connector = Arc::clone(&self.connector);
        self.link = Link::Connecting {
            attempt,
            future: Box::pin(async move { connector.connect().await }),
        };
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        match self.reconnect.jittered_delay_for(attempt) {
            Some(delay) => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.link = Link::Backoff {
                    until: Instant::now() + delay,
                    attempt,
                };
                emit_event(&self.event_tx, SyncEvent::Reconnecting { attempt, delay });
            }
            None => {
                let attempts = attempt.saturating_sub(1);
                warn!(attempts, "not reconnecting");
                self.link = Link::Idle;
                emit_event(&self.event_tx, SyncEvent::ReconnectFailed { attempts });
            }
        }
    }

    fn refresh_voting_state(&mut self) {
        let Some(game_id) = self.session.profile().game_id.clone() else {
            debug!("no game joined, skipping voting state refresh");
            return;
        };
        let api = Arc::clone(&self.api);
        self.tasks.spawn(async move {
            let result = api.voting_state(&game_id).await;
            Completion::VotingState { game_id, result }
        });
    }

    fn spawn_fetch(&mut self, request: FetchRequest) {
        debug!(?request, "fetching auxiliary info");
        let api = Arc::clone(&self.api);
        self.tasks.spawn(async move {
            Completion::Fetch(fetcher::execute(api.as_ref(), request).await)
        });
    }

    /// Plan fetches for the current state, then publish it.
    async fn reconcile(&mut self) {
        let (requests, _) = self.session.plan_fetches();
        for request in requests {
            self.spawn_fetch(request);
        }
        self.publish().await;
    }

    /// Copy the session into the shared view and emit an event for every
    /// part that changed.
    async fn publish(&mut self) {
        let screen = self.session.screen();
        let profile = self.session.profile().clone();
        let mirror = self.session.mirror().clone();

        let mut changes = Vec::new();
        {
            let mut view = self.state.view.lock().await;
            if view.mirror != mirror {
                view.mirror = mirror.clone();
                changes.push(SyncEvent::GameStateChanged(Box::new(mirror)));
            }
            if view.profile != profile {
                view.profile = profile.clone();
                changes.push(SyncEvent::ProfileChanged(Box::new(profile)));
            }
            if view.screen != screen {
                debug!(from = %view.screen, to = %screen, "screen changed");
                view.screen = screen;
                changes.push(SyncEvent::ScreenChanged(screen));
            }
        }

        for event in changes {
            emit_event(&self.event_tx, event);
        }
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the sync loop.
fn emit_event(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Disconnected`](SyncEvent::Disconnected) event and update state.
///
/// Uses `send().await` instead of `try_send` because `Disconnected` must
/// never be silently dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SyncEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    let event = SyncEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::profile::MemoryStorage;
    use crate::protocol::{PartyInfo, UserInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    // ── Mocks ───────────────────────────────────────────────────────

    /// A transport that replays scripted payloads, then hangs.
    struct MockTransport {
        incoming: VecDeque<Option<Result<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn recv(&mut self) -> Option<Result<String>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one scripted transport per connection, then fails.
    #[derive(Default)]
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Option<Result<String>>>>>,
        connects: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<Option<Result<String>>>>) -> Self {
            Self {
                scripts: StdMutex::new(scripts.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&self) -> Result<MockTransport> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(script) => Ok(MockTransport {
                    incoming: script.into(),
                    closed: Arc::clone(&self.closed),
                }),
                None => Err(SyncError::TransportConnect("refused".into())),
            }
        }
    }

    struct NoApi;

    #[async_trait]
    impl InfoApi for NoApi {
        async fn user_info(&self, _user_id: &Id) -> Result<UserInfo> {
            Err(SyncError::Timeout)
        }

        async fn parties(&self, _game_id: &Id) -> Result<Vec<PartyInfo>> {
            Err(SyncError::Timeout)
        }

        async fn voting_state(&self, _game_id: &Id) -> Result<VotingState> {
            Err(SyncError::Timeout)
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("http://test").with_reconnect(ReconnectPolicy::disabled())
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_does_not_connect_until_init_connection() {
        let connector = MockConnector::new(vec![vec![]]);
        let connects = Arc::clone(&connector.connects);
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert!(!client.is_connected());

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn init_connection_is_noop_while_connected() {
        let connector = MockConnector::new(vec![vec![], vec![]]);
        let connects = Arc::clone(&connector.connects);
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
        client.init_connection().unwrap();
        client.init_connection().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn disconnected_on_transport_close() {
        let connector = MockConnector::new(vec![vec![None]]);
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Disconnected { reason: None }
        );
        // Reconnection is disabled.
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::ReconnectFailed { attempts: 0 }
        );
        assert!(!client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn receive_error_reports_reason() {
        let connector = MockConnector::new(vec![vec![Some(Err(SyncError::TransportClosed))]]);
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
        match events.recv().await.unwrap() {
            SyncEvent::Disconnected { reason: Some(reason) } => {
                assert!(reason.contains("transport connection closed"), "{reason}");
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport_and_rejects_commands() {
        let connector = MockConnector::new(vec![vec![]]);
        let closed = Arc::clone(&connector.closed);
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

        client.shutdown().await;
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Disconnected {
                reason: Some("client shut down".into())
            }
        );
        assert!(events.recv().await.is_none());
        assert!(matches!(
            client.acknowledge_info(),
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn zero_event_channel_capacity_does_not_panic() {
        let config = config().with_event_channel_capacity(0);
        let (mut client, mut events) = GameSyncClient::start(
            MockConnector::new(vec![vec![]]),
            NoApi,
            MemoryStorage::new(),
            config,
        );
        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn small_event_channel_capacity_drops_events_but_not_disconnected() {
        let mut script = Vec::new();
        for seq in 1..=20u64 {
            script.push(Some(Ok(format!(r#"{{"id": 1, "seq": {seq}, "hash": "h{seq}"}}"#))));
        }
        script.push(None);
        let storage = MemoryStorage::with_blob(
            crate::profile::DEFAULT_STORAGE_KEY,
            r#"{"gameId": "1"}"#,
        );

        let config = config().with_event_channel_capacity(1);
        let (mut client, mut events) =
            GameSyncClient::start(MockConnector::new(vec![script]), NoApi, storage, config);
        client.init_connection().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut received = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            received.push(event);
        }
        assert!(received.len() < 22, "expected drops, got {}", received.len());
        assert!(received
            .iter()
            .any(|e| matches!(e, SyncEvent::Disconnected { reason: None })));

        client.shutdown().await;
    }

    /// Transport that hangs forever in `close()`.
    struct HangingCloseTransport {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn recv(&mut self) -> Option<Result<String>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.close_called.store(true, Ordering::Release);
            std::future::pending().await
        }
    }

    struct HangingConnector {
        close_called: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for HangingConnector {
        type Transport = HangingCloseTransport;

        async fn connect(&self) -> Result<HangingCloseTransport> {
            Ok(HangingCloseTransport {
                close_called: Arc::clone(&self.close_called),
                dropped: Arc::clone(&self.dropped),
            })
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_sync_loop() {
        let close_called = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let connector = HangingConnector {
            close_called: Arc::clone(&close_called),
            dropped: Arc::clone(&dropped),
        };
        let config = config().with_shutdown_timeout(Duration::from_millis(20));
        let (mut client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config);

        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

        client.shutdown().await;
        assert!(close_called.load(Ordering::Acquire));
        assert!(dropped.load(Ordering::Acquire));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn drop_aborts_sync_loop() {
        let connector = MockConnector::new(vec![vec![]]);
        let closed = Arc::clone(&connector.closed);
        let (client, mut events) =
            GameSyncClient::start(connector, NoApi, MemoryStorage::new(), config());
        client.init_connection().unwrap();
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

        drop(client);
        assert!(events.recv().await.is_none());
        // Aborted, not closed gracefully.
        assert!(!closed.load(Ordering::Relaxed));
    }
}
