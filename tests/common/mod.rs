#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Fairmocracy client integration tests.
//!
//! Provides a channel-driven [`MockTransport`] handed out by a scripted
//! [`MockConnector`], a counting [`MockApi`], and helpers for building
//! snapshot payloads and stored profiles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use fairmocracy_client::profile::DEFAULT_STORAGE_KEY;
use fairmocracy_client::protocol::{PartyInfo, UserInfo, VotingState};
use fairmocracy_client::{
    Affiliation, Connector, GameSnapshot, GameStatus, Id, InfoApi, MemoryStorage, SyncError,
    SyncEvent, Transport, UserProfile,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};

// ── MockTransport ───────────────────────────────────────────────────

type Pushed = Option<Result<String, SyncError>>;

/// A transport fed by a [`PushHandle`].
///
/// `recv()` yields whatever the handle pushes, in order. Once the handle is
/// dropped it hangs forever so the sync loop stays alive until shutdown.
pub struct MockTransport {
    rx: mpsc::UnboundedReceiver<Pushed>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        match self.rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// The server side of one accepted connection.
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::UnboundedSender<Pushed>,
    /// Whether the client closed the connection.
    pub closed: Arc<AtomicBool>,
}

impl PushHandle {
    /// Push one payload.
    pub fn push(&self, payload: impl Into<String>) {
        self.tx.send(Some(Ok(payload.into()))).unwrap();
    }

    /// Push a snapshot.
    pub fn push_snapshot(&self, snapshot: &GameSnapshot) {
        self.push(serde_json::to_string(snapshot).unwrap());
    }

    /// Close the stream cleanly.
    pub fn hang_up(&self) {
        self.tx.send(None).unwrap();
    }

    /// Fail the stream with a receive error.
    pub fn fail(&self, reason: &str) {
        self.tx
            .send(Some(Err(SyncError::TransportReceive(reason.into()))))
            .unwrap();
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out queued connections in order. With nothing queued, connection
/// attempts are refused.
#[derive(Clone, Default)]
pub struct MockConnector {
    queue: Arc<StdMutex<VecDeque<MockTransport>>>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection that will be accepted and return its server side.
    pub fn accept(&self) -> PushHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.queue.lock().unwrap().push_back(MockTransport {
            rx,
            closed: Arc::clone(&closed),
        });
        PushHandle { tx, closed }
    }

    /// Number of connection attempts made so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, SyncError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SyncError::TransportConnect("connection refused".into()))
    }
}

// ── MockApi ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    user_info: Value,
    parties: Vec<PartyInfo>,
    voting_state: VotingState,
    user_info_calls: AtomicUsize,
    parties_calls: AtomicUsize,
    voting_state_calls: AtomicUsize,
    fail: AtomicBool,
    user_info_failures: AtomicUsize,
}

/// An [`InfoApi`] serving fixed data and counting calls.
///
/// Requests pass through a gate that is open by default; [`hold`](Self::hold)
/// closes it so requests stay in flight until [`release`](Self::release).
#[derive(Clone)]
pub struct MockApi {
    state: Arc<ApiState>,
    gate: Arc<StdMutex<Arc<Semaphore>>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ApiState {
                user_info: json!({"role": "farmer"}),
                parties: vec![party("p1", json!({"motto": "bread"})), party("p2", json!({}))],
                voting_state: VotingState {
                    voting_system: Some("MAJORITY".into()),
                    extra_info: Some(HashMap::from([("MAJORITY".to_string(), reward_table())])),
                },
                ..Default::default()
            }),
            gate: Arc::new(StdMutex::new(Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)))),
        }
    }

    /// Make every request fail.
    pub fn failing() -> Self {
        let api = Self::new();
        api.state.fail.store(true, Ordering::SeqCst);
        api
    }

    /// Fail the next `n` user-info requests that pass the gate.
    pub fn fail_user_info(&self, n: usize) {
        self.state.user_info_failures.store(n, Ordering::SeqCst);
    }

    /// Hold subsequent requests in flight.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Arc::new(Semaphore::new(0));
    }

    /// Let held requests complete.
    pub fn release(&self) {
        self.gate
            .lock()
            .unwrap()
            .add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn user_info_calls(&self) -> usize {
        self.state.user_info_calls.load(Ordering::SeqCst)
    }

    pub fn parties_calls(&self) -> usize {
        self.state.parties_calls.load(Ordering::SeqCst)
    }

    pub fn voting_state_calls(&self) -> usize {
        self.state.voting_state_calls.load(Ordering::SeqCst)
    }

    async fn pass_gate(&self) -> Result<(), SyncError> {
        let gate = Arc::clone(&self.gate.lock().unwrap());
        let _permit = gate.acquire().await.unwrap();
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(SyncError::HttpStatus {
                status: 500,
                url: "mock".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl InfoApi for MockApi {
    async fn user_info(&self, _user_id: &Id) -> Result<UserInfo, SyncError> {
        self.state.user_info_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;
        let planned_failure = self
            .state
            .user_info_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if planned_failure {
            return Err(SyncError::HttpStatus {
                status: 503,
                url: "mock".into(),
            });
        }
        Ok(UserInfo {
            extra_info: self.state.user_info.clone(),
        })
    }

    async fn parties(&self, _game_id: &Id) -> Result<Vec<PartyInfo>, SyncError> {
        self.state.parties_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;
        Ok(self.state.parties.clone())
    }

    async fn voting_state(&self, _game_id: &Id) -> Result<VotingState, SyncError> {
        self.state.voting_state_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;
        Ok(self.state.voting_state.clone())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub const GAME: &str = "1";
pub const USER: &str = "u1";
pub const ROUND: &str = "10";

fn party(id: &str, extra_info: Value) -> PartyInfo {
    PartyInfo {
        id: Id::from(id),
        extra_info,
        other: serde_json::Map::new(),
    }
}

/// Reward table with figures for `u1` and `p1`.
pub fn reward_table() -> Value {
    json!({
        "ACCEPTED": {"voters": {"u1": 3}, "parties": {"p1": 5}},
        "REJECTED": {"voters": {"u1": -1}, "parties": {"p1": 0}}
    })
}

/// A profile that joined game `1` as `u1` with party `p1` for round `10`.
pub fn registered_profile() -> UserProfile {
    let mut profile = UserProfile {
        name: "Ann".into(),
        game_id: Some(Id::from(GAME)),
        user_id: Some(Id::from(USER)),
        game_code: "CODE".into(),
        ..Default::default()
    };
    profile.affiliations.insert(Id::from(ROUND), affiliation());
    profile.rounds.push(Id::from(ROUND));
    profile
}

pub fn affiliation() -> Affiliation {
    Affiliation {
        affiliation_id: Id::from("a1"),
        party_id: Id::from("p1"),
    }
}

/// Storage pre-seeded with `profile`.
pub fn storage_with(profile: &UserProfile) -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::with_blob(
        DEFAULT_STORAGE_KEY,
        serde_json::to_string(profile).unwrap(),
    ))
}

/// A snapshot of game `1` in round `10`.
pub fn started(event: Option<&str>) -> GameSnapshot {
    GameSnapshot::for_game(GAME)
        .with_status(GameStatus::Started)
        .with_round(Some(Id::from(ROUND)))
        .with_event(event.map(Id::from))
}

// ── Event helpers ───────────────────────────────────────────────────

/// Receive events until one matches `pred`, panicking after two seconds.
pub async fn next_matching(
    events: &mut mpsc::Receiver<SyncEvent>,
    mut pred: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    let wait = async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for event")
}

/// Wait for a `ProfileChanged` whose profile satisfies `pred`.
pub async fn profile_where(
    events: &mut mpsc::Receiver<SyncEvent>,
    mut pred: impl FnMut(&UserProfile) -> bool,
) -> UserProfile {
    match next_matching(events, |e| matches!(e, SyncEvent::ProfileChanged(p) if pred(p.as_ref()))).await {
        SyncEvent::ProfileChanged(profile) => *profile,
        other => panic!("unexpected event {other:?}"),
    }
}

/// Wait for a `ScreenChanged` to `screen`.
pub async fn screen_becomes(
    events: &mut mpsc::Receiver<SyncEvent>,
    screen: fairmocracy_client::Screen,
) {
    next_matching(events, |e| *e == SyncEvent::ScreenChanged(screen)).await;
}

/// Drain whatever is currently queued without waiting.
pub fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
