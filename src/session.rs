//! The owned state container tying the profile, mirror, fetcher and screen
//! selector together.
//!
//! [`GameSession`] holds no I/O of its own beyond profile persistence: the
//! sync loop feeds it pushed payloads and finished fetches, executes the
//! requests it plans, and publishes what it reports as changed. That keeps
//! every reconciliation rule testable without a runtime.

use tracing::{debug, warn};

use crate::error::Result;
use crate::fetcher::{AuxInfoFetcher, FetchOutcome, FetchRequest};
use crate::game_state::{ApplyOutcome, EventCounterPolicy, GameStateMirror};
use crate::profile::{Affiliation, ProfileStore, ProfileUpdate, UserProfile};
use crate::protocol::{GameSnapshot, Id};
use crate::screen::{Screen, ScreenSelector};

/// What happened to a pushed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// The snapshot was merged into the mirror.
    Applied(ApplyOutcome),
    /// The payload was not valid JSON for a snapshot.
    Malformed,
    /// The snapshot belongs to a game other than the joined one.
    ForeignGame,
}

/// Profile, game mirror and derived UI state for one player.
#[derive(Debug)]
pub struct GameSession {
    profile: ProfileStore,
    mirror: GameStateMirror,
    fetcher: AuxInfoFetcher,
    selector: ScreenSelector,
}

impl GameSession {
    /// Create a session around a loaded profile.
    pub fn new(profile: ProfileStore, policy: EventCounterPolicy) -> Self {
        Self {
            profile,
            mirror: GameStateMirror::new(policy),
            fetcher: AuxInfoFetcher::new(),
            selector: ScreenSelector::new(),
        }
    }

    /// The current profile.
    pub fn profile(&self) -> &UserProfile {
        self.profile.get()
    }

    /// The current game mirror.
    pub fn mirror(&self) -> &GameStateMirror {
        &self.mirror
    }

    /// The auxiliary-info fetcher.
    pub fn fetcher(&self) -> &AuxInfoFetcher {
        &self.fetcher
    }

    /// The screen bookkeeping.
    pub fn selector(&self) -> &ScreenSelector {
        &self.selector
    }

    /// Decode and apply one pushed payload.
    pub fn ingest(&mut self, raw: &str) -> Ingest {
        match serde_json::from_str::<GameSnapshot>(raw) {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(e) => {
                warn!("failed to decode game snapshot: {e}, raw: {raw}");
                Ingest::Malformed
            }
        }
    }

    /// Apply a snapshot if it belongs to the joined game.
    pub fn apply_snapshot(&mut self, snapshot: GameSnapshot) -> Ingest {
        let joined = self.profile.get().game_id.as_ref();
        if snapshot.id.is_none() || snapshot.id.as_ref() != joined {
            debug!(
                snapshot_game = ?snapshot.id,
                joined_game = ?joined,
                "ignoring snapshot for another game"
            );
            return Ingest::ForeignGame;
        }
        Ingest::Applied(self.mirror.apply(snapshot))
    }

    /// Plan auxiliary fetches for the current state.
    ///
    /// Reward figures are merged into the profile immediately; the returned
    /// requests must be executed and fed back through
    /// [`complete_fetch`](Self::complete_fetch). The second element is `true`
    /// when the profile changed.
    pub fn plan_fetches(&mut self) -> (Vec<FetchRequest>, bool) {
        let plan = self.fetcher.plan(self.profile.get(), &self.mirror);
        let changed = match plan.rewards {
            Some(update) => {
                self.merge_profile(update);
                true
            }
            None => false,
        };
        (plan.requests, changed)
    }

    /// Fold a finished fetch into the profile. Returns `true` when the
    /// profile changed.
    pub fn complete_fetch(&mut self, outcome: FetchOutcome) -> bool {
        match self.fetcher.complete(outcome, self.profile.get()) {
            Some(update) => {
                self.merge_profile(update);
                true
            }
            None => false,
        }
    }

    /// Merge `update` into the profile.
    ///
    /// An update that changes the joined game also drops the previous game's
    /// mirror, fetch bookkeeping and screen state.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be persisted; the in-memory
    /// profile is updated regardless.
    pub fn set_user_data(&mut self, update: ProfileUpdate) -> Result<()> {
        let switches_game = update
            .game_id
            .as_ref()
            .is_some_and(|game_id| *game_id != self.profile.get().game_id);
        if switches_game {
            debug!(
                from = ?self.profile.get().game_id,
                to = ?update.game_id,
                "joined game changed, resetting game state"
            );
            self.mirror.reset();
            self.fetcher.reset();
            self.selector.reset();
        }
        self.profile.set_user_data(update)
    }

    /// Reset the profile to defaults and forget all fetch bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be persisted.
    pub fn clear_user_data(&mut self) -> Result<()> {
        self.fetcher.reset();
        self.profile.clear_user_data()
    }

    /// Leave the game: clear the profile and reset the mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be persisted.
    pub fn leave_game(&mut self) -> Result<()> {
        self.mirror.reset();
        self.selector.reset();
        self.clear_user_data()
    }

    /// Record the player's party for a round.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be persisted.
    pub fn record_affiliation(&mut self, round_id: Id, affiliation: Affiliation) -> Result<()> {
        self.profile.record_affiliation(round_id, affiliation)
    }

    /// Record the player's vote for an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be persisted.
    pub fn record_vote(&mut self, event_id: Id, choice: impl Into<String>) -> Result<()> {
        self.profile.record_vote(event_id, choice)
    }

    /// Record that the player moved on from the info screen.
    pub fn acknowledge_info(&mut self) {
        self.selector.acknowledge_info();
    }

    /// Select the screen for the current state.
    pub fn screen(&mut self) -> Screen {
        self.selector.select(self.profile.get(), &self.mirror)
    }

    fn merge_profile(&mut self, update: ProfileUpdate) {
        if let Err(e) = self.profile.set_user_data(update) {
            warn!("failed to persist fetched profile data: {e}");
        }
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
    use crate::profile::{MemoryStorage, DEFAULT_STORAGE_KEY};
    use crate::protocol::{GameStatus, UserInfo};

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    fn session() -> GameSession {
        let store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        let mut session = GameSession::new(store, EventCounterPolicy::default());
        session
            .set_user_data(ProfileUpdate::join_game("1", "CODE"))
            .unwrap();
        session
            .set_user_data(ProfileUpdate::register("Ann", "u1"))
            .unwrap();
        session
            .record_affiliation(
                id("10"),
                Affiliation {
                    affiliation_id: id("a1"),
                    party_id: id("p1"),
                },
            )
            .unwrap();
        session
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let mut session = session();
        let before = session.mirror().clone();
        assert_eq!(session.ingest("{oops"), Ingest::Malformed);
        assert_eq!(session.mirror(), &before);
    }

    #[test]
    fn foreign_game_snapshot_is_ignored() {
        let mut session = session();
        let before_mirror = session.mirror().clone();
        let before_profile = session.profile().clone();

        let ingest = session.ingest(r#"{"id": 2, "status": "started", "current_round_id": 10}"#);
        assert_eq!(ingest, Ingest::ForeignGame);
        assert_eq!(session.mirror(), &before_mirror);
        assert_eq!(session.profile(), &before_profile);
    }

    #[test]
    fn snapshot_without_id_is_ignored() {
        let mut session = session();
        assert_eq!(
            session.ingest(r#"{"status": "started"}"#),
            Ingest::ForeignGame
        );
    }

    #[test]
    fn snapshot_before_joining_is_ignored() {
        let store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        let mut session = GameSession::new(store, EventCounterPolicy::default());
        assert_eq!(session.ingest(r#"{"id": 1}"#), Ingest::ForeignGame);
    }

    #[test]
    fn numeric_snapshot_id_matches_joined_game() {
        let mut session = session();
        let ingest = session.ingest(r#"{"id": 1, "status": "waiting", "current_round_id": 10}"#);
        assert!(matches!(ingest, Ingest::Applied(_)));
        assert_eq!(session.mirror().status, Some(GameStatus::Waiting));
        assert_eq!(session.mirror().frontend_round_n, 1);
        assert_eq!(session.screen(), Screen::Welcome);
    }

    #[test]
    fn full_voting_flow_drives_screens() {
        let mut session = session();
        session.ingest(
            r#"{"id": 1, "status": "started", "current_round_id": 10, "current_voting_event_id": 100}"#,
        );
        assert_eq!(session.screen(), Screen::Info);

        session.acknowledge_info();
        assert_eq!(session.screen(), Screen::Vote);

        session.record_vote(id("100"), "yes").unwrap();
        assert_eq!(session.screen(), Screen::Wait);

        session.ingest(r#"{"id": 1, "current_voting_event_id": 101}"#);
        assert_eq!(session.screen(), Screen::Info);
        assert_eq!(session.mirror().frontend_event_n, 2);

        session.ingest(r#"{"id": 1, "status": "ended"}"#);
        assert_eq!(session.screen(), Screen::End);
    }

    #[test]
    fn fetch_cycle_updates_profile() {
        let mut session = session();
        session.ingest(r#"{"id": 1, "status": "started", "current_round_id": 10, "current_voting_event_id": 100}"#);

        let (requests, changed) = session.plan_fetches();
        assert_eq!(requests.len(), 2);
        assert!(!changed);

        let (again, _) = session.plan_fetches();
        assert!(again.is_empty());

        let key = requests
            .iter()
            .find_map(|request| match request {
                FetchRequest::UserInfo { key } => Some(key.clone()),
                FetchRequest::PartyInfo { .. } => None,
            })
            .unwrap();
        let changed = session.complete_fetch(FetchOutcome::UserInfo {
            key,
            result: Ok(UserInfo {
                extra_info: serde_json::json!({"goal": "win"}),
            }),
        });
        assert!(changed);
        assert_eq!(
            session.profile().extra_info,
            Some(serde_json::json!({"goal": "win"}))
        );
    }

    #[test]
    fn rewards_merge_into_profile_on_plan() {
        let mut session = session();
        session.ingest(
            r#"{
                "id": 1, "status": "started", "current_round_id": 10, "current_voting_event_id": 100,
                "voting_system": "MAJORITY_WITH_REWARD",
                "extra_info": {"MAJORITY_WITH_REWARD": {
                    "ACCEPTED": {"voters": {"u1": 2}, "parties": {"p1": 7}},
                    "REJECTED": {"voters": {"u1": -1}, "parties": {}}
                }}
            }"#,
        );

        let (_, changed) = session.plan_fetches();
        assert!(changed);
        let profile = session.profile();
        assert_eq!(profile.event_rewards.accepted, 2);
        assert_eq!(profile.event_rewards.rejected, -1);
        assert_eq!(profile.party_event_rewards.unwrap().accepted, 7);

        let (_, changed_again) = session.plan_fetches();
        assert!(!changed_again);
    }

    #[test]
    fn clear_user_data_resets_profile_and_fetch_bookkeeping() {
        let mut session = session();
        session.ingest(r#"{"id": 1, "status": "started", "current_round_id": 10, "current_voting_event_id": 100}"#);
        session.plan_fetches();
        assert!(session.fetcher().user_info_in_flight());

        session.clear_user_data().unwrap();
        assert_eq!(session.profile(), &UserProfile::default());
        assert!(!session.fetcher().user_info_in_flight());
        assert!(!session.fetcher().party_info_in_flight());
    }

    #[test]
    fn switching_game_starts_from_an_empty_mirror() {
        let mut session = session();
        session.ingest(
            r#"{"id": 1, "seq": 50, "name": "old", "status": "started", "current_round_id": 10, "current_voting_event_id": 100}"#,
        );
        assert_eq!(session.mirror().frontend_round_n, 1);

        session
            .set_user_data(ProfileUpdate::join_game("2", "OTHER"))
            .unwrap();
        assert_eq!(session.mirror(), &GameStateMirror::default());

        let ingest = session.ingest(
            r#"{"id": 2, "seq": 1, "status": "waiting", "current_round_id": 20}"#,
        );
        assert!(matches!(ingest, Ingest::Applied(ApplyOutcome::Applied { .. })));
        let mirror = session.mirror();
        assert_eq!(mirror.id, Some(id("2")));
        assert_eq!(mirror.status, Some(GameStatus::Waiting));
        assert_eq!(mirror.frontend_round_n, 1);
        assert_eq!(mirror.name, None);
    }

    #[test]
    fn rejoining_the_same_game_keeps_the_mirror() {
        let mut session = session();
        session.ingest(r#"{"id": 1, "seq": 5, "status": "waiting", "current_round_id": 10}"#);
        let before = session.mirror().clone();

        session
            .set_user_data(ProfileUpdate::join_game("1", "CODE"))
            .unwrap();
        assert_eq!(session.mirror(), &before);
    }

    #[test]
    fn leave_game_resets_mirror_and_screen() {
        let mut session = session();
        session.ingest(r#"{"id": 1, "status": "started", "current_round_id": 10, "current_voting_event_id": 100}"#);
        session.screen();
        session.acknowledge_info();

        session.leave_game().unwrap();
        assert_eq!(session.mirror(), &GameStateMirror::default());
        assert_eq!(session.selector(), &ScreenSelector::new());
        assert_eq!(session.screen(), Screen::Select);
    }
}
