//! Local mirror of the authoritative game state.
//!
//! [`GameStateMirror`] merges partial [`GameSnapshot`]s and derives the
//! player-facing round and event ordinals (`frontend_round_n`,
//! `frontend_event_n`). The server's own round and event ids are not
//! sequential and may be reused, so the ordinals only advance the first time
//! this client observes an id.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol::{GameSnapshot, GameStatus, Id, RewardTable};

/// How the event ordinal behaves when a new round begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventCounterPolicy {
    /// Restart event numbering in every round: the event ordinal becomes 1 if
    /// the snapshot that opened the round already names an event, else 0.
    #[default]
    ResetPerRound,
    /// Keep counting events across rounds.
    Continuous,
}

/// What [`GameStateMirror::apply`] did with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot was merged.
    Applied {
        /// `frontend_round_n` advanced.
        round_advanced: bool,
        /// `frontend_event_n` advanced (or restarted for a new round).
        event_advanced: bool,
    },
    /// The snapshot carried a sequence number not newer than the last one
    /// applied and was dropped.
    Stale,
}

/// Client-side cache of the server's game state. Not the source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameStateMirror {
    pub id: Option<Id>,
    pub hash: Option<String>,
    pub name: Option<String>,
    pub status: Option<GameStatus>,
    pub current_round_id: Option<Id>,
    pub current_voting_event_id: Option<Id>,
    pub current_voting_question: Option<Value>,
    pub countdown_ends_at: Option<String>,
    pub voting_system: Option<String>,
    pub extra_info: Option<HashMap<String, Value>>,
    /// Ordinal of the current round as observed by this client.
    pub frontend_round_n: u32,
    /// Ordinal of the current voting event as observed by this client.
    pub frontend_event_n: u32,

    #[serde(skip)]
    policy: EventCounterPolicy,
    #[serde(skip)]
    seen_rounds: HashSet<Id>,
    #[serde(skip)]
    seen_events: HashSet<Id>,
    #[serde(skip)]
    last_seq: Option<u64>,
}

/// Overwrite `slot` when the snapshot carried the field.
fn merge<T>(slot: &mut Option<T>, incoming: Option<Option<T>>) {
    if let Some(value) = incoming {
        *slot = value;
    }
}

impl GameStateMirror {
    /// Create an empty mirror using the given event-counter policy.
    pub fn new(policy: EventCounterPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// The configured event-counter policy.
    pub fn policy(&self) -> EventCounterPolicy {
        self.policy
    }

    /// Merge `snapshot` into the mirror and advance the ordinals.
    ///
    /// Fields present in the snapshot overwrite the mirror (an explicit
    /// `null` clears), absent fields are retained.
    pub fn apply(&mut self, snapshot: GameSnapshot) -> ApplyOutcome {
        if let Some(seq) = snapshot.seq {
            if self.last_seq.is_some_and(|last| seq <= last) {
                debug!(seq, last_seq = ?self.last_seq, "dropping stale snapshot");
                return ApplyOutcome::Stale;
            }
            self.last_seq = Some(seq);
        }

        let prev_round = self.current_round_id.clone();
        let prev_event = self.current_voting_event_id.clone();

        if snapshot.id.is_some() {
            self.id = snapshot.id;
        }
        merge(&mut self.hash, snapshot.hash);
        merge(&mut self.name, snapshot.name);
        merge(&mut self.status, snapshot.status);
        merge(&mut self.current_round_id, snapshot.current_round_id);
        merge(
            &mut self.current_voting_event_id,
            snapshot.current_voting_event_id,
        );
        merge(
            &mut self.current_voting_question,
            snapshot.current_voting_question,
        );
        merge(&mut self.countdown_ends_at, snapshot.countdown_ends_at);
        merge(&mut self.voting_system, snapshot.voting_system);
        merge(&mut self.extra_info, snapshot.extra_info);

        let round_advanced = self.advance_round(prev_round.as_ref());
        let event_advanced = if round_advanced && self.policy == EventCounterPolicy::ResetPerRound
        {
            self.restart_events();
            true
        } else {
            self.advance_event(prev_event.as_ref())
        };

        ApplyOutcome::Applied {
            round_advanced,
            event_advanced,
        }
    }

    fn advance_round(&mut self, prev: Option<&Id>) -> bool {
        let Some(current) = self.current_round_id.clone() else {
            return false;
        };
        if prev == Some(&current) || !self.seen_rounds.insert(current.clone()) {
            return false;
        }
        self.frontend_round_n = if self.seen_rounds.len() == 1 {
            1
        } else {
            self.frontend_round_n.saturating_add(1)
        };
        debug!(round_id = %current, frontend_round_n = self.frontend_round_n, "round advanced");
        true
    }

    fn advance_event(&mut self, prev: Option<&Id>) -> bool {
        let Some(current) = self.current_voting_event_id.clone() else {
            return false;
        };
        if prev == Some(&current) || !self.seen_events.insert(current.clone()) {
            return false;
        }
        self.frontend_event_n = self.frontend_event_n.saturating_add(1);
        debug!(event_id = %current, frontend_event_n = self.frontend_event_n, "event advanced");
        true
    }

    fn restart_events(&mut self) {
        self.seen_events.clear();
        self.frontend_event_n = match self.current_voting_event_id.clone() {
            Some(event) => {
                self.seen_events.insert(event);
                1
            }
            None => 0,
        };
    }

    /// Restore every field to its default. The counter policy is kept.
    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }

    /// Reward table of the active voting system, if the mirror holds one
    /// that decodes.
    pub fn reward_table(&self) -> Option<RewardTable> {
        let system = self.voting_system.as_deref()?;
        let raw = self.extra_info.as_ref()?.get(system)?;
        match serde_json::from_value(raw.clone()) {
            Ok(table) => Some(table),
            Err(e) => {
                debug!(voting_system = system, "reward table does not decode: {e}");
                None
            }
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
    use proptest::prelude::*;

    fn id(s: &str) -> Option<Id> {
        Some(Id::from(s))
    }

    fn round(r: &str) -> GameSnapshot {
        GameSnapshot::for_game("g").with_round(id(r))
    }

    fn round_event(r: &str, e: &str) -> GameSnapshot {
        GameSnapshot::for_game("g")
            .with_round(id(r))
            .with_event(id(e))
    }

    #[test]
    fn absent_fields_are_retained() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(
            GameSnapshot::for_game("g")
                .with_status(GameStatus::Started)
                .with_voting_system("MAJORITY"),
        );
        mirror.apply(GameSnapshot::for_game("g").with_round(id("4")));

        assert_eq!(mirror.status, Some(GameStatus::Started));
        assert_eq!(mirror.voting_system.as_deref(), Some("MAJORITY"));
        assert_eq!(mirror.current_round_id, id("4"));
    }

    #[test]
    fn explicit_null_clears_field() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round_event("1", "10"));
        mirror.apply(GameSnapshot::for_game("g").with_event(None));
        assert_eq!(mirror.current_voting_event_id, None);
        assert_eq!(mirror.current_round_id, id("1"));
    }

    #[test]
    fn first_round_sets_counter_to_one() {
        let mut mirror = GameStateMirror::default();
        assert_eq!(mirror.frontend_round_n, 0);
        mirror.apply(GameSnapshot::for_game("g").with_status(GameStatus::Waiting));
        assert_eq!(mirror.frontend_round_n, 0);
        mirror.apply(round("7"));
        assert_eq!(mirror.frontend_round_n, 1);
    }

    #[test]
    fn new_round_increments_by_one() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round("7"));
        mirror.apply(round("7"));
        mirror.apply(round("12"));
        assert_eq!(mirror.frontend_round_n, 2);
    }

    #[test]
    fn revisited_round_does_not_increment() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round("1"));
        mirror.apply(round("2"));
        mirror.apply(round("1"));
        assert_eq!(mirror.frontend_round_n, 2);
    }

    #[test]
    fn round_cleared_then_reappearing_does_not_reset() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round("1"));
        mirror.apply(round("2"));
        mirror.apply(GameSnapshot::for_game("g").with_round(None));
        mirror.apply(round("3"));
        assert_eq!(mirror.frontend_round_n, 3);
    }

    #[test]
    fn events_reset_per_round_by_default() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round_event("1", "a"));
        mirror.apply(round_event("1", "b"));
        assert_eq!(mirror.frontend_event_n, 2);

        let outcome = mirror.apply(round_event("2", "c"));
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                round_advanced: true,
                event_advanced: true
            }
        );
        assert_eq!(mirror.frontend_round_n, 2);
        assert_eq!(mirror.frontend_event_n, 1);

        mirror.apply(round_event("2", "d"));
        assert_eq!(mirror.frontend_event_n, 2);
    }

    #[test]
    fn new_round_without_event_restarts_at_zero() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round_event("1", "a"));
        mirror.apply(GameSnapshot::for_game("g").with_round(id("2")).with_event(None));
        assert_eq!(mirror.frontend_event_n, 0);
        mirror.apply(GameSnapshot::for_game("g").with_event(id("b")));
        assert_eq!(mirror.frontend_event_n, 1);
    }

    #[test]
    fn continuous_policy_keeps_counting_events() {
        let mut mirror = GameStateMirror::new(EventCounterPolicy::Continuous);
        mirror.apply(round_event("1", "a"));
        mirror.apply(round_event("1", "b"));
        mirror.apply(round_event("2", "c"));
        assert_eq!(mirror.frontend_round_n, 2);
        assert_eq!(mirror.frontend_event_n, 3);
    }

    #[test]
    fn round_and_event_are_evaluated_independently() {
        let mut mirror = GameStateMirror::new(EventCounterPolicy::Continuous);
        let outcome = mirror.apply(round_event("1", "a"));
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                round_advanced: true,
                event_advanced: true
            }
        );
        assert_eq!((mirror.frontend_round_n, mirror.frontend_event_n), (1, 1));
    }

    #[test]
    fn applying_same_snapshot_twice_is_idempotent() {
        let snapshot = round_event("3", "x").with_status(GameStatus::Started);
        let mut once = GameStateMirror::default();
        once.apply(snapshot.clone());
        let mut twice = once.clone();
        let outcome = twice.apply(snapshot);

        assert_eq!(once, twice);
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                round_advanced: false,
                event_advanced: false
            }
        );
    }

    #[test]
    fn stale_sequence_is_dropped() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round("1").with_seq(5));
        let before = mirror.clone();

        assert_eq!(mirror.apply(round("2").with_seq(5)), ApplyOutcome::Stale);
        assert_eq!(mirror.apply(round("2").with_seq(3)), ApplyOutcome::Stale);
        assert_eq!(mirror, before);

        mirror.apply(round("2").with_seq(6));
        assert_eq!(mirror.frontend_round_n, 2);
    }

    #[test]
    fn unsequenced_snapshots_always_apply() {
        let mut mirror = GameStateMirror::default();
        mirror.apply(round("1").with_seq(5));
        mirror.apply(round("2"));
        assert_eq!(mirror.current_round_id, id("2"));
    }

    #[test]
    fn reset_restores_defaults_but_keeps_policy() {
        let mut mirror = GameStateMirror::new(EventCounterPolicy::Continuous);
        mirror.apply(round_event("1", "a").with_seq(9));
        mirror.reset();

        assert_eq!(mirror, GameStateMirror::new(EventCounterPolicy::Continuous));
        assert_eq!(mirror.policy(), EventCounterPolicy::Continuous);

        // Sequence history is forgotten too.
        mirror.apply(round("1").with_seq(1));
        assert_eq!(mirror.frontend_round_n, 1);
    }

    #[test]
    fn reward_table_for_active_voting_system() {
        let mut mirror = GameStateMirror::default();
        let mut extra = HashMap::new();
        extra.insert(
            "MAJORITY_WITH_REWARD".to_owned(),
            serde_json::json!({"ACCEPTED": {"voters": {"1": 3}}, "REJECTED": {"parties": {"2": 1}}}),
        );
        extra.insert("OTHER".to_owned(), serde_json::json!("not a table"));
        mirror.apply(
            GameSnapshot::for_game("g")
                .with_voting_system("MAJORITY_WITH_REWARD")
                .with_extra_info(extra),
        );

        let table = mirror.reward_table().unwrap();
        assert_eq!(table.accepted.voters.get(&Id::from("1")), Some(&3));
        assert_eq!(table.rejected.parties.get(&Id::from("2")), Some(&1));

        mirror.apply(GameSnapshot::for_game("g").with_voting_system("OTHER"));
        assert!(mirror.reward_table().is_none());

        mirror.apply(GameSnapshot::for_game("g").with_voting_system("MISSING"));
        assert!(mirror.reward_table().is_none());
    }

    fn snapshot_strategy() -> impl Strategy<Value = GameSnapshot> {
        let maybe_id = || prop::option::of(prop::option::of(0u64..6).prop_map(|o| o.map(Id::from)));
        (maybe_id(), maybe_id()).prop_map(|(round, event)| GameSnapshot {
            id: Some(Id::from("g")),
            current_round_id: round,
            current_voting_event_id: event,
            ..Default::default()
        })
    }

    proptest! {
        #[test]
        fn round_counter_is_monotonic_and_counts_distinct_rounds(
            snapshots in prop::collection::vec(snapshot_strategy(), 0..40)
        ) {
            let mut mirror = GameStateMirror::default();
            let mut distinct = HashSet::new();
            for snapshot in snapshots {
                let before = mirror.frontend_round_n;
                mirror.apply(snapshot);
                let after = mirror.frontend_round_n;
                prop_assert!(after >= before);
                prop_assert!(after - before <= 1);
                if let Some(round) = mirror.current_round_id.clone() {
                    distinct.insert(round);
                }
                prop_assert_eq!(after as usize, distinct.len());
            }
        }

        #[test]
        fn event_counter_never_decreases_within_a_round(
            snapshots in prop::collection::vec(snapshot_strategy(), 0..40)
        ) {
            let mut mirror = GameStateMirror::default();
            for snapshot in snapshots {
                let round_before = mirror.frontend_round_n;
                let event_before = mirror.frontend_event_n;
                mirror.apply(snapshot);
                if mirror.frontend_round_n == round_before {
                    prop_assert!(mirror.frontend_event_n >= event_before);
                    prop_assert!(mirror.frontend_event_n - event_before <= 1);
                }
            }
        }
    }
}
