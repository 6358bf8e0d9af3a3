#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Session-level tests driven by raw server payloads.
//!
//! Feeds JSON exactly as the server pushes it through `GameSession::ingest`
//! and checks the reconciliation rules that must hold for any sequence of
//! payloads.

mod common;

use fairmocracy_client::profile::{ProfileStore, DEFAULT_STORAGE_KEY};
use fairmocracy_client::session::{GameSession, Ingest};
use fairmocracy_client::{EventCounterPolicy, GameStatus, Id, Screen};
use proptest::prelude::*;

use common::{registered_profile, storage_with};

fn session() -> GameSession {
    let store = ProfileStore::open(storage_with(&registered_profile()), DEFAULT_STORAGE_KEY);
    GameSession::new(store, EventCounterPolicy::default())
}

// ════════════════════════════════════════════════════════════════════
// Wire fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_payload_with_numeric_ids_is_applied() {
    let mut session = session();
    let ingest = session.ingest(
        r#"{
            "id": 1,
            "hash": "9f2c",
            "name": "Tuesday game",
            "status": "started",
            "current_round_id": 10,
            "current_voting_event_id": 100,
            "current_voting_question": {"title": "More bread?"},
            "countdown_ends_at": "2026-01-01T12:00:00Z",
            "voting_system": "MAJORITY",
            "extra_info": {"MAJORITY": {"ACCEPTED": {"voters": {"u1": 2}}}}
        }"#,
    );
    assert!(matches!(ingest, Ingest::Applied(_)));

    let mirror = session.mirror();
    assert_eq!(mirror.current_round_id, Some(Id::from("10")));
    assert_eq!(mirror.current_voting_event_id, Some(Id::from("100")));
    assert_eq!(mirror.name.as_deref(), Some("Tuesday game"));
    assert_eq!(mirror.reward_table().unwrap().accepted.voters[&Id::from("u1")], 2);
    assert_eq!(session.screen(), Screen::Info);
}

#[test]
fn partial_payload_keeps_unmentioned_fields() {
    let mut session = session();
    session.ingest(r#"{"id": "1", "status": "started", "current_round_id": "10", "name": "G"}"#);
    session.ingest(r#"{"id": "1", "countdown_ends_at": null, "name": null}"#);

    let mirror = session.mirror();
    assert_eq!(mirror.status, Some(GameStatus::Started));
    assert_eq!(mirror.current_round_id, Some(Id::from("10")));
    assert_eq!(mirror.name, None);
}

#[test]
fn unknown_status_falls_back_to_select() {
    let mut session = session();
    session.ingest(r#"{"id": 1, "status": "paused", "current_round_id": 10}"#);
    assert_eq!(session.mirror().status, Some(GameStatus::Unknown));
    assert_eq!(session.screen(), Screen::Select);
}

// ════════════════════════════════════════════════════════════════════
// Properties
// ════════════════════════════════════════════════════════════════════

fn payload_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["1", "2", "\"1\"", "null"]),
        prop::option::of(0u8..4),
        prop::option::of(0u8..4),
        prop::sample::select(vec!["waiting", "started", "ended"]),
    )
        .prop_map(|(game, round, event, status)| {
            let round = round.map_or("null".to_string(), |r| format!("\"r{r}\""));
            let event = event.map_or("null".to_string(), |e| format!("\"e{e}\""));
            format!(
                r#"{{"id": {game}, "status": "{status}", "current_round_id": {round}, "current_voting_event_id": {event}}}"#
            )
        })
}

proptest! {
    #[test]
    fn foreign_payloads_never_change_state(payloads in prop::collection::vec(payload_strategy(), 0..20)) {
        let mut session = session();
        for payload in payloads {
            let mirror = session.mirror().clone();
            let profile = session.profile().clone();
            if session.ingest(&payload) == Ingest::ForeignGame {
                prop_assert_eq!(session.mirror(), &mirror);
                prop_assert_eq!(session.profile(), &profile);
            }
        }
    }

    #[test]
    fn reapplying_a_payload_is_idempotent(
        history in prop::collection::vec(payload_strategy(), 0..10),
        last in payload_strategy(),
    ) {
        let mut session = session();
        for payload in &history {
            session.ingest(payload);
        }
        session.ingest(&last);
        let once = session.mirror().clone();
        session.ingest(&last);
        prop_assert_eq!(session.mirror(), &once);
    }

    #[test]
    fn screen_is_reproducible(payloads in prop::collection::vec(payload_strategy(), 1..10)) {
        let mut session = session();
        for payload in &payloads {
            session.ingest(payload);
        }
        let first = session.screen();
        prop_assert_eq!(session.screen(), first);
    }
}
