#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration-style client tests for the Fairmocracy client.
//!
//! Uses the shared mocks from `tests/common` to push snapshots through a
//! running `GameSyncClient` and verify what it publishes: mirror and profile
//! updates, screen changes, auxiliary fetches, and reconnect behaviour.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fairmocracy_client::profile::{EventRewards, DEFAULT_STORAGE_KEY};
use fairmocracy_client::{
    ClientConfig, GameSnapshot, GameStatus, GameSyncClient, Id, MemoryStorage, ProfileStorage,
    ProfileUpdate, ReconnectPolicy, Screen, SyncError, SyncEvent, UserProfile,
};
use tokio::sync::mpsc;

use common::{
    affiliation, drain, next_matching, profile_where, registered_profile, reward_table,
    screen_becomes, started, storage_with, MockApi, MockConnector, PushHandle, GAME, ROUND,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn config() -> ClientConfig {
    ClientConfig::new("http://test").with_reconnect(ReconnectPolicy::disabled())
}

/// Start a connected client for `profile` and return the server side of its
/// push channel.
async fn connected_client(
    profile: &UserProfile,
    api: MockApi,
) -> (GameSyncClient, mpsc::Receiver<SyncEvent>, PushHandle) {
    let connector = MockConnector::new();
    let server = connector.accept();
    let (client, mut events) = GameSyncClient::start(connector, api, storage_with(profile), config());
    client.init_connection().unwrap();
    next_matching(&mut events, |e| *e == SyncEvent::Connected).await;
    (client, events, server)
}

async fn wait_for_mirror(
    events: &mut mpsc::Receiver<SyncEvent>,
    mut pred: impl FnMut(&fairmocracy_client::GameStateMirror) -> bool,
) {
    next_matching(events, |e| matches!(e, SyncEvent::GameStateChanged(m) if pred(m.as_ref()))).await;
}

// ════════════════════════════════════════════════════════════════════
// Snapshot ingestion
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn pushed_snapshot_updates_mirror_and_screen() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    server.push_snapshot(&started(Some("100")));
    screen_becomes(&mut events, Screen::Info).await;

    let mirror = client.game_state().await;
    assert_eq!(mirror.status, Some(GameStatus::Started));
    assert_eq!(mirror.current_voting_event_id, Some(Id::from("100")));
    assert_eq!(mirror.frontend_round_n, 1);
    assert_eq!(mirror.frontend_event_n, 1);
    assert_eq!(client.current_screen().await, Screen::Info);

    client.shutdown().await;
}

#[tokio::test]
async fn foreign_game_snapshot_is_ignored() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    server.push_snapshot(&GameSnapshot::for_game("2").with_status(GameStatus::Ended));
    server.push(r#"{"status": "ended"}"#);
    server.push_snapshot(&started(None));

    // The first mirror change comes from the matching snapshot.
    match next_matching(&mut events, |e| matches!(e, SyncEvent::GameStateChanged(_))).await {
        SyncEvent::GameStateChanged(mirror) => {
            assert_eq!(mirror.id, Some(Id::from(GAME)));
            assert_eq!(mirror.status, Some(GameStatus::Started));
        }
        other => panic!("unexpected event {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_does_not_break_the_stream() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    server.push("{not json");
    server.push_snapshot(&started(None).with_voting_system("MAJORITY"));

    wait_for_mirror(&mut events, |m| m.voting_system.as_deref() == Some("MAJORITY")).await;
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn stale_sequence_numbers_are_dropped() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    server.push_snapshot(&started(Some("100")).with_seq(5));
    server.push_snapshot(&started(Some("99")).with_seq(4));
    server.push_snapshot(&started(Some("100")).with_seq(6).with_voting_system("X"));

    wait_for_mirror(&mut events, |m| m.voting_system.as_deref() == Some("X")).await;
    let mirror = client.game_state().await;
    assert_eq!(mirror.current_voting_event_id, Some(Id::from("100")));
    assert_eq!(mirror.frontend_event_n, 1);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Auxiliary info
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn auxiliary_info_is_fetched_into_the_profile() {
    let api = MockApi::new();
    let (mut client, mut events, server) = connected_client(&registered_profile(), api).await;

    server.push_snapshot(&started(Some("100")));
    let profile = profile_where(&mut events, |p| {
        p.extra_info.is_some() && p.party_extra_info.is_some()
    })
    .await;

    assert_eq!(profile.extra_info.unwrap()["role"], "farmer");
    assert_eq!(profile.party_extra_info.unwrap()["motto"], "bread");

    client.shutdown().await;
}

#[tokio::test]
async fn auxiliary_info_is_fetched_once_per_key() {
    let api = MockApi::new();
    api.hold();
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), api.clone()).await;

    for hash in ["a", "b", "c"] {
        server.push_snapshot(&started(Some("100")).with_voting_system(hash));
    }
    wait_for_mirror(&mut events, |m| m.voting_system.as_deref() == Some("c")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(api.user_info_calls(), 1);
    assert_eq!(api.parties_calls(), 1);

    api.release();
    profile_where(&mut events, |p| p.extra_info.is_some() && p.party_extra_info.is_some()).await;

    // Same key: nothing new.
    server.push_snapshot(&started(Some("100")).with_voting_system("d"));
    wait_for_mirror(&mut events, |m| m.voting_system.as_deref() == Some("d")).await;
    assert_eq!(api.user_info_calls(), 1);
    assert_eq!(api.parties_calls(), 1);

    // A new voting event changes the key.
    server.push_snapshot(&started(Some("101")));
    wait_for_mirror(&mut events, |m| {
        m.current_voting_event_id == Some(Id::from("101"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.user_info_calls(), 2);
    assert_eq!(api.parties_calls(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn fetch_failure_keeps_previous_values() {
    let mut profile = registered_profile();
    profile.extra_info = Some(serde_json::json!({"role": "baker"}));
    let api = MockApi::failing();
    let (mut client, mut events, server) = connected_client(&profile, api.clone()).await;

    server.push_snapshot(&started(Some("100")));
    screen_becomes(&mut events, Screen::Info).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(api.user_info_calls(), 1);
    let profile = client.profile().await;
    assert_eq!(profile.extra_info.unwrap()["role"], "baker");
    assert!(profile.party_extra_info.is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn failed_fetch_for_an_old_event_requests_the_new_one() {
    let api = MockApi::new();
    api.hold();
    api.fail_user_info(1);
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), api.clone()).await;

    server.push_snapshot(&started(Some("100")));
    wait_for_mirror(&mut events, |m| {
        m.current_voting_event_id == Some(Id::from("100"))
    })
    .await;
    server.push_snapshot(&started(Some("101")));
    wait_for_mirror(&mut events, |m| {
        m.current_voting_event_id == Some(Id::from("101"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(api.user_info_calls(), 1);

    // The request for event 100 fails; event 101 still needs its info.
    api.release();
    let profile = profile_where(&mut events, |p| p.extra_info.is_some()).await;
    assert_eq!(profile.extra_info.unwrap()["role"], "farmer");
    assert_eq!(api.user_info_calls(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn no_fetch_without_affiliation() {
    let mut profile = registered_profile();
    profile.affiliations.clear();
    let api = MockApi::new();
    let (mut client, mut events, server) = connected_client(&profile, api.clone()).await;

    server.push_snapshot(&started(Some("100")));
    wait_for_mirror(&mut events, |m| m.status == Some(GameStatus::Started)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(api.user_info_calls(), 0);
    assert_eq!(api.parties_calls(), 0);
    assert_eq!(client.current_screen().await, Screen::RegisterToVote);

    client.shutdown().await;
}

#[tokio::test]
async fn event_rewards_are_read_from_the_snapshot() {
    let api = MockApi::new();
    let (mut client, mut events, server) = connected_client(&registered_profile(), api.clone()).await;

    let tables = HashMap::from([("MAJORITY".to_string(), reward_table())]);
    server.push_snapshot(
        &started(Some("100"))
            .with_voting_system("MAJORITY")
            .with_extra_info(tables),
    );

    let profile = profile_where(&mut events, |p| p.party_event_rewards.is_some()).await;
    assert_eq!(
        profile.event_rewards,
        EventRewards {
            accepted: 3,
            rejected: -1
        }
    );
    assert_eq!(
        profile.party_event_rewards,
        Some(EventRewards {
            accepted: 5,
            rejected: 0
        })
    );
    assert_eq!(api.voting_state_calls(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn refresh_voting_state_seeds_the_mirror() {
    let api = MockApi::new();
    let (mut client, mut events, _server) =
        connected_client(&registered_profile(), api.clone()).await;

    client.refresh_voting_state().unwrap();
    wait_for_mirror(&mut events, |m| m.voting_system.as_deref() == Some("MAJORITY")).await;

    assert_eq!(api.voting_state_calls(), 1);
    let mirror = client.game_state().await;
    assert!(mirror.reward_table().is_some());
    // Seeding voting data does not invent a round or event.
    assert_eq!(mirror.frontend_round_n, 0);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Screen flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn registration_flow_through_the_handle() {
    let connector = MockConnector::new();
    let server = connector.accept();
    let storage = Arc::new(MemoryStorage::new());
    let (mut client, mut events) =
        GameSyncClient::start(connector, MockApi::new(), Arc::clone(&storage), config());
    assert_eq!(client.current_screen().await, Screen::Select);

    client.set_user_data(ProfileUpdate::join_game(GAME, "CODE")).unwrap();
    screen_becomes(&mut events, Screen::Register).await;

    client.set_user_data(ProfileUpdate::register("Ann", "u1")).unwrap();
    screen_becomes(&mut events, Screen::RegisterToVote).await;

    client.init_connection().unwrap();
    server.push_snapshot(
        &GameSnapshot::for_game(GAME)
            .with_status(GameStatus::Waiting)
            .with_round(Some(Id::from(ROUND))),
    );
    wait_for_mirror(&mut events, |m| m.status == Some(GameStatus::Waiting)).await;

    client.record_affiliation(ROUND, affiliation()).unwrap();
    screen_becomes(&mut events, Screen::Welcome).await;

    let stored: UserProfile =
        serde_json::from_str(&storage.load(DEFAULT_STORAGE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.name, "Ann");
    assert_eq!(stored.rounds, vec![Id::from(ROUND)]);

    client.shutdown().await;
}

#[tokio::test]
async fn info_vote_wait_cycle() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    server.push_snapshot(&started(Some("100")));
    screen_becomes(&mut events, Screen::Info).await;

    client.acknowledge_info().unwrap();
    screen_becomes(&mut events, Screen::Vote).await;

    client.record_vote("100", "yes").unwrap();
    screen_becomes(&mut events, Screen::Wait).await;

    server.push_snapshot(&started(Some("101")));
    screen_becomes(&mut events, Screen::Info).await;

    server.push_snapshot(&GameSnapshot::for_game(GAME).with_status(GameStatus::Ended));
    screen_becomes(&mut events, Screen::End).await;

    client.shutdown().await;
}

#[tokio::test]
async fn leave_game_clears_profile_and_mirror() {
    let profile = registered_profile();
    let storage = storage_with(&profile);
    let connector = MockConnector::new();
    let server = connector.accept();
    let (mut client, mut events) =
        GameSyncClient::start(connector, MockApi::new(), Arc::clone(&storage), config());
    client.init_connection().unwrap();

    server.push_snapshot(&started(Some("100")));
    screen_becomes(&mut events, Screen::Info).await;

    client.leave_game().unwrap();
    screen_becomes(&mut events, Screen::Select).await;

    assert_eq!(client.profile().await, UserProfile::default());
    let mirror = client.game_state().await;
    assert_eq!(mirror.id, None);
    assert_eq!(mirror.frontend_round_n, 0);

    let stored: UserProfile =
        serde_json::from_str(&storage.load(DEFAULT_STORAGE_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored, UserProfile::default());

    // Snapshots for the old game are now foreign.
    server.push_snapshot(&started(Some("101")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::GameStateChanged(_))));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reconnects_with_backoff_after_server_close() {
    let connector = MockConnector::new();
    let first = connector.accept();
    let second = connector.accept();
    let policy = ReconnectPolicy::default()
        .with_initial_delay(Duration::from_millis(10))
        .with_jitter(false)
        .with_max_attempts(Some(3));
    let (mut client, mut events) = GameSyncClient::start(
        connector.clone(),
        MockApi::new(),
        storage_with(&registered_profile()),
        config().with_reconnect(policy),
    );

    client.init_connection().unwrap();
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

    first.hang_up();
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::Disconnected { reason: None }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
    assert_eq!(connector.connects(), 2);

    // The new connection is live.
    second.push_snapshot(&started(None));
    wait_for_mirror(&mut events, |m| m.status == Some(GameStatus::Started)).await;

    client.shutdown().await;
}

#[tokio::test]
async fn gives_up_after_max_attempts_until_init_connection() {
    let connector = MockConnector::new();
    let first = connector.accept();
    let policy = ReconnectPolicy::default()
        .with_initial_delay(Duration::from_millis(5))
        .with_jitter(false)
        .with_max_attempts(Some(2));
    let (mut client, mut events) = GameSyncClient::start(
        connector.clone(),
        MockApi::new(),
        MemoryStorage::new(),
        config().with_reconnect(policy),
    );

    client.init_connection().unwrap();
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

    first.fail("reset by peer");
    assert!(matches!(
        events.recv().await.unwrap(),
        SyncEvent::Disconnected { reason: Some(_) }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        SyncEvent::Reconnecting { attempt: 1, .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        SyncEvent::Reconnecting { attempt: 2, .. }
    ));
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::ReconnectFailed { attempts: 2 }
    );
    assert_eq!(connector.connects(), 3);
    assert!(!client.is_connected());

    let _third = connector.accept();
    client.init_connection().unwrap();
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn failed_initial_connection_is_retried() {
    let connector = MockConnector::new();
    let policy = ReconnectPolicy::default()
        .with_initial_delay(Duration::from_millis(30))
        .with_jitter(false);
    let (mut client, mut events) = GameSyncClient::start(
        connector.clone(),
        MockApi::new(),
        MemoryStorage::new(),
        config().with_reconnect(policy),
    );

    client.init_connection().unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        SyncEvent::Reconnecting { attempt: 1, .. }
    ));
    let _server = connector.accept();
    assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);

    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_push_channel() {
    let (mut client, mut events, server) =
        connected_client(&registered_profile(), MockApi::new()).await;

    client.shutdown().await;
    assert!(server.closed.load(std::sync::atomic::Ordering::Relaxed));
    assert_eq!(
        next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected { .. })).await,
        SyncEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    assert!(matches!(
        client.set_user_data(ProfileUpdate::default()),
        Err(SyncError::NotConnected)
    ));
}
