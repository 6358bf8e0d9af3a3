//! Wire types exchanged with the Fairmocracy backend.
//!
//! The push channel delivers [`GameSnapshot`]s, which may be partial: a field
//! that is absent from the JSON leaves the mirrored value untouched, while an
//! explicit `null` clears it. To preserve that distinction every mergeable
//! field is an `Option<Option<T>>` decoded with
//! [`serde_with::rust::double_option`].
//!
//! The HTTP payloads ([`UserInfo`], [`PartyInfo`], [`VotingState`]) match the
//! backend's JSON responses.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Identifiers ─────────────────────────────────────────────────────

/// Server-side identifier for games, users, rounds, events, parties and
/// affiliations.
///
/// The backend stores integer ids, but they also travel as JSON object keys
/// and through the persisted profile as strings. `Id` accepts both forms and
/// normalises to the string form, so `7` and `"7"` are the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Create an id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the string form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or string identifier")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
                Ok(Id(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Id, E> {
                Ok(Id(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Id, E> {
                Ok(Id(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Id, E> {
                Ok(Id(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// Players are joining; no voting event is active yet.
    Waiting,
    /// The game is running and voting events are being held.
    Started,
    /// The game is over.
    Ended,
    /// Any status string this client does not understand.
    #[serde(other)]
    Unknown,
}

// ── Push-channel payload ────────────────────────────────────────────

/// A full or partial game-state snapshot pushed by the server.
///
/// For the mergeable fields, `None` means "absent from the payload, keep the
/// previous value" and `Some(None)` means "explicitly cleared".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Id of the game this snapshot belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    /// Optional monotonic sequence number. When present, snapshots whose
    /// sequence is not greater than the last applied one are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub hash: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub name: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub status: Option<Option<GameStatus>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub current_round_id: Option<Option<Id>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub current_voting_event_id: Option<Option<Id>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub current_voting_question: Option<Option<Value>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub countdown_ends_at: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub voting_system: Option<Option<String>>,
    /// Reward tables keyed by voting-system name. Kept as raw JSON so that a
    /// voting system with an unexpected shape does not reject the snapshot.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub extra_info: Option<Option<HashMap<String, Value>>>,
}

impl GameSnapshot {
    /// Start an empty snapshot for the given game.
    pub fn for_game(id: impl Into<Id>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Set the sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Set the game status.
    #[must_use]
    pub fn with_status(mut self, status: GameStatus) -> Self {
        self.status = Some(Some(status));
        self
    }

    /// Set (or clear, with `None`) the current round id.
    #[must_use]
    pub fn with_round(mut self, round_id: Option<Id>) -> Self {
        self.current_round_id = Some(round_id);
        self
    }

    /// Set (or clear, with `None`) the current voting event id.
    #[must_use]
    pub fn with_event(mut self, event_id: Option<Id>) -> Self {
        self.current_voting_event_id = Some(event_id);
        self
    }

    /// Set the active voting system.
    #[must_use]
    pub fn with_voting_system(mut self, voting_system: impl Into<String>) -> Self {
        self.voting_system = Some(Some(voting_system.into()));
        self
    }

    /// Set the reward tables.
    #[must_use]
    pub fn with_extra_info(mut self, extra_info: HashMap<String, Value>) -> Self {
        self.extra_info = Some(Some(extra_info));
        self
    }
}

// ── Reward tables ───────────────────────────────────────────────────

/// Reward table for one voting system, split by voting outcome.
///
/// ```json
/// { "ACCEPTED": { "voters": { "3": 2 }, "parties": { "1": 5 } },
///   "REJECTED": { "voters": { "3": 0 }, "parties": { "1": 1 } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTable {
    #[serde(rename = "ACCEPTED", default)]
    pub accepted: RewardShares,
    #[serde(rename = "REJECTED", default)]
    pub rejected: RewardShares,
}

/// Rewards per voter id and per party id for one outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardShares {
    #[serde(default)]
    pub voters: HashMap<Id, i64>,
    #[serde(default)]
    pub parties: HashMap<Id, i64>,
}

// ── HTTP payloads ───────────────────────────────────────────────────

/// Response of `GET /v1/user/{userId}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub extra_info: Value,
}

/// One entry of `GET /game/{gameId}/parties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub id: Id,
    #[serde(default)]
    pub extra_info: Value,
    /// Remaining party fields (name, round id, ...), kept verbatim.
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

/// Response of `GET /v1/voting/current_state/{gameId}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VotingState {
    #[serde(default)]
    pub voting_system: Option<String>,
    /// Reward tables keyed by voting-system name, when the response has them.
    #[serde(default)]
    pub extra_info: Option<HashMap<String, Value>>,
}

impl VotingState {
    /// Convert into a partial snapshot for `game_id` carrying only the voting
    /// system and its reward tables. Fields missing from the response are
    /// left out of the snapshot, so the mirror keeps its values.
    pub fn into_snapshot(self, game_id: Id) -> GameSnapshot {
        let mut snapshot = GameSnapshot::for_game(game_id);
        if let Some(voting_system) = self.voting_system {
            snapshot = snapshot.with_voting_system(voting_system);
        }
        if let Some(extra_info) = self.extra_info {
            snapshot = snapshot.with_extra_info(extra_info);
        }
        snapshot
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
    fn id_accepts_numbers_and_strings() {
        let from_number: Id = serde_json::from_str("42").unwrap();
        let from_string: Id = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.as_str(), "42");
    }

    #[test]
    fn id_serializes_as_string() {
        assert_eq!(serde_json::to_string(&Id::from(5u64)).unwrap(), "\"5\"");
    }

    #[test]
    fn id_rejects_other_json_types() {
        assert!(serde_json::from_str::<Id>("true").is_err());
        assert!(serde_json::from_str::<Id>("{}").is_err());
    }

    #[test]
    fn snapshot_distinguishes_absent_from_null() {
        let snapshot: GameSnapshot =
            serde_json::from_str(r#"{"id": 1, "current_voting_event_id": null}"#).unwrap();
        assert_eq!(snapshot.id, Some(Id::from("1")));
        assert_eq!(snapshot.current_voting_event_id, Some(None));
        assert_eq!(snapshot.current_round_id, None);
        assert_eq!(snapshot.status, None);
    }

    #[test]
    fn snapshot_decodes_full_server_payload() {
        let json = r#"{
            "id": 3,
            "hash": "abc",
            "name": "Demo",
            "status": "started",
            "current_round_id": 10,
            "current_voting_event_id": 22,
            "current_voting_question": {"title": "Law 1", "content": "..."},
            "countdown_ends_at": "2026-01-01T00:00:00Z",
            "voting_system": "MAJORITY_WITH_REWARD",
            "extra_info": {"MAJORITY_WITH_REWARD": {"ACCEPTED": {"voters": {"1": 2}}}},
            "unrelated": true
        }"#;
        let snapshot: GameSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, Some(Some(GameStatus::Started)));
        assert_eq!(snapshot.current_round_id, Some(Some(Id::from("10"))));
        assert_eq!(
            snapshot.voting_system,
            Some(Some("MAJORITY_WITH_REWARD".to_owned()))
        );
        let extra = snapshot.extra_info.unwrap().unwrap();
        assert!(extra.contains_key("MAJORITY_WITH_REWARD"));
    }

    #[test]
    fn unknown_status_decodes_to_unknown() {
        let snapshot: GameSnapshot = serde_json::from_str(r#"{"status": "paused"}"#).unwrap();
        assert_eq!(snapshot.status, Some(Some(GameStatus::Unknown)));
    }

    #[test]
    fn serialized_snapshot_omits_absent_fields() {
        let snapshot = GameSnapshot::for_game("g1").with_event(None);
        let value = serde_json::to_value(&snapshot).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object["current_voting_event_id"].is_null());
    }

    #[test]
    fn reward_table_defaults_missing_sections() {
        let table: RewardTable =
            serde_json::from_str(r#"{"ACCEPTED": {"voters": {"7": 3}}}"#).unwrap();
        assert_eq!(table.accepted.voters.get(&Id::from("7")), Some(&3));
        assert!(table.accepted.parties.is_empty());
        assert_eq!(table.rejected, RewardShares::default());
    }

    #[test]
    fn party_info_keeps_unknown_fields() {
        let party: PartyInfo =
            serde_json::from_str(r#"{"id": 4, "name": "Greens", "extra_info": {"x": 1}}"#)
                .unwrap();
        assert_eq!(party.id, Id::from("4"));
        assert_eq!(party.extra_info["x"], 1);
        assert_eq!(party.other["name"], "Greens");
    }

    #[test]
    fn voting_state_becomes_partial_snapshot() {
        let state: VotingState = serde_json::from_str(
            r#"{"voting_system": "MAJORITY", "extra_info": {"MAJORITY": {}}}"#,
        )
        .unwrap();
        let snapshot = state.into_snapshot(Id::from("9"));
        assert_eq!(snapshot.id, Some(Id::from("9")));
        assert_eq!(snapshot.voting_system, Some(Some("MAJORITY".to_owned())));
        assert!(snapshot.status.is_none());
        assert!(snapshot.current_round_id.is_none());
        assert!(snapshot.extra_info.unwrap().unwrap().contains_key("MAJORITY"));
    }

    #[test]
    fn voting_state_without_tables_keeps_mirror_tables() {
        let mut mirror = crate::game_state::GameStateMirror::default();
        mirror.apply(
            GameSnapshot::for_game("9")
                .with_voting_system("MAJORITY")
                .with_extra_info(HashMap::from([("MAJORITY".to_owned(), serde_json::json!({}))])),
        );

        let state: VotingState = serde_json::from_str(r#"{"voting_system": "MAJORITY"}"#).unwrap();
        let snapshot = state.into_snapshot(Id::from("9"));
        assert!(snapshot.extra_info.is_none());

        mirror.apply(snapshot);
        assert!(mirror.extra_info.unwrap().contains_key("MAJORITY"));
    }
}
