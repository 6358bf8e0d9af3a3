//! The local player's profile and its durable storage.
//!
//! The profile is owned by the client: the server never pushes it. It is
//! persisted as a single JSON blob under a fixed storage key and rewritten on
//! every mutation, so a reload resumes the same player in the same game.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::Id;

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "fairmocracy-user";

// ── Profile types ───────────────────────────────────────────────────

/// The player's membership in a party for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affiliation {
    pub affiliation_id: Id,
    pub party_id: Id,
}

/// Reward totals for the outcome of a voting event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRewards {
    pub accepted: i64,
    pub rejected: i64,
}

/// The local player's identity, affiliations, votes and fetched info.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub name: String,
    pub game_id: Option<Id>,
    pub user_id: Option<Id>,
    /// At most one affiliation per round id.
    pub affiliations: HashMap<Id, Affiliation>,
    /// Round ids the player has registered for, in order.
    pub rounds: Vec<Id>,
    /// Vote choice per voting event id.
    pub votes: HashMap<Id, String>,
    pub is_admin: bool,
    pub game_code: String,
    pub extra_info: Option<Value>,
    pub party_extra_info: Option<Value>,
    pub event_rewards: EventRewards,
    pub party_event_rewards: Option<EventRewards>,
}

impl UserProfile {
    /// Affiliation for `round_id`, if the player registered for that round.
    pub fn affiliation_for(&self, round_id: Option<&Id>) -> Option<&Affiliation> {
        self.affiliations.get(round_id?)
    }

    /// Whether a vote has been recorded for `event_id`.
    pub fn has_voted(&self, event_id: Option<&Id>) -> bool {
        event_id.is_some_and(|event| self.votes.contains_key(event))
    }
}

/// A partial profile: every field that is `Some` overwrites the profile.
///
/// Fields that are themselves optional on the profile take an
/// `Option<Option<T>>`, where `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub game_id: Option<Option<Id>>,
    pub user_id: Option<Option<Id>>,
    pub affiliations: Option<HashMap<Id, Affiliation>>,
    pub rounds: Option<Vec<Id>>,
    pub votes: Option<HashMap<Id, String>>,
    pub is_admin: Option<bool>,
    pub game_code: Option<String>,
    pub extra_info: Option<Option<Value>>,
    pub party_extra_info: Option<Option<Value>>,
    pub event_rewards: Option<EventRewards>,
    pub party_event_rewards: Option<Option<EventRewards>>,
}

impl ProfileUpdate {
    /// Update that joins `game_id` with the given game code.
    pub fn join_game(game_id: impl Into<Id>, game_code: impl Into<String>) -> Self {
        Self {
            game_id: Some(Some(game_id.into())),
            game_code: Some(game_code.into()),
            ..Default::default()
        }
    }

    /// Update that registers the player under `name` with `user_id`.
    pub fn register(name: impl Into<String>, user_id: impl Into<Id>) -> Self {
        Self {
            name: Some(name.into()),
            user_id: Some(Some(user_id.into())),
            ..Default::default()
        }
    }

    /// Whether the update carries no fields.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply_to(self, profile: &mut UserProfile) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }

        set(&mut profile.name, self.name);
        set(&mut profile.game_id, self.game_id);
        set(&mut profile.user_id, self.user_id);
        set(&mut profile.affiliations, self.affiliations);
        set(&mut profile.rounds, self.rounds);
        set(&mut profile.votes, self.votes);
        set(&mut profile.is_admin, self.is_admin);
        set(&mut profile.game_code, self.game_code);
        set(&mut profile.extra_info, self.extra_info);
        set(&mut profile.party_extra_info, self.party_extra_info);
        set(&mut profile.event_rewards, self.event_rewards);
        set(&mut profile.party_event_rewards, self.party_event_rewards);
    }
}

// ── Storage ─────────────────────────────────────────────────────────

/// Durable key-value storage for the serialized profile.
pub trait ProfileStorage: Send + 'static {
    /// Read the blob stored under `key`. `Ok(None)` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage exists but cannot be read.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    fn save(&self, key: &str, blob: &str) -> Result<()>;
}

impl<S: ProfileStorage + Sync> ProfileStorage for std::sync::Arc<S> {
    fn load(&self, key: &str) -> Result<Option<String>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        (**self).save(key, blob)
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store profiles in `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ProfileStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-process storage, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage pre-seeded with `blob` under `key`.
    pub fn with_blob(key: impl Into<String>, blob: impl Into<String>) -> Self {
        let storage = Self::new();
        if let Ok(mut blobs) = storage.blobs.lock() {
            blobs.insert(key.into(), blob.into());
        }
        storage
    }
}

impl ProfileStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .blobs
            .lock()
            .ok()
            .and_then(|blobs| blobs.get(key).cloned()))
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_owned(), blob.to_owned());
        }
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// The profile together with the storage it is persisted to.
pub struct ProfileStore {
    profile: UserProfile,
    storage: Box<dyn ProfileStorage>,
    key: String,
}

impl ProfileStore {
    /// Load the profile stored under `key`, falling back to defaults when
    /// nothing is stored or the stored blob cannot be read or decoded.
    pub fn open(storage: impl ProfileStorage, key: impl Into<String>) -> Self {
        let key = key.into();
        let profile = match storage.load(&key) {
            Ok(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(profile) => {
                    debug!(key = %key, "restored stored profile");
                    profile
                }
                Err(e) => {
                    warn!(key = %key, "stored profile does not decode, using defaults: {e}");
                    UserProfile::default()
                }
            },
            Ok(None) => UserProfile::default(),
            Err(e) => {
                warn!(key = %key, "failed to read stored profile, using defaults: {e}");
                UserProfile::default()
            }
        };
        Self {
            profile,
            storage: Box::new(storage),
            key,
        }
    }

    /// The current profile.
    pub fn get(&self) -> &UserProfile {
        &self.profile
    }

    /// Merge `update` into the profile and persist the result.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails. The in-memory profile is updated
    /// regardless.
    pub fn set_user_data(&mut self, update: ProfileUpdate) -> Result<()> {
        update.apply_to(&mut self.profile);
        self.persist()
    }

    /// Replace the profile with defaults and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails. The in-memory profile is reset
    /// regardless.
    pub fn clear_user_data(&mut self) -> Result<()> {
        self.profile = UserProfile::default();
        self.persist()
    }

    /// Record the player's affiliation for `round_id`, replacing any earlier
    /// one for the same round.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn record_affiliation(&mut self, round_id: Id, affiliation: Affiliation) -> Result<()> {
        if !self.profile.rounds.contains(&round_id) {
            self.profile.rounds.push(round_id.clone());
        }
        self.profile.affiliations.insert(round_id, affiliation);
        self.persist()
    }

    /// Record the choice the player cast for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting fails.
    pub fn record_vote(&mut self, event_id: Id, choice: impl Into<String>) -> Result<()> {
        self.profile.votes.insert(event_id, choice.into());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let blob = serde_json::to_string(&self.profile)?;
        self.storage.save(&self.key, &blob)
    }
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore")
            .field("key", &self.key)
            .field("profile", &self.profile)
            .finish()
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
    use std::sync::Arc;

    use tempdir::TempDir;

    /// Storage shared between a store and the test, so writes can be observed.
    #[derive(Clone, Default)]
    struct SharedStorage(Arc<MemoryStorage>);

    impl ProfileStorage for SharedStorage {
        fn load(&self, key: &str) -> Result<Option<String>> {
            self.0.load(key)
        }

        fn save(&self, key: &str, blob: &str) -> Result<()> {
            self.0.save(key, blob)
        }
    }

    struct FailingStorage;

    impl ProfileStorage for FailingStorage {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Err(std::io::Error::other("disk gone").into())
        }

        fn save(&self, _key: &str, _blob: &str) -> Result<()> {
            Err(std::io::Error::other("disk gone").into())
        }
    }

    fn stored(storage: &SharedStorage) -> UserProfile {
        let blob = storage.0.load(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&blob).unwrap()
    }

    #[test]
    fn open_without_stored_blob_uses_defaults() {
        let store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        assert_eq!(store.get(), &UserProfile::default());
    }

    #[test]
    fn open_with_corrupt_blob_uses_defaults() {
        let storage = MemoryStorage::with_blob(DEFAULT_STORAGE_KEY, "{not json");
        let store = ProfileStore::open(storage, DEFAULT_STORAGE_KEY);
        assert_eq!(store.get(), &UserProfile::default());
    }

    #[test]
    fn open_with_unreadable_storage_uses_defaults() {
        let store = ProfileStore::open(FailingStorage, DEFAULT_STORAGE_KEY);
        assert_eq!(store.get(), &UserProfile::default());
    }

    #[test]
    fn open_restores_camel_case_blob() {
        let blob = r#"{
            "name": "Alice",
            "gameId": 3,
            "userId": "11",
            "affiliations": {"5": {"affiliationId": 8, "partyId": 2}},
            "votes": {"40": "yes"},
            "isAdmin": false,
            "gameCode": "ABCD"
        }"#;
        let store = ProfileStore::open(
            MemoryStorage::with_blob(DEFAULT_STORAGE_KEY, blob),
            DEFAULT_STORAGE_KEY,
        );
        let profile = store.get();
        assert_eq!(profile.name, "Alice");
        assert_eq!(profile.game_id, Some(Id::from("3")));
        assert_eq!(
            profile.affiliation_for(Some(&Id::from("5"))),
            Some(&Affiliation {
                affiliation_id: Id::from("8"),
                party_id: Id::from("2"),
            })
        );
        assert!(profile.has_voted(Some(&Id::from("40"))));
        assert_eq!(profile.event_rewards, EventRewards::default());
        assert!(profile.party_event_rewards.is_none());
    }

    #[test]
    fn set_user_data_merges_and_persists() {
        let storage = SharedStorage::default();
        let mut store = ProfileStore::open(storage.clone(), DEFAULT_STORAGE_KEY);

        store
            .set_user_data(ProfileUpdate::join_game("g1", "CODE"))
            .unwrap();
        store
            .set_user_data(ProfileUpdate::register("Bob", "u1"))
            .unwrap();

        let profile = store.get();
        assert_eq!(profile.game_id, Some(Id::from("g1")));
        assert_eq!(profile.game_code, "CODE");
        assert_eq!(profile.name, "Bob");
        assert_eq!(profile.user_id, Some(Id::from("u1")));
        assert_eq!(&stored(&storage), profile);
    }

    #[test]
    fn set_user_data_can_clear_optional_fields() {
        let mut store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        store
            .set_user_data(ProfileUpdate::join_game("g1", "CODE"))
            .unwrap();
        store
            .set_user_data(ProfileUpdate {
                game_id: Some(None),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.get().game_id, None);
        assert_eq!(store.get().game_code, "CODE");
    }

    #[test]
    fn failed_persist_still_updates_memory() {
        let mut store = ProfileStore::open(FailingStorage, DEFAULT_STORAGE_KEY);
        let result = store.set_user_data(ProfileUpdate::register("Eve", "u9"));
        assert!(result.is_err());
        assert_eq!(store.get().name, "Eve");
    }

    #[test]
    fn clear_user_data_restores_every_default() {
        let storage = SharedStorage::default();
        let mut store = ProfileStore::open(storage.clone(), DEFAULT_STORAGE_KEY);
        store
            .set_user_data(ProfileUpdate {
                name: Some("Carol".into()),
                game_id: Some(Some(Id::from("g"))),
                user_id: Some(Some(Id::from("u"))),
                is_admin: Some(true),
                game_code: Some("XYZ".into()),
                extra_info: Some(Some(serde_json::json!({"bio": "x"}))),
                party_extra_info: Some(Some(serde_json::json!({"motto": "y"}))),
                event_rewards: Some(EventRewards {
                    accepted: 3,
                    rejected: 1,
                }),
                party_event_rewards: Some(Some(EventRewards {
                    accepted: 2,
                    rejected: 2,
                })),
                ..Default::default()
            })
            .unwrap();
        store
            .record_affiliation(
                Id::from("r1"),
                Affiliation {
                    affiliation_id: Id::from("a1"),
                    party_id: Id::from("p1"),
                },
            )
            .unwrap();
        store.record_vote(Id::from("e1"), "yes").unwrap();

        store.clear_user_data().unwrap();

        assert_eq!(store.get(), &UserProfile::default());
        assert_eq!(stored(&storage), UserProfile::default());
    }

    #[test]
    fn record_affiliation_keeps_one_per_round() {
        let mut store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        let first = Affiliation {
            affiliation_id: Id::from("a1"),
            party_id: Id::from("p1"),
        };
        let second = Affiliation {
            affiliation_id: Id::from("a2"),
            party_id: Id::from("p2"),
        };
        store.record_affiliation(Id::from("r1"), first).unwrap();
        store
            .record_affiliation(Id::from("r1"), second.clone())
            .unwrap();

        let profile = store.get();
        assert_eq!(profile.affiliations.len(), 1);
        assert_eq!(profile.affiliation_for(Some(&Id::from("r1"))), Some(&second));
        assert_eq!(profile.rounds, vec![Id::from("r1")]);
    }

    #[test]
    fn has_voted_requires_an_event() {
        let mut store = ProfileStore::open(MemoryStorage::new(), DEFAULT_STORAGE_KEY);
        store.record_vote(Id::from("e1"), "no").unwrap();
        assert!(store.get().has_voted(Some(&Id::from("e1"))));
        assert!(!store.get().has_voted(Some(&Id::from("e2"))));
        assert!(!store.get().has_voted(None));
    }

    #[test]
    fn file_storage_round_trips_profile() {
        let dir = TempDir::new("fairmocracy-profile").unwrap();
        let storage = FileStorage::new(dir.path().join("profiles"));
        assert!(storage.load("missing").unwrap().is_none());

        let mut store = ProfileStore::open(storage.clone(), "player");
        store
            .set_user_data(ProfileUpdate::register("Dana", "u4"))
            .unwrap();

        let reopened = ProfileStore::open(storage, "player");
        assert_eq!(reopened.get().name, "Dana");
        assert_eq!(reopened.get().user_id, Some(Id::from("u4")));
        assert!(!dir.path().join("profiles/player.json.tmp").exists());
    }
}
