//! Auxiliary info fetching: personal info, party info and event rewards.
//!
//! The fetcher is split into a synchronous planner, [`AuxInfoFetcher`], which
//! owns the de-duplication keys and in-flight guards, and [`execute`], which
//! performs one planned request against an [`InfoApi`]. The sync loop runs
//! `execute` on a spawned task and hands the resulting [`FetchOutcome`] back
//! to [`AuxInfoFetcher::complete`], so every guard is only ever touched from
//! the loop.
//!
//! A request is keyed by `(user id, voting event id, affiliation id)` and is
//! issued at most once per key: again only after the key changes, and never
//! while an earlier request for the same resource is still outstanding.
//! Event rewards are read from the mirror's reward tables, so they need no
//! request at all.

use tracing::{debug, warn};

use crate::api::InfoApi;
use crate::error::Result;
use crate::game_state::GameStateMirror;
use crate::profile::{Affiliation, EventRewards, ProfileUpdate, UserProfile};
use crate::protocol::{Id, PartyInfo, UserInfo};

/// The state a fetched resource belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub user_id: Id,
    pub event_id: Id,
    pub affiliation_id: Id,
}

impl FetchKey {
    /// Key for the current state, or `None` when the player has no user id,
    /// no event is active, or the player has no affiliation for the round.
    pub fn current(profile: &UserProfile, mirror: &GameStateMirror) -> Option<Self> {
        let affiliation = profile.affiliation_for(mirror.current_round_id.as_ref())?;
        Some(Self {
            user_id: profile.user_id.clone()?,
            event_id: mirror.current_voting_event_id.clone()?,
            affiliation_id: affiliation.affiliation_id.clone(),
        })
    }
}

/// A request the planner decided to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    /// `GET /v1/user/{userId}`.
    UserInfo { key: FetchKey },
    /// `GET /game/{gameId}/parties`, looking for `party_id`.
    PartyInfo {
        key: FetchKey,
        game_id: Id,
        party_id: Id,
    },
}

/// The result of an executed [`FetchRequest`].
#[derive(Debug)]
pub enum FetchOutcome {
    UserInfo {
        key: FetchKey,
        result: Result<UserInfo>,
    },
    PartyInfo {
        key: FetchKey,
        party_id: Id,
        result: Result<Vec<PartyInfo>>,
    },
}

impl FetchOutcome {
    /// The key the request was issued for.
    pub fn key(&self) -> &FetchKey {
        match self {
            Self::UserInfo { key, .. } | Self::PartyInfo { key, .. } => key,
        }
    }

    /// Whether the request succeeded.
    pub fn succeeded(&self) -> bool {
        match self {
            Self::UserInfo { result, .. } => result.is_ok(),
            Self::PartyInfo { result, .. } => result.is_ok(),
        }
    }
}

/// What a planning pass decided.
#[derive(Debug, Default)]
pub struct FetchPlan {
    /// Requests to execute.
    pub requests: Vec<FetchRequest>,
    /// Reward figures to merge into the profile, if they changed.
    pub rewards: Option<ProfileUpdate>,
}

/// De-duplication state of one fetched resource.
#[derive(Debug, Default)]
struct Guard {
    in_flight: Option<FetchKey>,
    fetched_for: Option<FetchKey>,
}

impl Guard {
    fn should_fetch(&self, key: &FetchKey) -> bool {
        self.in_flight.is_none() && self.fetched_for.as_ref() != Some(key)
    }

    /// Clear the in-flight marker if it belongs to `key`.
    fn land(&mut self, key: &FetchKey) {
        if self.in_flight.as_ref() == Some(key) {
            self.in_flight = None;
        }
    }
}

/// Plans auxiliary fetches and folds their results into profile updates.
#[derive(Debug, Default)]
pub struct AuxInfoFetcher {
    last_user_id: Option<Id>,
    user_info: Guard,
    party_info: Guard,
}

impl AuxInfoFetcher {
    /// Create a fetcher with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which requests to issue for the current state.
    pub fn plan(&mut self, profile: &UserProfile, mirror: &GameStateMirror) -> FetchPlan {
        if profile.user_id != self.last_user_id {
            // Nothing fetched for the previous user is valid any more.
            self.user_info.fetched_for = None;
            self.party_info.fetched_for = None;
            self.last_user_id = profile.user_id.clone();
        }

        let affiliation = profile.affiliation_for(mirror.current_round_id.as_ref());
        let mut plan = FetchPlan {
            requests: Vec::new(),
            rewards: reward_update(profile, mirror, affiliation),
        };

        let Some(key) = FetchKey::current(profile, mirror) else {
            self.user_info.in_flight = None;
            self.party_info.in_flight = None;
            return plan;
        };

        if self.user_info.should_fetch(&key) {
            self.user_info.in_flight = Some(key.clone());
            plan.requests.push(FetchRequest::UserInfo { key: key.clone() });
        }

        if let (Some(game_id), Some(affiliation)) = (profile.game_id.clone(), affiliation) {
            if self.party_info.should_fetch(&key) {
                self.party_info.in_flight = Some(key.clone());
                plan.requests.push(FetchRequest::PartyInfo {
                    key,
                    game_id,
                    party_id: affiliation.party_id.clone(),
                });
            }
        }

        plan
    }

    /// Fold a finished request into a profile update.
    ///
    /// Failures are logged and leave the profile untouched. Results fetched
    /// for a user other than the current one are discarded.
    pub fn complete(
        &mut self,
        outcome: FetchOutcome,
        profile: &UserProfile,
    ) -> Option<ProfileUpdate> {
        match outcome {
            FetchOutcome::UserInfo { key, result } => {
                self.user_info.land(&key);
                if profile.user_id.as_ref() != Some(&key.user_id) {
                    debug!(user_id = %key.user_id, "discarding user info for previous user");
                    return None;
                }
                match result {
                    Ok(info) => {
                        self.user_info.fetched_for = Some(key);
                        Some(ProfileUpdate {
                            extra_info: Some(Some(info.extra_info)),
                            ..Default::default()
                        })
                    }
                    Err(e) => {
                        warn!(user_id = %key.user_id, "failed to fetch user info: {e}");
                        None
                    }
                }
            }
            FetchOutcome::PartyInfo {
                key,
                party_id,
                result,
            } => {
                self.party_info.land(&key);
                if profile.user_id.as_ref() != Some(&key.user_id) {
                    debug!(user_id = %key.user_id, "discarding party info for previous user");
                    return None;
                }
                match result {
                    Ok(parties) => {
                        self.party_info.fetched_for = Some(key);
                        match parties.into_iter().find(|party| party.id == party_id) {
                            Some(party) => Some(ProfileUpdate {
                                party_extra_info: Some(Some(party.extra_info)),
                                ..Default::default()
                            }),
                            None => {
                                debug!(party_id = %party_id, "affiliated party not in party list");
                                None
                            }
                        }
                    }
                    Err(e) => {
                        warn!(party_id = %party_id, "failed to fetch party info: {e}");
                        None
                    }
                }
            }
        }
    }

    /// Forget every key and in-flight marker.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether a request for the user's personal info is outstanding.
    pub fn user_info_in_flight(&self) -> bool {
        self.user_info.in_flight.is_some()
    }

    /// Whether a request for the party list is outstanding.
    pub fn party_info_in_flight(&self) -> bool {
        self.party_info.in_flight.is_some()
    }
}

/// Reward figures from the mirror's table for the active voting system.
///
/// Returns `None` when there is no user, no decodable table, or the figures
/// already match the profile.
fn reward_update(
    profile: &UserProfile,
    mirror: &GameStateMirror,
    affiliation: Option<&Affiliation>,
) -> Option<ProfileUpdate> {
    let user_id = profile.user_id.as_ref()?;
    let table = mirror.reward_table()?;

    let voter = EventRewards {
        accepted: table.accepted.voters.get(user_id).copied().unwrap_or(0),
        rejected: table.rejected.voters.get(user_id).copied().unwrap_or(0),
    };
    let party = affiliation.map(|affiliation| EventRewards {
        accepted: table
            .accepted
            .parties
            .get(&affiliation.party_id)
            .copied()
            .unwrap_or(0),
        rejected: table
            .rejected
            .parties
            .get(&affiliation.party_id)
            .copied()
            .unwrap_or(0),
    });

    if profile.event_rewards == voter && profile.party_event_rewards == party {
        return None;
    }
    Some(ProfileUpdate {
        event_rewards: Some(voter),
        party_event_rewards: Some(party),
        ..Default::default()
    })
}

/// Execute one planned request.
pub async fn execute<A: InfoApi + ?Sized>(api: &A, request: FetchRequest) -> FetchOutcome {
    match request {
        FetchRequest::UserInfo { key } => {
            let result = api.user_info(&key.user_id).await;
            FetchOutcome::UserInfo { key, result }
        }
        FetchRequest::PartyInfo {
            key,
            game_id,
            party_id,
        } => {
            let result = api.parties(&game_id).await;
            FetchOutcome::PartyInfo {
                key,
                party_id,
                result,
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
    use crate::error::SyncError;
    use crate::protocol::{GameSnapshot, VotingState};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    fn profile() -> UserProfile {
        let mut profile = UserProfile {
            game_id: Some(id("g")),
            user_id: Some(id("u1")),
            ..Default::default()
        };
        profile.affiliations.insert(
            id("r1"),
            Affiliation {
                affiliation_id: id("a1"),
                party_id: id("p1"),
            },
        );
        profile
    }

    fn mirror(event: &str) -> GameStateMirror {
        let mut mirror = GameStateMirror::default();
        mirror.apply(
            GameSnapshot::for_game("g")
                .with_round(Some(id("r1")))
                .with_event(Some(id(event))),
        );
        mirror
    }

    fn user_key(plan: &FetchPlan) -> FetchKey {
        plan.requests
            .iter()
            .find_map(|request| match request {
                FetchRequest::UserInfo { key } => Some(key.clone()),
                FetchRequest::PartyInfo { .. } => None,
            })
            .unwrap()
    }

    fn party_key(plan: &FetchPlan) -> FetchKey {
        plan.requests
            .iter()
            .find_map(|request| match request {
                FetchRequest::PartyInfo { key, .. } => Some(key.clone()),
                FetchRequest::UserInfo { .. } => None,
            })
            .unwrap()
    }

    #[test]
    fn plans_both_requests_for_new_key() {
        let mut fetcher = AuxInfoFetcher::new();
        let plan = fetcher.plan(&profile(), &mirror("e1"));

        assert_eq!(plan.requests.len(), 2);
        assert!(plan.requests.contains(&FetchRequest::PartyInfo {
            key: FetchKey {
                user_id: id("u1"),
                event_id: id("e1"),
                affiliation_id: id("a1"),
            },
            game_id: id("g"),
            party_id: id("p1"),
        }));
        assert!(fetcher.user_info_in_flight());
        assert!(fetcher.party_info_in_flight());
    }

    #[test]
    fn second_plan_with_same_key_issues_nothing() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let mirror = mirror("e1");

        let first = fetcher.plan(&profile, &mirror);
        let second = fetcher.plan(&profile, &mirror);
        assert_eq!(first.requests.len(), 2);
        assert!(second.requests.is_empty());
    }

    #[test]
    fn completed_key_is_not_refetched() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let mirror = mirror("e1");

        let plan = fetcher.plan(&profile, &mirror);
        let update = fetcher.complete(
            FetchOutcome::UserInfo {
                key: user_key(&plan),
                result: Ok(UserInfo {
                    extra_info: serde_json::json!({"secret": 1}),
                }),
            },
            &profile,
        );
        assert_eq!(
            update.unwrap().extra_info,
            Some(Some(serde_json::json!({"secret": 1})))
        );
        assert!(!fetcher.user_info_in_flight());

        let again = fetcher.plan(&profile, &mirror);
        assert!(again.requests.is_empty());
    }

    #[test]
    fn new_event_triggers_refetch_after_completion() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();

        let plan = fetcher.plan(&profile, &mirror("e1"));
        fetcher.complete(
            FetchOutcome::UserInfo {
                key: user_key(&plan),
                result: Ok(UserInfo::default()),
            },
            &profile,
        );

        let next = fetcher.plan(&profile, &mirror("e2"));
        assert_eq!(user_key(&next).event_id, id("e2"));
    }

    #[test]
    fn in_flight_request_blocks_new_key_until_it_lands() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();

        let first = fetcher.plan(&profile, &mirror("e1"));
        let blocked = fetcher.plan(&profile, &mirror("e2"));
        assert!(blocked.requests.is_empty());

        fetcher.complete(
            FetchOutcome::UserInfo {
                key: user_key(&first),
                result: Ok(UserInfo::default()),
            },
            &profile,
        );
        let next = fetcher.plan(&profile, &mirror("e2"));
        assert_eq!(user_key(&next).event_id, id("e2"));
    }

    #[test]
    fn failed_fetch_is_retried_on_next_plan() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let mirror = mirror("e1");

        let plan = fetcher.plan(&profile, &mirror);
        let update = fetcher.complete(
            FetchOutcome::PartyInfo {
                key: party_key(&plan),
                party_id: id("p1"),
                result: Err(SyncError::Timeout),
            },
            &profile,
        );
        assert!(update.is_none());
        assert!(!fetcher.party_info_in_flight());

        let retry = fetcher.plan(&profile, &mirror);
        assert_eq!(party_key(&retry).event_id, id("e1"));
    }

    #[test]
    fn party_info_picks_affiliated_party() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let plan = fetcher.plan(&profile, &mirror("e1"));

        let parties: Vec<PartyInfo> = serde_json::from_str(
            r#"[{"id": "p0", "extra_info": "no"}, {"id": "p1", "extra_info": {"motto": "yes"}}]"#,
        )
        .unwrap();
        let update = fetcher
            .complete(
                FetchOutcome::PartyInfo {
                    key: party_key(&plan),
                    party_id: id("p1"),
                    result: Ok(parties),
                },
                &profile,
            )
            .unwrap();
        assert_eq!(
            update.party_extra_info,
            Some(Some(serde_json::json!({"motto": "yes"})))
        );
    }

    #[test]
    fn missing_party_is_ignored() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let plan = fetcher.plan(&profile, &mirror("e1"));

        let update = fetcher.complete(
            FetchOutcome::PartyInfo {
                key: party_key(&plan),
                party_id: id("p1"),
                result: Ok(Vec::new()),
            },
            &profile,
        );
        assert!(update.is_none());
    }

    #[test]
    fn incomplete_key_fails_fast_and_clears_guards() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        fetcher.plan(&profile, &mirror("e1"));
        assert!(fetcher.user_info_in_flight());

        let mut no_event = mirror("e1");
        no_event.apply(GameSnapshot::for_game("g").with_event(None));
        let plan = fetcher.plan(&profile, &no_event);

        assert!(plan.requests.is_empty());
        assert!(!fetcher.user_info_in_flight());
        assert!(!fetcher.party_info_in_flight());
    }

    #[test]
    fn user_switch_invalidates_cached_keys() {
        let mut fetcher = AuxInfoFetcher::new();
        let first_user = profile();
        let mirror = mirror("e1");

        let plan = fetcher.plan(&first_user, &mirror);
        fetcher.complete(
            FetchOutcome::UserInfo {
                key: user_key(&plan),
                result: Ok(UserInfo::default()),
            },
            &first_user,
        );

        let mut second_user = first_user.clone();
        second_user.user_id = Some(id("u2"));
        let next = fetcher.plan(&second_user, &mirror);
        assert_eq!(user_key(&next).user_id, id("u2"));
    }

    #[test]
    fn result_for_previous_user_is_discarded() {
        let mut fetcher = AuxInfoFetcher::new();
        let first_user = profile();
        let plan = fetcher.plan(&first_user, &mirror("e1"));

        let mut second_user = first_user.clone();
        second_user.user_id = Some(id("u2"));
        let update = fetcher.complete(
            FetchOutcome::UserInfo {
                key: user_key(&plan),
                result: Ok(UserInfo::default()),
            },
            &second_user,
        );
        assert!(update.is_none());
        assert!(!fetcher.user_info_in_flight());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let mirror = mirror("e1");
        fetcher.plan(&profile, &mirror);

        fetcher.reset();
        assert!(!fetcher.user_info_in_flight());
        assert!(!fetcher.party_info_in_flight());
        assert_eq!(fetcher.plan(&profile, &mirror).requests.len(), 2);
    }

    #[test]
    fn rewards_are_read_from_mirror_table() {
        let mut fetcher = AuxInfoFetcher::new();
        let mut profile = profile();
        let mut mirror = mirror("e1");
        let mut extra = HashMap::new();
        extra.insert(
            "MAJORITY_WITH_REWARD".to_owned(),
            serde_json::json!({
                "ACCEPTED": {"voters": {"u1": 4}, "parties": {"p1": 10}},
                "REJECTED": {"voters": {"u9": 1}}
            }),
        );
        mirror.apply(
            GameSnapshot::for_game("g")
                .with_voting_system("MAJORITY_WITH_REWARD")
                .with_extra_info(extra),
        );

        let rewards = fetcher.plan(&profile, &mirror).rewards.unwrap();
        assert_eq!(
            rewards.event_rewards,
            Some(EventRewards {
                accepted: 4,
                rejected: 0
            })
        );
        assert_eq!(
            rewards.party_event_rewards,
            Some(Some(EventRewards {
                accepted: 10,
                rejected: 0
            }))
        );

        profile.event_rewards = EventRewards {
            accepted: 4,
            rejected: 0,
        };
        profile.party_event_rewards = Some(EventRewards {
            accepted: 10,
            rejected: 0,
        });
        assert!(fetcher.plan(&profile, &mirror).rewards.is_none());
    }

    #[test]
    fn no_rewards_without_table() {
        let mut fetcher = AuxInfoFetcher::new();
        assert!(fetcher.plan(&profile(), &mirror("e1")).rewards.is_none());
    }

    struct StaticApi;

    #[async_trait]
    impl InfoApi for StaticApi {
        async fn user_info(&self, user_id: &Id) -> Result<UserInfo> {
            Ok(UserInfo {
                extra_info: serde_json::json!({ "for": user_id.as_str() }),
            })
        }

        async fn parties(&self, _game_id: &Id) -> Result<Vec<PartyInfo>> {
            Err(SyncError::HttpStatus {
                status: 500,
                url: "/game/g/parties".into(),
            })
        }

        async fn voting_state(&self, _game_id: &Id) -> Result<VotingState> {
            Ok(VotingState::default())
        }
    }

    #[tokio::test]
    async fn execute_runs_planned_requests() {
        let mut fetcher = AuxInfoFetcher::new();
        let profile = profile();
        let plan = fetcher.plan(&profile, &mirror("e1"));

        let mut updates = Vec::new();
        for request in plan.requests {
            let outcome = execute(&StaticApi, request).await;
            updates.push(fetcher.complete(outcome, &profile));
        }

        assert_eq!(updates.len(), 2);
        assert!(updates.iter().any(|u| u
            .as_ref()
            .is_some_and(|u| u.extra_info == Some(Some(serde_json::json!({"for": "u1"}))))));
        assert!(!fetcher.user_info_in_flight());
        assert!(!fetcher.party_info_in_flight());
    }
}
