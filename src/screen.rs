//! Selection of the screen shown to the player.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game_state::GameStateMirror;
use crate::profile::UserProfile;
use crate::protocol::{GameStatus, Id};

/// The screens the player can be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    /// Pick or enter a game.
    #[default]
    Select,
    /// Choose a player name.
    Register,
    /// Choose a party for the current round.
    RegisterToVote,
    /// Wait for the game to start.
    Welcome,
    /// Read about the current voting event.
    Info,
    /// Cast a vote.
    Vote,
    /// Wait for the other players to vote.
    Wait,
    /// The game is over.
    End,
}

impl Screen {
    /// The identifier used by the UI layer.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Register => "register",
            Self::RegisterToVote => "registerToVote",
            Self::Welcome => "welcome",
            Self::Info => "info",
            Self::Vote => "vote",
            Self::Wait => "wait",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the current [`Screen`] and tracks which voting event's info
/// screen has been shown.
///
/// `has_seen_info` is set by [`acknowledge_info`](Self::acknowledge_info)
/// when the player moves on from the info screen; it is cleared whenever a
/// new voting event is shown or the player drops back to an earlier screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenSelector {
    has_seen_info: bool,
    last_event_shown: Option<Id>,
}

impl ScreenSelector {
    /// Create a selector that has shown nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the player acknowledged the current event's info screen.
    pub fn has_seen_info(&self) -> bool {
        self.has_seen_info
    }

    /// The voting event whose info screen was shown last.
    pub fn last_event_shown(&self) -> Option<&Id> {
        self.last_event_shown.as_ref()
    }

    /// Record that the player moved on from the info screen.
    pub fn acknowledge_info(&mut self) {
        self.has_seen_info = true;
    }

    /// Forget the bookkeeping.
    pub fn reset(&mut self) {
        self.has_seen_info = false;
        self.last_event_shown = None;
    }

    /// Select the screen for the given profile and game state.
    pub fn select(&mut self, profile: &UserProfile, mirror: &GameStateMirror) -> Screen {
        if profile.game_id.is_none() {
            self.reset();
            return Screen::Select;
        }
        if profile.user_id.is_none() {
            self.reset();
            return Screen::Register;
        }
        if profile
            .affiliation_for(mirror.current_round_id.as_ref())
            .is_none()
        {
            self.reset();
            return Screen::RegisterToVote;
        }

        match mirror.status {
            Some(GameStatus::Waiting) => {
                self.reset();
                Screen::Welcome
            }
            Some(GameStatus::Started) => {
                let event = mirror.current_voting_event_id.as_ref();
                if event != self.last_event_shown.as_ref() {
                    self.has_seen_info = false;
                    self.last_event_shown = event.cloned();
                    Screen::Info
                } else if !self.has_seen_info {
                    Screen::Info
                } else if !profile.has_voted(event) {
                    Screen::Vote
                } else {
                    Screen::Wait
                }
            }
            Some(GameStatus::Ended) => Screen::End,
            Some(GameStatus::Unknown) | None => Screen::Select,
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
    use crate::profile::Affiliation;
    use crate::protocol::GameSnapshot;

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    fn registered_profile() -> UserProfile {
        let mut profile = UserProfile {
            game_id: Some(id("g1")),
            user_id: Some(id("u1")),
            ..Default::default()
        };
        profile.affiliations.insert(
            id("5"),
            Affiliation {
                affiliation_id: id("a1"),
                party_id: id("p1"),
            },
        );
        profile
    }

    fn mirror(status: GameStatus, event: Option<&str>) -> GameStateMirror {
        let mut mirror = GameStateMirror::default();
        mirror.apply(
            GameSnapshot::for_game("g1")
                .with_status(status)
                .with_round(Some(id("5")))
                .with_event(event.map(id)),
        );
        mirror
    }

    #[test]
    fn no_game_selects_select() {
        let mut selector = ScreenSelector::new();
        let screen = selector.select(&UserProfile::default(), &GameStateMirror::default());
        assert_eq!(screen, Screen::Select);
    }

    #[test]
    fn no_user_selects_register() {
        let mut selector = ScreenSelector::new();
        let profile = UserProfile {
            game_id: Some(id("g1")),
            ..Default::default()
        };
        assert_eq!(
            selector.select(&profile, &GameStateMirror::default()),
            Screen::Register
        );
    }

    #[test]
    fn no_affiliation_for_round_selects_register_to_vote() {
        let mut selector = ScreenSelector::new();
        let profile = UserProfile {
            game_id: Some(id("g1")),
            user_id: Some(id("u1")),
            ..Default::default()
        };
        let mirror = mirror(GameStatus::Started, Some("e1"));
        assert_eq!(selector.select(&profile, &mirror), Screen::RegisterToVote);
    }

    #[test]
    fn waiting_game_selects_welcome() {
        let mut selector = ScreenSelector::new();
        let mirror = mirror(GameStatus::Waiting, None);
        assert_eq!(
            selector.select(&registered_profile(), &mirror),
            Screen::Welcome
        );
    }

    #[test]
    fn new_event_shows_info_then_vote_then_wait() {
        let mut selector = ScreenSelector::new();
        let mut profile = registered_profile();
        let mirror = mirror(GameStatus::Started, Some("e1"));

        assert_eq!(selector.select(&profile, &mirror), Screen::Info);
        assert_eq!(selector.last_event_shown(), Some(&id("e1")));
        assert_eq!(selector.select(&profile, &mirror), Screen::Info);

        selector.acknowledge_info();
        assert_eq!(selector.select(&profile, &mirror), Screen::Vote);

        profile.votes.insert(id("e1"), "yes".into());
        assert_eq!(selector.select(&profile, &mirror), Screen::Wait);
    }

    #[test]
    fn next_event_resets_seen_info() {
        let mut selector = ScreenSelector::new();
        let profile = registered_profile();
        selector.select(&profile, &mirror(GameStatus::Started, Some("e1")));
        selector.acknowledge_info();

        let next = mirror(GameStatus::Started, Some("e2"));
        assert_eq!(selector.select(&profile, &next), Screen::Info);
        assert!(!selector.has_seen_info());
    }

    #[test]
    fn acknowledgement_before_event_is_shown_is_discarded() {
        let mut selector = ScreenSelector::new();
        selector.acknowledge_info();
        let screen = selector.select(
            &registered_profile(),
            &mirror(GameStatus::Started, Some("e1")),
        );
        assert_eq!(screen, Screen::Info);
    }

    #[test]
    fn earlier_screens_reset_bookkeeping() {
        let mut selector = ScreenSelector::new();
        let profile = registered_profile();
        selector.select(&profile, &mirror(GameStatus::Started, Some("e1")));
        selector.acknowledge_info();

        selector.select(&profile, &mirror(GameStatus::Waiting, Some("e1")));
        assert_eq!(selector, ScreenSelector::new());
    }

    #[test]
    fn ended_game_selects_end() {
        let mut selector = ScreenSelector::new();
        let mut profile = registered_profile();
        profile.votes.insert(id("e1"), "no".into());
        assert_eq!(
            selector.select(&profile, &mirror(GameStatus::Ended, Some("e1"))),
            Screen::End
        );
    }

    #[test]
    fn unknown_status_falls_back_to_select() {
        let mut selector = ScreenSelector::new();
        assert_eq!(
            selector.select(
                &registered_profile(),
                &mirror(GameStatus::Unknown, Some("e1"))
            ),
            Screen::Select
        );
    }

    #[test]
    fn selection_is_reproducible_for_fixed_inputs() {
        let profile = registered_profile();
        let mirror = mirror(GameStatus::Started, Some("e1"));

        let mut a = ScreenSelector::new();
        let mut b = ScreenSelector::new();
        for _ in 0..3 {
            assert_eq!(a.select(&profile, &mirror), b.select(&profile, &mirror));
        }
        a.acknowledge_info();
        b.acknowledge_info();
        assert_eq!(a.select(&profile, &mirror), Screen::Vote);
        assert_eq!(b.select(&profile, &mirror), Screen::Vote);
    }

    #[test]
    fn screen_identifiers_match_ui_names() {
        assert_eq!(Screen::RegisterToVote.to_string(), "registerToVote");
        assert_eq!(
            serde_json::to_string(&Screen::RegisterToVote).unwrap(),
            "\"registerToVote\""
        );
        assert_eq!(Screen::default(), Screen::Select);
    }
}
