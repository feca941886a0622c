//! Capability boundary consumed from the authorization subsystem.
//!
//! The engine never inspects roles. Callers hand in something implementing
//! [`Capabilities`], and rules ask it whether any of a set of actions is held.

use crate::model::complete::UserId;
use std::collections::BTreeSet;

/// Engine-visible actions an actor can be empowered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    ViewMission,
    CompleteMission,
    ReviewMission,
    RevertComplete,
    ManageMission,
}

impl Action {
    /// Stable string id used by external authorization configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewMission => ACTION_VIEW_MISSION,
            Self::CompleteMission => ACTION_COMPLETE_MISSION,
            Self::ReviewMission => ACTION_REVIEW_MISSION,
            Self::RevertComplete => ACTION_REVERT_COMPLETE,
            Self::ManageMission => ACTION_MANAGE_MISSION,
        }
    }
}

pub const ACTION_VIEW_MISSION: &str = "mission.view";
pub const ACTION_COMPLETE_MISSION: &str = "mission.complete";
pub const ACTION_REVIEW_MISSION: &str = "mission.review";
pub const ACTION_REVERT_COMPLETE: &str = "mission.complete.revert";
pub const ACTION_MANAGE_MISSION: &str = "mission.manage";

/// Parses one action id. Ids are matched exactly, after trimming.
pub fn parse_action(value: &str) -> Option<Action> {
    match value.trim() {
        ACTION_VIEW_MISSION => Some(Action::ViewMission),
        ACTION_COMPLETE_MISSION => Some(Action::CompleteMission),
        ACTION_REVIEW_MISSION => Some(Action::ReviewMission),
        ACTION_REVERT_COMPLETE => Some(Action::RevertComplete),
        ACTION_MANAGE_MISSION => Some(Action::ManageMission),
        _ => None,
    }
}

/// Opaque capability set for one acting user.
pub trait Capabilities {
    /// Identity completions are recorded against.
    fn uid(&self) -> UserId;
    /// Returns `true` when any of `actions` is held.
    fn check_action(&self, actions: &[Action]) -> bool;
}

/// Fixed capability set, used by hosts that resolve permissions up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    uid: UserId,
    actions: BTreeSet<Action>,
}

impl CapabilitySet {
    pub fn new(uid: UserId, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            uid,
            actions: actions.into_iter().collect(),
        }
    }

    /// Builds a set from action id strings, ignoring unknown ids.
    pub fn from_action_ids<'a>(uid: UserId, ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(uid, ids.into_iter().filter_map(parse_action))
    }

    /// Actor holding view and complete rights only.
    pub fn member(uid: UserId) -> Self {
        Self::new(uid, [Action::ViewMission, Action::CompleteMission])
    }
}

impl Capabilities for CapabilitySet {
    fn uid(&self) -> UserId {
        self.uid
    }

    fn check_action(&self, actions: &[Action]) -> bool {
        actions.iter().any(|action| self.actions.contains(action))
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_action, Action, Capabilities, CapabilitySet};

    #[test]
    fn parses_known_action_ids() {
        assert_eq!(parse_action("mission.view"), Some(Action::ViewMission));
        assert_eq!(
            parse_action(" mission.complete.revert "),
            Some(Action::RevertComplete)
        );
        assert_eq!(parse_action("Mission.View"), None);
    }

    #[test]
    fn check_action_matches_any_of() {
        let caps = CapabilitySet::member(9);
        assert_eq!(caps.uid(), 9);
        assert!(caps.check_action(&[Action::ReviewMission, Action::CompleteMission]));
        assert!(!caps.check_action(&[Action::ReviewMission]));
        assert!(!caps.check_action(&[]));
    }

    #[test]
    fn from_action_ids_skips_unknown() {
        let caps = CapabilitySet::from_action_ids(1, ["mission.review", "bogus"]);
        assert!(caps.check_action(&[Action::ReviewMission]));
        assert!(!caps.check_action(&[Action::ViewMission]));
    }
}
