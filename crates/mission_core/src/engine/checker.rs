//! Mission availability checker.
//!
//! # Responsibility
//! - Derive each mission's live status and quota numbers at a target time.
//! - Run post-checks after the whole batch has a first-pass status.
//!
//! # Invariants
//! - Only missions persisted as OPEN get a live status.
//! - Missions outside their absolute bounds, or with no section or active
//!   window at the target time, are INACTIVE without running rules.
//! - Post-checks run once per registration and never nest.

use crate::auth::{Action, Capabilities};
use crate::engine::aggregator::{ActorScope, CompletionCounts};
use crate::engine::working_set::WorkingSet;
use crate::error::MissionResult;
use crate::interval::{resolve_window, IntervalResolver, Window};
use crate::model::complete::UserId;
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::MissionRepository;
use crate::rules::{Flow, MissionRules, PostCheck};
use chrono::{DateTime, Utc};

/// Read-only inputs shared by every prerequisite call in one pass.
pub struct CheckEnv<'a> {
    pub repo: &'a dyn MissionRepository,
    pub intervals: &'a dyn IntervalResolver,
    pub caps: &'a dyn Capabilities,
    pub target_time: DateTime<Utc>,
    /// Missions of the batch. While a mission is checked it is taken out.
    pub working: &'a WorkingSet,
    pub counts: &'a CompletionCounts,
}

impl CheckEnv<'_> {
    pub fn uid(&self) -> UserId {
        self.caps.uid()
    }

    pub fn scope(&self, global: bool) -> ActorScope {
        if global {
            ActorScope::Global
        } else {
            ActorScope::User(self.uid())
        }
    }

    /// Whether the caller may complete missions, which gates live counting.
    pub fn can_complete(&self) -> bool {
        self.caps.check_action(&[Action::CompleteMission])
    }

    /// Section window of `mission` at the target time.
    pub fn section_window(&self, mission: &Mission) -> MissionResult<Option<Window>> {
        Ok(resolve_window(
            self.intervals,
            mission.section_interval.as_deref(),
            self.target_time,
        )?)
    }
}

/// Checks one mission against its compiled rules.
///
/// Post-check registrations are appended to `post_checks` as
/// `(mission, prerequisite index)`.
pub fn check_mission(
    mission: &mut Mission,
    rules: &MissionRules,
    env: &CheckEnv<'_>,
    post_checks: &mut Vec<(MissionId, usize)>,
) -> MissionResult<()> {
    if mission.status.persisted() != MissionStatus::Open {
        return Ok(());
    }
    mission.status = MissionStatus::Open;
    mission.reset_live();

    if !mission.within_bounds(env.target_time) {
        mission.status = MissionStatus::Inactive;
        return Ok(());
    }
    if env.section_window(mission)?.is_none() {
        mission.status = MissionStatus::Inactive;
        return Ok(());
    }
    let active = resolve_window(
        env.intervals,
        mission.active_interval.as_deref(),
        env.target_time,
    )?;
    if active.is_none() {
        mission.status = MissionStatus::Inactive;
        return Ok(());
    }

    for (index, prerequisite) in rules.prerequisites.iter().enumerate() {
        let mut post = PostCheck::default();
        let flow = prerequisite.check(mission, env, &mut post)?;
        if post.is_requested() {
            post_checks.push((mission.id, index));
        }
        if flow == Flow::Stop {
            return Ok(());
        }
    }

    if mission.status == MissionStatus::Open {
        mission.status = MissionStatus::Active;
    }
    Ok(())
}

/// Checks every mission in `working`, then runs collected post-checks.
pub fn check_all(
    working: &mut WorkingSet,
    repo: &dyn MissionRepository,
    intervals: &dyn IntervalResolver,
    caps: &dyn Capabilities,
    target_time: DateTime<Utc>,
    counts: &CompletionCounts,
) -> MissionResult<()> {
    let mut post_checks = Vec::new();

    for id in working.ids() {
        let Some((mut mission, rules)) = working.take(id) else {
            continue;
        };
        let env = CheckEnv {
            repo,
            intervals,
            caps,
            target_time,
            working: &*working,
            counts,
        };
        let outcome = check_mission(&mut mission, &rules, &env, &mut post_checks);
        working.put_back(mission, rules);
        outcome?;
    }

    for (id, index) in post_checks {
        let Some((mut mission, rules)) = working.take(id) else {
            continue;
        };
        let env = CheckEnv {
            repo,
            intervals,
            caps,
            target_time,
            working: &*working,
            counts,
        };
        let outcome = match rules.prerequisites.get(index) {
            Some(prerequisite) => prerequisite.post_check(&mut mission, &env),
            None => Ok(()),
        };
        working.put_back(mission, rules);
        outcome?;
    }
    Ok(())
}
