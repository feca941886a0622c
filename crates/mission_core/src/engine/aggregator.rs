//! Completion aggregator.
//!
//! # Responsibility
//! - Collect the completion rows every prerequisite in a batch needs.
//! - Fetch them with one query per actor scope.
//!
//! # Invariants
//! - Target times resolve to the owning mission's section window; a time in
//!   no window adds no constraint.
//! - Windows are start-inclusive and end-exclusive.

use crate::engine::working_set::WorkingSet;
use crate::error::MissionResult;
use crate::interval::{resolve_window, IntervalResolver, Window};
use crate::model::complete::{CompleteStatus, UserId};
use crate::model::mission::MissionId;
use crate::repo::mission_repo::{CompletionTimeQuery, MissionRepository};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Whose completions are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorScope {
    User(UserId),
    /// All users.
    Global,
}

impl ActorScope {
    fn uid(self) -> Option<UserId> {
        match self {
            Self::User(uid) => Some(uid),
            Self::Global => None,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ScopeRequest {
    statuses: BTreeSet<CompleteStatus>,
    targets: BTreeMap<MissionId, BTreeSet<DateTime<Utc>>>,
}

/// Union of count requirements registered by prerequisites.
#[derive(Debug, Default, Clone)]
pub struct CountRequest {
    scopes: BTreeMap<ActorScope, ScopeRequest>,
}

impl CountRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for `mission_id` rows with `statuses` in the section window
    /// enclosing `at`.
    pub fn require(
        &mut self,
        scope: ActorScope,
        mission_id: MissionId,
        at: DateTime<Utc>,
        statuses: &[CompleteStatus],
    ) {
        let entry = self.scopes.entry(scope).or_default();
        entry.statuses.extend(statuses.iter().copied());
        entry.targets.entry(mission_id).or_default().insert(at);
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Completion timestamps grouped by scope, mission and status.
#[derive(Debug, Default, Clone)]
pub struct CompletionCounts {
    rows: BTreeMap<ActorScope, BTreeMap<MissionId, Vec<(CompleteStatus, DateTime<Utc>)>>>,
}

impl CompletionCounts {
    fn times<'a>(
        &'a self,
        scope: ActorScope,
        mission_id: MissionId,
        statuses: &'a [CompleteStatus],
        window: &'a Window,
    ) -> impl Iterator<Item = DateTime<Utc>> + 'a {
        self.rows
            .get(&scope)
            .and_then(|missions| missions.get(&mission_id))
            .into_iter()
            .flatten()
            .filter(move |(status, at)| statuses.contains(status) && window.contains(*at))
            .map(|(_, at)| *at)
    }

    /// Number of rows matching `statuses` inside `window`.
    pub fn count(
        &self,
        scope: ActorScope,
        mission_id: MissionId,
        statuses: &[CompleteStatus],
        window: &Window,
    ) -> i64 {
        self.times(scope, mission_id, statuses, window).count() as i64
    }

    /// Latest completion time matching `statuses` inside `window`.
    pub fn latest(
        &self,
        scope: ActorScope,
        mission_id: MissionId,
        statuses: &[CompleteStatus],
        window: &Window,
    ) -> Option<DateTime<Utc>> {
        self.times(scope, mission_id, statuses, window).max()
    }
}

/// Runs the batched completion query for every scope in `request`.
pub fn aggregate(
    repo: &dyn MissionRepository,
    intervals: &dyn IntervalResolver,
    working: &WorkingSet,
    request: &CountRequest,
) -> MissionResult<CompletionCounts> {
    let mut counts = CompletionCounts::default();

    for (scope, scope_request) in &request.scopes {
        let mut clauses = Vec::new();
        for (mission_id, times) in &scope_request.targets {
            let Some(mission) = working.get(*mission_id) else {
                continue;
            };
            for at in times {
                let window =
                    resolve_window(intervals, mission.section_interval.as_deref(), *at)?;
                if let Some(window) = window {
                    if !clauses.contains(&(*mission_id, window)) {
                        clauses.push((*mission_id, window));
                    }
                }
            }
        }
        if clauses.is_empty() {
            continue;
        }

        let query = CompletionTimeQuery {
            uid: scope.uid(),
            statuses: scope_request.statuses.iter().copied().collect(),
            clauses,
        };
        let rows = repo.completion_times(&query)?;
        debug!(
            "event=aggregate module=engine status=ok scope={:?} clauses={} rows={}",
            scope,
            query.clauses.len(),
            rows.len()
        );

        let by_mission = counts.rows.entry(*scope).or_default();
        for row in rows {
            by_mission
                .entry(row.mission_id)
                .or_default()
                .push((row.status, row.complete_time));
        }
    }

    Ok(counts)
}
