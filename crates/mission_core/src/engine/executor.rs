//! Completion and revert executors.
//!
//! # Responsibility
//! - Re-check a mission authoritatively and record one completion.
//! - Undo a completion by running handler reversals in declared order.
//! - Let handlers re-enter both paths for other missions in the same
//!   transaction.
//!
//! # Invariants
//! - Failure order is NoQuota, then NotAvailable; neither writes a row.
//! - A completion defaults to FINAL unless a handler sets another status.
//! - Reverting an already reverted completion is a no-op.
//! - Nesting deeper than `max_recursion_depth` fails with `RecursionLimit`.

use crate::auth::Capabilities;
use crate::engine::working_set::WorkingSet;
use crate::engine::Engine;
use crate::error::{MissionError, MissionResult};
use crate::interval::{resolve_window, Window};
use crate::model::complete::{Complete, CompleteId, CompleteStatus, UserId};
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::{
    require_complete, require_mission, MissionRepository, SqliteMissionRepository,
};
use crate::rules::{Flow, MissionRules, RuleRegistry};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::Connection;
use serde_json::{Map, Value};

/// Handler-facing view of one running completion or revert.
pub struct ExecContext<'a> {
    engine: &'a Engine,
    conn: &'a Connection,
    repo: SqliteMissionRepository<'a>,
    caps: &'a dyn Capabilities,
    depth: u32,
    target_time: DateTime<Utc>,
    input: &'a Map<String, Value>,
    working: &'a WorkingSet,
}

impl<'a> ExecContext<'a> {
    pub fn repo(&self) -> &dyn MissionRepository {
        &self.repo
    }

    /// Connection of the enclosing transaction.
    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    pub fn caps(&self) -> &dyn Capabilities {
        self.caps
    }

    pub fn uid(&self) -> UserId {
        self.caps.uid()
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.engine.registry()
    }

    /// Completion time, or the reverted completion's time during reversal.
    pub fn target_time(&self) -> DateTime<Utc> {
        self.target_time
    }

    /// Whole submitted payload.
    pub fn input(&self) -> &Map<String, Value> {
        self.input
    }

    /// Payload addressed to one handler.
    pub fn input_for(&self, handler_id: &str) -> Option<&Value> {
        self.input.get(handler_id)
    }

    /// Missions checked together with the one being completed.
    pub fn working(&self) -> &WorkingSet {
        self.working
    }

    pub fn section_window(&self, mission: &Mission) -> MissionResult<Option<Window>> {
        self.section_window_at(mission, self.target_time)
    }

    pub fn section_window_at(
        &self,
        mission: &Mission,
        at: DateTime<Utc>,
    ) -> MissionResult<Option<Window>> {
        Ok(resolve_window(
            self.engine.intervals(),
            mission.section_interval.as_deref(),
            at,
        )?)
    }

    /// Completes another mission inside the current transaction.
    pub fn complete_other(
        &self,
        mission_id: MissionId,
        input: &Map<String, Value>,
        at: DateTime<Utc>,
    ) -> MissionResult<Complete> {
        self.engine
            .complete_in(self.conn, self.caps, mission_id, input, at, self.depth + 1)
    }

    /// Reverts another completion inside the current transaction.
    pub fn revert_other(&self, complete_id: CompleteId) -> MissionResult<()> {
        self.engine
            .revert_in(self.conn, self.caps, complete_id, self.depth + 1)
    }

    /// Runs another completion's handler chain again and persists it.
    pub fn rerun(&self, complete: &mut Complete) -> MissionResult<()> {
        self.engine
            .rerun_in(self.conn, self.caps, complete, self.depth + 1)
    }
}

impl Engine {
    fn guard_depth(&self, depth: u32) -> MissionResult<()> {
        let limit = self.config().max_recursion_depth;
        if depth > limit {
            return Err(MissionError::RecursionLimit(limit));
        }
        Ok(())
    }

    /// Records one completion of `mission_id` by the caller at `at`.
    pub fn complete_in(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        mission_id: MissionId,
        input: &Map<String, Value>,
        at: DateTime<Utc>,
        depth: u32,
    ) -> MissionResult<Complete> {
        self.guard_depth(depth)?;
        let repo = SqliteMissionRepository::new(conn);

        let mut working = WorkingSet::load(&repo, self.registry(), &[mission_id])?;
        if !working.contains(mission_id) {
            return Err(MissionError::MissionNotFound(mission_id));
        }
        self.evaluate(&repo, &mut working, caps, at)?;

        let (Some(mut mission), Some(rules)) =
            (working.get(mission_id).cloned(), working.rules(mission_id))
        else {
            return Err(MissionError::MissionNotFound(mission_id));
        };
        if mission.quota_exhausted() {
            return Err(MissionError::NoQuota(mission_id));
        }
        if mission.status != MissionStatus::Active {
            return Err(MissionError::NotAvailable(mission_id));
        }

        let section = resolve_window(self.intervals(), mission.section_interval.as_deref(), at)?
            .ok_or(MissionError::NotAvailable(mission_id))?;
        let mut complete = Complete::new(caps.uid(), mission_id, section.label(), at);
        complete.id = repo.create_complete(&complete)?;
        complete.status = CompleteStatus::Final;

        let ctx = ExecContext {
            engine: self,
            conn,
            repo: SqliteMissionRepository::new(conn),
            caps,
            depth,
            target_time: at,
            input,
            working: &working,
        };
        run_completions(&rules, &ctx, &mut mission, &mut complete)?;

        repo.update_complete(&complete)?;
        repo.update_mission_status(mission_id, mission.status.persisted())?;
        debug!(
            "event=complete_apply module=engine status=ok mission_id={} complete_id={} complete_status={} depth={}",
            mission_id,
            complete.id,
            complete.status.as_db_str(),
            depth
        );
        Ok(complete)
    }

    /// Reverts one completion. Already reverted completions are left as is.
    pub fn revert_in(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        complete_id: CompleteId,
        depth: u32,
    ) -> MissionResult<()> {
        self.guard_depth(depth)?;
        let repo = SqliteMissionRepository::new(conn);

        let mut complete = require_complete(&repo, complete_id)?;
        if complete.status == CompleteStatus::Revert {
            debug!(
                "event=revert_apply module=engine status=skip complete_id={} reason=already_reverted",
                complete_id
            );
            return Ok(());
        }
        let mut mission = require_mission(&repo, complete.mission_id)?;
        let working = WorkingSet::load(&repo, self.registry(), &[mission.id])?;
        let rules = working
            .rules(mission.id)
            .ok_or(MissionError::MissionNotFound(mission.id))?;

        let input = Map::new();
        let ctx = ExecContext {
            engine: self,
            conn,
            repo: SqliteMissionRepository::new(conn),
            caps,
            depth,
            target_time: complete.complete_time,
            input: &input,
            working: &working,
        };
        for handler in &rules.completions {
            if handler.revert(&ctx, &mut mission, &mut complete)? == Flow::Stop {
                break;
            }
        }

        complete.status = CompleteStatus::Revert;
        repo.update_complete(&complete)?;
        repo.update_mission_status(mission.id, mission.status.persisted())?;
        debug!(
            "event=revert_apply module=engine status=ok mission_id={} complete_id={} depth={}",
            mission.id, complete_id, depth
        );
        Ok(())
    }

    /// Re-runs a stored completion's handler chain with its recorded results
    /// as input.
    pub fn rerun_in(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        complete: &mut Complete,
        depth: u32,
    ) -> MissionResult<()> {
        self.guard_depth(depth)?;
        let repo = SqliteMissionRepository::new(conn);

        let mut mission = require_mission(&repo, complete.mission_id)?;
        let working = WorkingSet::load(&repo, self.registry(), &[mission.id])?;
        let rules = working
            .rules(mission.id)
            .ok_or(MissionError::MissionNotFound(mission.id))?;

        let input = complete.result.clone();
        complete.status = CompleteStatus::Final;
        let ctx = ExecContext {
            engine: self,
            conn,
            repo: SqliteMissionRepository::new(conn),
            caps,
            depth,
            target_time: complete.complete_time,
            input: &input,
            working: &working,
        };
        run_completions(&rules, &ctx, &mut mission, complete)?;

        repo.update_complete(complete)?;
        repo.update_mission_status(mission.id, mission.status.persisted())?;
        debug!(
            "event=complete_rerun module=engine status=ok mission_id={} complete_id={} complete_status={}",
            mission.id,
            complete.id,
            complete.status.as_db_str()
        );
        Ok(())
    }
}

fn run_completions(
    rules: &MissionRules,
    ctx: &ExecContext<'_>,
    mission: &mut Mission,
    complete: &mut Complete,
) -> MissionResult<()> {
    for handler in &rules.completions {
        if handler.complete(ctx, mission, complete)? == Flow::Stop {
            break;
        }
    }
    Ok(())
}
