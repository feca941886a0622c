//! Mission use-case service.
//!
//! # Responsibility
//! - Expose listing, completion and revert entry points.
//! - Gate each entry point on the caller's capabilities.
//! - Own transaction scope for writes and log one start/outcome pair per call.
//!
//! # Invariants
//! - Completion and revert each run in one `BEGIN IMMEDIATE` transaction;
//!   any error rolls the whole call back.
//! - Listing never writes and takes no write lock.
//! - Listed quota numbers are a snapshot; only completion re-validates them.

use crate::auth::{Action, Capabilities, CapabilitySet};
use crate::config::EngineConfig;
use crate::engine::working_set::WorkingSet;
use crate::engine::Engine;
use crate::error::{MissionError, MissionResult};
use crate::interval::{CalendarIntervals, IntervalResolver};
use crate::logging::elapsed_ms;
use crate::model::complete::{Complete, CompleteId};
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::{
    require_complete, CompleteListQuery, MissionListQuery, MissionRepository,
    SqliteMissionRepository,
};
use crate::rules::{RegistryError, RuleRegistry};
use crate::service::definition_service::validate_relate_key;
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Listing criteria.
#[derive(Default)]
pub struct MissionQuery<'a> {
    /// Caller capabilities; `None` evaluates as an anonymous viewer.
    pub caps: Option<&'a dyn Capabilities>,
    /// Internal callers skip the `require_action` gate.
    pub skip_check: bool,
    /// Every pair must match the mission's correlation tags.
    pub relate_id: BTreeMap<String, String>,
    pub category_ids: Vec<i64>,
    pub kind: Option<String>,
    /// Persisted status filter.
    pub status: Option<MissionStatus>,
    pub search: Option<String>,
    /// `None` lists without live evaluation; open missions show INACTIVE.
    pub target_time: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub ids: Option<Vec<MissionId>>,
    /// Action the caller must hold to list at all.
    pub require_action: Option<Action>,
}

/// Entry point for mission listing, completion and definition management.
pub struct MissionService {
    engine: Engine,
}

impl MissionService {
    pub fn new(
        registry: Arc<RuleRegistry>,
        intervals: Arc<dyn IntervalResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: Engine::new(registry, intervals, config),
        }
    }

    /// Built-in rules, UTC calendar intervals and default limits.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        Ok(Self::new(
            Arc::new(RuleRegistry::with_builtin()?),
            Arc::new(CalendarIntervals::default()),
            EngineConfig::default(),
        ))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Lists missions and the unpaginated total.
    ///
    /// With a target time, listed missions carry their live status and quota
    /// numbers at that time.
    ///
    /// # Errors
    /// - `Unauthorized` when `require_action` is set, not skipped, and not held.
    /// - `Validation` for malformed correlation tag keys.
    pub fn get_missions(
        &self,
        conn: &Connection,
        query: &MissionQuery<'_>,
    ) -> MissionResult<(Vec<Mission>, u64)> {
        let started_at = Instant::now();
        let result = self.list_missions(conn, query);
        match &result {
            Ok((missions, total)) => info!(
                "event=mission_list module=service status=ok duration_ms={} returned={} total={} live={}",
                elapsed_ms(started_at),
                missions.len(),
                total,
                query.target_time.is_some()
            ),
            Err(err) => error!(
                "event=mission_list module=service status=error duration_ms={} error_code={} error={}",
                elapsed_ms(started_at),
                err.code(),
                err
            ),
        }
        result
    }

    fn list_missions(
        &self,
        conn: &Connection,
        query: &MissionQuery<'_>,
    ) -> MissionResult<(Vec<Mission>, u64)> {
        let anonymous = CapabilitySet::new(0, Vec::new());
        let caps: &dyn Capabilities = query.caps.unwrap_or(&anonymous);
        if !query.skip_check {
            if let Some(action) = query.require_action {
                if !caps.check_action(&[action]) {
                    return Err(MissionError::Unauthorized(action));
                }
            }
        }
        for key in query.relate_id.keys() {
            validate_relate_key(key)?;
        }

        let repo = SqliteMissionRepository::new(conn);
        let (mut missions, total) = repo.list_missions(&MissionListQuery {
            ids: query.ids.clone(),
            kind: query.kind.clone(),
            status: query.status.map(MissionStatus::persisted),
            search: query.search.clone(),
            relate_id: query.relate_id.clone(),
            category_ids: query.category_ids.clone(),
            limit: Some(self.engine.config().list_limit(query.limit)),
            offset: query.offset,
        })?;

        let Some(target_time) = query.target_time else {
            for mission in &mut missions {
                if mission.status.is_open() {
                    mission.status = MissionStatus::Inactive;
                }
            }
            return Ok((missions, total));
        };

        let registry = self.engine.registry();
        let mut working = WorkingSet::new();
        let mut in_bounds = Vec::new();
        for mission in &missions {
            if mission.within_bounds(target_time) {
                in_bounds.push(mission.id);
            }
            working.insert(registry, mission.clone())?;
        }
        working.extend_related(&repo, registry, &in_bounds)?;
        self.engine
            .evaluate(&repo, &mut working, caps, target_time)?;

        for mission in &mut missions {
            if let Some(checked) = working.get(mission.id) {
                *mission = checked.clone();
            }
            if mission.status.is_open() && mission.quota_exhausted() {
                mission.status = MissionStatus::Inactive;
            }
        }
        Ok((missions, total))
    }

    /// Completes one mission for the caller.
    ///
    /// `complete_time` defaults to now and is stored at millisecond precision.
    ///
    /// # Errors
    /// - `Unauthorized` without `Action::CompleteMission`.
    /// - `NoQuota` when the section allowance is used up.
    /// - `NotAvailable` when the mission is not ACTIVE at `complete_time`.
    /// - Handler validation and persistence errors; nothing is written then.
    pub fn complete_mission(
        &self,
        conn: &mut Connection,
        caps: &dyn Capabilities,
        mission_id: MissionId,
        input: &Map<String, Value>,
        complete_time: Option<DateTime<Utc>>,
    ) -> MissionResult<Complete> {
        let started_at = Instant::now();
        info!(
            "event=mission_complete module=service status=start mission_id={} uid={}",
            mission_id,
            caps.uid()
        );

        let result = self.complete_in_transaction(conn, caps, mission_id, input, complete_time);
        match &result {
            Ok(complete) => info!(
                "event=mission_complete module=service status=ok mission_id={} complete_id={} complete_status={} duration_ms={}",
                mission_id,
                complete.id,
                complete.status.as_db_str(),
                elapsed_ms(started_at)
            ),
            Err(err) => error!(
                "event=mission_complete module=service status=error mission_id={} duration_ms={} error_code={} error={}",
                mission_id,
                elapsed_ms(started_at),
                err.code(),
                err
            ),
        }
        result
    }

    fn complete_in_transaction(
        &self,
        conn: &mut Connection,
        caps: &dyn Capabilities,
        mission_id: MissionId,
        input: &Map<String, Value>,
        complete_time: Option<DateTime<Utc>>,
    ) -> MissionResult<Complete> {
        if !caps.check_action(&[Action::CompleteMission]) {
            return Err(MissionError::Unauthorized(Action::CompleteMission));
        }
        let at = truncate_to_millis(complete_time.unwrap_or_else(Utc::now));

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let complete = self
            .engine
            .complete_in(&tx, caps, mission_id, input, at, 0)?;
        tx.commit()?;
        Ok(complete)
    }

    /// Reverts one completion. Reverting twice is a no-op.
    ///
    /// # Errors
    /// - `Unauthorized` without `Action::RevertComplete`.
    /// - `CompleteNotFound` for an unknown id.
    pub fn revert_mission_complete(
        &self,
        conn: &mut Connection,
        caps: &dyn Capabilities,
        complete_id: CompleteId,
    ) -> MissionResult<()> {
        let started_at = Instant::now();
        info!(
            "event=mission_revert module=service status=start complete_id={} uid={}",
            complete_id,
            caps.uid()
        );

        let result = self.revert_in_transaction(conn, caps, complete_id);
        match &result {
            Ok(()) => info!(
                "event=mission_revert module=service status=ok complete_id={} duration_ms={}",
                complete_id,
                elapsed_ms(started_at)
            ),
            Err(err) => error!(
                "event=mission_revert module=service status=error complete_id={} duration_ms={} error_code={} error={}",
                complete_id,
                elapsed_ms(started_at),
                err.code(),
                err
            ),
        }
        result
    }

    fn revert_in_transaction(
        &self,
        conn: &mut Connection,
        caps: &dyn Capabilities,
        complete_id: CompleteId,
    ) -> MissionResult<()> {
        if !caps.check_action(&[Action::RevertComplete]) {
            return Err(MissionError::Unauthorized(Action::RevertComplete));
        }
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        self.engine.revert_in(&tx, caps, complete_id, 0)?;
        tx.commit()?;
        Ok(())
    }

    /// Loads one completion record.
    pub fn get_complete(&self, conn: &Connection, complete_id: CompleteId) -> MissionResult<Complete> {
        let repo = SqliteMissionRepository::new(conn);
        Ok(require_complete(&repo, complete_id)?)
    }

    /// Lists completion records, newest first.
    pub fn list_completes(
        &self,
        conn: &Connection,
        query: &CompleteListQuery,
    ) -> MissionResult<Vec<Complete>> {
        let repo = SqliteMissionRepository::new(conn);
        Ok(repo.list_completes(query)?)
    }
}

/// Drops sub-millisecond precision so returned records match stored ones.
fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
