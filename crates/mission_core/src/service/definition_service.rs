//! Mission definition management.
//!
//! # Responsibility
//! - Validate and normalize definitions before they are stored.
//! - Fill empty rule lists from the per-type template.
//!
//! # Invariants
//! - Stored definitions always compile strictly against the registry.
//! - Every stored completion element carries a unique `ID`.
//! - Live statuses are never stored; they persist as `open`.

use crate::auth::{Action, Capabilities};
use crate::error::{MissionError, MissionResult};
use crate::interval::IntervalError;
use crate::model::mission::{Mission, MissionId};
use crate::repo::mission_repo::{require_mission, MissionRepository, SqliteMissionRepository};
use crate::service::mission_service::MissionService;
use chrono::Utc;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

static RELATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,64}$").expect("valid relate key regex"));

/// Correlation tag keys are embedded in JSON paths, so they stay plain.
pub(crate) fn validate_relate_key(key: &str) -> MissionResult<()> {
    if RELATE_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(MissionError::validation(format!(
            "invalid relateID key `{key}`"
        )))
    }
}

fn require_manage(caps: &dyn Capabilities) -> MissionResult<()> {
    if caps.check_action(&[Action::ManageMission]) {
        Ok(())
    } else {
        Err(MissionError::Unauthorized(Action::ManageMission))
    }
}

impl MissionService {
    /// Stores a new definition and returns it as persisted.
    ///
    /// # Errors
    /// - `Unauthorized` without `Action::ManageMission`.
    /// - `Validation` for empty names or types, bad bounds, unknown
    ///   intervals, rule configurations the registry rejects, or a
    ///   rule-less definition whose type has no template.
    pub fn create_mission(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        mut mission: Mission,
    ) -> MissionResult<Mission> {
        require_manage(caps)?;
        self.prepare_definition(&mut mission)?;

        let repo = SqliteMissionRepository::new(conn);
        let id = repo.create_mission(&mission)?;
        info!(
            "event=mission_create module=service status=ok mission_id={} type={} prerequisites={} completes={}",
            id,
            mission.kind,
            mission.prerequisites.len(),
            mission.completes.len()
        );
        Ok(require_mission(&repo, id)?)
    }

    /// Replaces a stored definition.
    pub fn update_mission(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        mut mission: Mission,
    ) -> MissionResult<Mission> {
        require_manage(caps)?;
        let repo = SqliteMissionRepository::new(conn);
        require_mission(&repo, mission.id)?;
        self.prepare_definition(&mut mission)?;

        repo.update_mission(&mission)?;
        info!(
            "event=mission_update module=service status=ok mission_id={} status_value={}",
            mission.id,
            mission.status.as_db_str()
        );
        Ok(require_mission(&repo, mission.id)?)
    }

    /// Soft-deletes a definition; its completion history is kept.
    pub fn delete_mission(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        mission_id: MissionId,
    ) -> MissionResult<()> {
        require_manage(caps)?;
        SqliteMissionRepository::new(conn).soft_delete_mission(mission_id)?;
        info!("event=mission_delete module=service status=ok mission_id={mission_id}");
        Ok(())
    }

    /// Loads one stored definition with its persisted status.
    pub fn get_mission(&self, conn: &Connection, mission_id: MissionId) -> MissionResult<Mission> {
        let repo = SqliteMissionRepository::new(conn);
        Ok(require_mission(&repo, mission_id)?)
    }

    /// Replaces the category set of a mission.
    pub fn set_mission_categories(
        &self,
        conn: &Connection,
        caps: &dyn Capabilities,
        mission_id: MissionId,
        category_ids: &[i64],
    ) -> MissionResult<()> {
        require_manage(caps)?;
        let mut categories = category_ids.to_vec();
        categories.sort_unstable();
        categories.dedup();
        if let Some(bad) = categories.iter().find(|id| **id <= 0) {
            return Err(MissionError::validation(format!(
                "invalid category id {bad}"
            )));
        }

        let repo = SqliteMissionRepository::new(conn);
        require_mission(&repo, mission_id)?;
        repo.set_mission_categories(mission_id, &categories)?;
        Ok(())
    }

    fn prepare_definition(&self, mission: &mut Mission) -> MissionResult<()> {
        mission.name = mission.name.trim().to_string();
        mission.kind = mission.kind.trim().to_string();
        if mission.name.is_empty() {
            return Err(MissionError::validation("mission name must not be empty"));
        }
        if mission.kind.is_empty() {
            return Err(MissionError::validation("mission type must not be empty"));
        }
        for key in mission.relate_id.keys() {
            validate_relate_key(key)?;
        }
        if let (Some(begin), Some(end)) = (mission.begin_time, mission.end_time) {
            if begin >= end {
                return Err(MissionError::validation(
                    "beginTime must be earlier than endTime",
                ));
            }
        }
        for key in [&mission.section_interval, &mission.active_interval]
            .into_iter()
            .flatten()
        {
            self.check_interval_key(key)?;
        }

        mission.status = mission.status.persisted();
        mission.reset_live();

        if mission.prerequisites.is_empty() && mission.completes.is_empty() {
            let template = self.engine().config().template(&mission.kind).ok_or_else(|| {
                MissionError::validation(format!(
                    "mission type `{}` has no rules and no template",
                    mission.kind
                ))
            })?;
            mission.prerequisites = template.prerequisites.clone();
            mission.completes = template.completes.clone();
        }

        self.engine().registry().normalize(mission)?;
        Ok(())
    }

    fn check_interval_key(&self, key: &str) -> MissionResult<()> {
        match self
            .engine()
            .intervals()
            .get_interval(Some(key), Utc::now(), true)
        {
            Err(IntervalError::UnknownInterval(name)) => Err(MissionError::validation(format!(
                "unknown interval `{name}`"
            ))),
            _ => Ok(()),
        }
    }
}
