//! `clear` completion: closes the caller's completions of other missions.
//!
//! Matching completions (by status, in the target mission's current section
//! unless `includeBeforeSection`) are set CLOSED and their ids recorded in
//! `ext`, so reversal restores exactly those rows.

use crate::engine::executor::ExecContext;
use crate::error::MissionResult;
use crate::interval::Window;
use crate::model::complete::{Complete, CompleteStatus};
use crate::model::mission::{Mission, MissionId};
use crate::repo::mission_repo::{CompleteListQuery, MissionRepository};
use crate::rules::completions::{ext_i64_list, invalid_config};
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Completion, Flow};
use serde::Deserialize;
use serde_json::Value;

pub const TAG: &str = "clear";

const CLOSED_KEY: &str = "closed";
const STATUS_KEY: &str = "status";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(default = "default_status")]
    status: CompleteStatus,
    #[serde(default)]
    mission_type: Option<String>,
    #[serde(rename = "missionIDs", default)]
    mission_ids: Vec<MissionId>,
    #[serde(default)]
    include_before_section: bool,
}

fn default_status() -> CompleteStatus {
    CompleteStatus::Final
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clear {
    id: String,
    /// Status of the completions to close.
    pub status: CompleteStatus,
    pub mission_type: Option<String>,
    pub mission_ids: Vec<MissionId>,
    /// Also close completions from earlier sections.
    pub include_before_section: bool,
}

impl Clear {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        let mission_type = config
            .mission_type
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty());
        if config.mission_ids.is_empty() && mission_type.is_none() {
            return Err(invalid_config(TAG, "missionIDs or missionType is required"));
        }
        if matches!(config.status, CompleteStatus::Closed | CompleteStatus::Revert) {
            return Err(invalid_config(TAG, "status must be PENDING or FINAL"));
        }
        Ok(Self {
            id,
            status: config.status,
            mission_type,
            mission_ids: config.mission_ids,
            include_before_section: config.include_before_section,
        })
    }

    fn targets(&self, repo: &dyn MissionRepository, current: MissionId) -> MissionResult<Vec<MissionId>> {
        let mut ids = self.mission_ids.clone();
        if let Some(kind) = &self.mission_type {
            for id in repo.mission_ids_by_type(kind)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids.retain(|id| *id != current);
        Ok(ids)
    }
}

impl Completion for Clear {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if ext_i64_list(complete, &self.id, CLOSED_KEY).is_some() {
            return Ok(Flow::Continue);
        }

        let targets = self.targets(ctx.repo(), mission.id)?;
        let mut closed = Vec::new();
        for target in ctx.repo().get_missions(&targets)? {
            let window = if self.include_before_section {
                Window::unbounded()
            } else {
                match ctx.section_window(&target)? {
                    Some(window) => window,
                    None => continue,
                }
            };
            let matching = ctx.repo().list_completes(&CompleteListQuery {
                mission_ids: vec![target.id],
                uid: Some(complete.uid),
                statuses: vec![self.status],
                window,
                exclude_id: Some(complete.id),
            })?;
            closed.extend(matching.into_iter().map(|row| row.id));
        }

        ctx.repo()
            .set_complete_statuses(&closed, CompleteStatus::Closed)?;
        complete.set_ext(
            &self.id,
            STATUS_KEY,
            serde_json::to_value(self.status).unwrap_or(Value::Null),
        );
        complete.set_ext(&self.id, CLOSED_KEY, Value::from(closed));
        Ok(Flow::Continue)
    }

    fn revert(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        let Some(ids) = ext_i64_list(complete, &self.id, CLOSED_KEY) else {
            return Ok(Flow::Continue);
        };
        let previous = complete
            .ext_value(&self.id, STATUS_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value::<CompleteStatus>(value).ok())
            .unwrap_or(self.status);

        let mut reopen = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = ctx.repo().get_complete(id)? {
                if row.status == CompleteStatus::Closed {
                    reopen.push(id);
                }
            }
        }
        ctx.repo().set_complete_statuses(&reopen, previous)?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::Clear;
    use crate::model::complete::CompleteStatus;
    use serde_json::json;

    #[test]
    fn defaults_to_closing_final_completions() {
        let rule = Clear::from_raw("clear_0".to_string(), &json!({"type": "clear", "missionIDs": [4]}))
            .expect("clear config");
        assert_eq!(rule.status, CompleteStatus::Final);
        assert!(!rule.include_before_section);
    }

    #[test]
    fn requires_targets_and_an_open_status() {
        assert!(Clear::from_raw("c".to_string(), &json!({"type": "clear"})).is_err());
        assert!(Clear::from_raw(
            "c".to_string(),
            &json!({"type": "clear", "missionType": "daily", "status": "REVERT"})
        )
        .is_err());
    }
}
