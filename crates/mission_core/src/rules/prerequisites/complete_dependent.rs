//! `completeDependent` prerequisite: other missions must be completed first.
//!
//! Each referenced mission needs, within its own section window (optionally
//! `sequential` sections back), at least the configured number of
//! completions per status. An optional delay keeps the mission closed for a
//! cool-down after the latest qualifying completion.

use crate::engine::aggregator::CountRequest;
use crate::engine::checker::CheckEnv;
use crate::error::MissionResult;
use crate::interval::{resolve_window, resolve_window_back, Window};
use crate::model::complete::CompleteStatus;
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::MissionRepository;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Flow, PostCheck, Prerequisite};
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const TAG: &str = "completeDependent";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(rename = "missionIDs", default)]
    mission_ids: Vec<MissionId>,
    #[serde(default)]
    mission_type: Option<String>,
    #[serde(default)]
    statuses: BTreeMap<String, i64>,
    #[serde(default)]
    sequential: u32,
    #[serde(default)]
    delay_seconds: Option<i64>,
    #[serde(default)]
    delay_interval: Option<String>,
    #[serde(default)]
    is_global_dependent: bool,
    #[serde(default)]
    is_skip: bool,
}

/// Cool-down after the latest qualifying completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    Seconds(i64),
    /// The target time must fall in a later window of this interval.
    Interval(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteDependent {
    pub mission_ids: Vec<MissionId>,
    pub mission_type: Option<String>,
    /// Required completion count per status.
    pub statuses: Vec<(CompleteStatus, i64)>,
    /// How many sections back the dependency window lies.
    pub sequential: u32,
    pub delay: Option<Delay>,
    pub is_global_dependent: bool,
    /// Failing leaves the mission OPEN and moves on.
    pub is_skip: bool,
}

impl CompleteDependent {
    pub fn from_raw(raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        let invalid = |message: &str| RegistryError::InvalidConfig {
            tag: TAG.to_string(),
            message: message.to_string(),
        };

        let mission_type = config
            .mission_type
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty());
        if config.mission_ids.is_empty() && mission_type.is_none() {
            return Err(invalid("missionIDs or missionType is required"));
        }

        let mut statuses = Vec::with_capacity(config.statuses.len());
        for (key, count) in config.statuses {
            let status: CompleteStatus =
                serde_json::from_value(Value::String(key.trim().to_ascii_uppercase()))
                    .map_err(|_| invalid(&format!("unknown completion status `{key}`")))?;
            if count < 0 {
                return Err(invalid("status counts must not be negative"));
            }
            statuses.push((status, count));
        }
        if statuses.is_empty() {
            statuses.push((CompleteStatus::Final, 1));
        }

        let delay = match (config.delay_seconds, config.delay_interval) {
            (Some(_), Some(_)) => {
                return Err(invalid("delaySeconds and delayInterval are exclusive"));
            }
            (Some(seconds), None) if seconds < 0 => {
                return Err(invalid("delaySeconds must not be negative"));
            }
            (Some(seconds), None) => Some(Delay::Seconds(seconds)),
            (None, Some(interval)) => Some(Delay::Interval(interval)),
            (None, None) => None,
        };

        Ok(Self {
            mission_ids: config.mission_ids,
            mission_type,
            statuses,
            sequential: config.sequential,
            delay,
            is_global_dependent: config.is_global_dependent,
            is_skip: config.is_skip,
        })
    }

    fn targets(&self, repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        let mut ids = self.mission_ids.clone();
        if let Some(kind) = &self.mission_type {
            for id in repo.mission_ids_by_type(kind)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn counted_statuses(&self) -> Vec<CompleteStatus> {
        self.statuses.iter().map(|(status, _)| *status).collect()
    }

    fn dependency_window(
        &self,
        dependency: &Mission,
        env: &CheckEnv<'_>,
    ) -> MissionResult<Option<Window>> {
        Ok(resolve_window_back(
            env.intervals,
            dependency.section_interval.as_deref(),
            env.target_time,
            self.sequential,
        )?)
    }

    fn satisfied(&self, mission: &Mission, env: &CheckEnv<'_>) -> MissionResult<bool> {
        let scope = env.scope(self.is_global_dependent);
        let counted = self.counted_statuses();

        for id in self.targets(env.repo)? {
            let dependency = if id == mission.id {
                Some(mission)
            } else {
                env.working.get(id)
            };
            let Some(dependency) = dependency else {
                return Ok(false);
            };
            let Some(window) = self.dependency_window(dependency, env)? else {
                return Ok(false);
            };

            for (status, required) in &self.statuses {
                if env.counts.count(scope, id, &[*status], &window) < *required {
                    return Ok(false);
                }
            }

            let Some(delay) = &self.delay else {
                continue;
            };
            let Some(latest) = env.counts.latest(scope, id, &counted, &window) else {
                continue;
            };
            let cooled_down = match delay {
                Delay::Seconds(seconds) => env.target_time >= latest + Duration::seconds(*seconds),
                Delay::Interval(key) => {
                    match resolve_window(env.intervals, Some(key), env.target_time)? {
                        Some(current) => current.start.is_some_and(|start| latest < start),
                        None => false,
                    }
                }
            };
            if !cooled_down {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Prerequisite for CompleteDependent {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn related_missions(&self, repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        self.targets(repo)
    }

    fn require_counts(
        &self,
        _mission: &Mission,
        env: &CheckEnv<'_>,
        request: &mut CountRequest,
    ) -> MissionResult<()> {
        let scope = env.scope(self.is_global_dependent);
        let counted = self.counted_statuses();
        for id in self.targets(env.repo)? {
            let Some(dependency) = env.working.get(id) else {
                continue;
            };
            let Some(window) = self.dependency_window(dependency, env)? else {
                continue;
            };
            // Any instant inside the window resolves back to it.
            let probe = window.start.unwrap_or(env.target_time);
            request.require(scope, id, probe, &counted);
        }
        Ok(())
    }

    fn check(
        &self,
        mission: &mut Mission,
        env: &CheckEnv<'_>,
        _post: &mut PostCheck,
    ) -> MissionResult<Flow> {
        if self.satisfied(mission, env)? || self.is_skip {
            return Ok(Flow::Continue);
        }
        mission.status = MissionStatus::Inactive;
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompleteDependent, Delay};
    use crate::model::complete::CompleteStatus;
    use serde_json::json;

    #[test]
    fn defaults_to_one_final_completion() {
        let rule = CompleteDependent::from_raw(&json!({"type": "completeDependent", "missionIDs": [3]}))
            .expect("config");
        assert_eq!(rule.statuses, vec![(CompleteStatus::Final, 1)]);
        assert_eq!(rule.delay, None);
    }

    #[test]
    fn parses_statuses_and_delay() {
        let rule = CompleteDependent::from_raw(&json!({
            "type": "completeDependent",
            "missionType": "tutorial",
            "statuses": {"final": 2, "PENDING": 1},
            "delaySeconds": 60,
            "isSkip": true
        }))
        .expect("config");
        assert_eq!(rule.statuses.len(), 2);
        assert_eq!(rule.delay, Some(Delay::Seconds(60)));
        assert!(rule.is_skip);
    }

    #[test]
    fn rejects_missing_targets_and_double_delay() {
        assert!(CompleteDependent::from_raw(&json!({"type": "completeDependent"})).is_err());
        assert!(CompleteDependent::from_raw(&json!({
            "type": "completeDependent",
            "missionIDs": [1],
            "delaySeconds": 5,
            "delayInterval": "daily"
        }))
        .is_err());
    }
}
