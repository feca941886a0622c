//! `exclusion` prerequisite: closes a mission while a sibling is in use.

use crate::engine::aggregator::CountRequest;
use crate::engine::checker::CheckEnv;
use crate::error::MissionResult;
use crate::model::complete::CompleteStatus;
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::MissionRepository;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, parse_mission_key, Flow, PostCheck, Prerequisite};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const TAG: &str = "exclusion";

const COUNTED: [CompleteStatus; 1] = [CompleteStatus::Final];

#[derive(Debug, Deserialize)]
struct Config {
    missions: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    /// Excluded mission id to the usage at which this mission closes.
    pub thresholds: BTreeMap<MissionId, i64>,
}

impl Exclusion {
    pub fn from_raw(raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        let mut thresholds = BTreeMap::new();
        for (key, threshold) in config.missions {
            thresholds.insert(parse_mission_key(TAG, &key)?, threshold);
        }
        Ok(Self { thresholds })
    }
}

impl Prerequisite for Exclusion {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn related_missions(&self, _repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        Ok(self.thresholds.keys().copied().collect())
    }

    fn require_counts(
        &self,
        mission: &Mission,
        env: &CheckEnv<'_>,
        request: &mut CountRequest,
    ) -> MissionResult<()> {
        for id in self.thresholds.keys() {
            if *id != mission.id && env.working.contains(*id) {
                request.require(env.scope(false), *id, env.target_time, &COUNTED);
            }
        }
        Ok(())
    }

    fn check(
        &self,
        _mission: &mut Mission,
        _env: &CheckEnv<'_>,
        post: &mut PostCheck,
    ) -> MissionResult<Flow> {
        post.request();
        Ok(Flow::Continue)
    }

    fn post_check(&self, mission: &mut Mission, env: &CheckEnv<'_>) -> MissionResult<()> {
        if mission.status != MissionStatus::Active {
            return Ok(());
        }
        for (id, threshold) in &self.thresholds {
            let Some(other) = env.working.get(*id) else {
                continue;
            };
            if other.status != MissionStatus::Active {
                continue;
            }
            let Some(window) = env.section_window(other)? else {
                continue;
            };
            let used = env.counts.count(env.scope(false), *id, &COUNTED, &window);
            if used >= *threshold {
                mission.status = MissionStatus::Inactive;
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Exclusion;
    use serde_json::json;

    #[test]
    fn parses_string_keyed_thresholds() {
        let rule = Exclusion::from_raw(&json!({"type": "exclusion", "missions": {"12": 1, " 40 ": 3}}))
            .expect("exclusion config");
        assert_eq!(rule.thresholds.get(&12), Some(&1));
        assert_eq!(rule.thresholds.get(&40), Some(&3));
    }

    #[test]
    fn rejects_non_numeric_keys() {
        assert!(Exclusion::from_raw(&json!({"type": "exclusion", "missions": {"abc": 1}})).is_err());
    }
}
