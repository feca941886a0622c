//! `quota` prerequisite: completion allowance per section.

use crate::engine::aggregator::CountRequest;
use crate::engine::checker::CheckEnv;
use crate::error::MissionResult;
use crate::model::complete::CompleteStatus;
use crate::model::mission::Mission;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Flow, PostCheck, Prerequisite};
use serde::Deserialize;
use serde_json::Value;

pub const TAG: &str = "quota";

const COUNTED: [CompleteStatus; 1] = [CompleteStatus::Final];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub allowance: i64,
    /// Count every user's completions instead of the caller's.
    #[serde(default)]
    pub is_global: bool,
}

impl Quota {
    pub fn from_raw(raw: &Value) -> Result<Self, RegistryError> {
        let quota: Self = decode_config(TAG, raw)?;
        if quota.allowance < 0 {
            return Err(RegistryError::InvalidConfig {
                tag: TAG.to_string(),
                message: "allowance must not be negative".to_string(),
            });
        }
        Ok(quota)
    }
}

impl Prerequisite for Quota {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn require_counts(
        &self,
        mission: &Mission,
        env: &CheckEnv<'_>,
        request: &mut CountRequest,
    ) -> MissionResult<()> {
        if env.can_complete() {
            request.require(env.scope(self.is_global), mission.id, env.target_time, &COUNTED);
        }
        Ok(())
    }

    fn check(
        &self,
        mission: &mut Mission,
        env: &CheckEnv<'_>,
        _post: &mut PostCheck,
    ) -> MissionResult<Flow> {
        mission.quota = Some(mission.quota.unwrap_or(0) + self.allowance);

        if env.can_complete() {
            if let Some(window) = env.section_window(mission)? {
                let used = env
                    .counts
                    .count(env.scope(self.is_global), mission.id, &COUNTED, &window);
                // Several quota rules: the busiest scope wins.
                mission.complete_count = Some(mission.complete_count.unwrap_or(0).max(used));
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::Quota;
    use serde_json::json;

    #[test]
    fn decodes_camel_case_config() {
        let quota = Quota::from_raw(&json!({"type": "quota", "allowance": 3, "isGlobal": true}))
            .expect("quota config");
        assert_eq!(quota.allowance, 3);
        assert!(quota.is_global);
    }

    #[test]
    fn negative_allowance_is_rejected() {
        assert!(Quota::from_raw(&json!({"type": "quota", "allowance": -1})).is_err());
    }
}
