//! `stage` completion: multi-step progress within one section.
//!
//! Every attempt advances the caller's stage by one, or to an explicitly
//! requested later stage. Only the last stage finalizes the completion;
//! earlier stages are stored PENDING and stop the handler chain.

use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::{Complete, CompleteStatus};
use crate::model::mission::Mission;
use crate::repo::mission_repo::CompleteListQuery;
use crate::rules::completions::invalid_config;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Completion, Flow};
use serde::Deserialize;
use serde_json::Value;

pub const TAG: &str = "stage";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    stage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    id: String,
    pub stage_count: i64,
}

impl Stage {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        if config.stage_count < 1 {
            return Err(invalid_config(TAG, "stageCount must be at least 1"));
        }
        Ok(Self {
            id,
            stage_count: config.stage_count,
        })
    }

    /// Highest stage the caller reached in the current section.
    fn prior_stage(
        &self,
        ctx: &ExecContext<'_>,
        mission: &Mission,
        complete: &Complete,
    ) -> MissionResult<i64> {
        let Some(window) = ctx.section_window(mission)? else {
            return Ok(0);
        };
        let previous = ctx.repo().list_completes(&CompleteListQuery {
            mission_ids: vec![mission.id],
            uid: Some(complete.uid),
            statuses: vec![CompleteStatus::Pending, CompleteStatus::Final],
            window,
            exclude_id: Some(complete.id),
        })?;
        Ok(previous
            .iter()
            .filter_map(|earlier| earlier.result.get(&self.id).and_then(Value::as_i64))
            .max()
            .unwrap_or(0))
    }
}

impl Completion for Stage {
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
        let prior = self.prior_stage(ctx, mission, complete)?;
        let stage = match ctx.input_for(&self.id) {
            None | Some(Value::Null) => prior + 1,
            Some(value) => value.as_i64().ok_or_else(|| {
                MissionError::validation(format!("stage `{}` input must be an integer", self.id))
            })?,
        };

        if stage > self.stage_count {
            return Err(MissionError::validation(format!(
                "stage {stage} exceeds stage count {}",
                self.stage_count
            )));
        }
        if stage <= prior {
            return Err(MissionError::validation(format!(
                "stage {stage} already reached (current stage {prior})"
            )));
        }

        complete.result.insert(self.id.clone(), Value::from(stage));
        if stage == self.stage_count {
            return Ok(Flow::Continue);
        }
        complete.status = CompleteStatus::Pending;
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::Stage;
    use serde_json::json;

    #[test]
    fn stage_count_must_be_positive() {
        assert!(Stage::from_raw("s".to_string(), &json!({"type": "stage", "stageCount": 0})).is_err());
        let stage = Stage::from_raw("s".to_string(), &json!({"type": "stage", "stageCount": 3}))
            .expect("stage config");
        assert_eq!(stage.stage_count, 3);
    }
}
