//! `highScore` completion: only a new personal best finalizes.

use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::{Complete, CompleteStatus};
use crate::model::mission::Mission;
use crate::repo::mission_repo::CompleteListQuery;
use crate::rules::completions::ext_i64;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Completion, Flow};
use serde::Deserialize;
use serde_json::Value;

pub const TAG: &str = "highScore";

const PREVIOUS_KEY: &str = "previous";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(default)]
    is_revert_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighScore {
    id: String,
    /// Revert the previous best when it is beaten.
    pub is_revert_previous: bool,
}

impl HighScore {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        Ok(Self {
            id,
            is_revert_previous: config.is_revert_previous,
        })
    }

    fn score_of(&self, complete: &Complete) -> Option<f64> {
        complete.result.get(&self.id).and_then(Value::as_f64)
    }
}

impl Completion for HighScore {
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
        let score = ctx
            .input_for(&self.id)
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                MissionError::validation(format!("high score `{}` requires a numeric score", self.id))
            })?;
        complete.result.insert(self.id.clone(), Value::from(score));

        let window = ctx.section_window(mission)?.unwrap_or_default();
        let finals = ctx.repo().list_completes(&CompleteListQuery {
            mission_ids: vec![mission.id],
            uid: Some(complete.uid),
            statuses: vec![CompleteStatus::Final],
            window,
            exclude_id: Some(complete.id),
        })?;
        let best = finals
            .iter()
            .filter_map(|earlier| self.score_of(earlier).map(|score| (score, earlier)))
            .max_by(|left, right| left.0.total_cmp(&right.0));

        let Some((best_score, holder)) = best else {
            return Ok(Flow::Continue);
        };
        if score <= best_score {
            complete.status = CompleteStatus::Closed;
            return Ok(Flow::Stop);
        }

        if self.is_revert_previous && ext_i64(complete, &self.id, PREVIOUS_KEY).is_none() {
            let holder_id = holder.id;
            // The holder's own reversal must already see this score.
            ctx.repo().update_complete(complete)?;
            ctx.revert_other(holder_id)?;
            complete.set_ext(&self.id, PREVIOUS_KEY, Value::from(holder_id));
        }
        Ok(Flow::Continue)
    }

    fn revert(
        &self,
        ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        let Some(previous_id) = ext_i64(complete, &self.id, PREVIOUS_KEY) else {
            return Ok(Flow::Continue);
        };
        if complete.status != CompleteStatus::Final {
            return Ok(Flow::Continue);
        }
        let Some(previous) = ctx.repo().get_complete(previous_id)? else {
            return Ok(Flow::Continue);
        };
        if previous.status != CompleteStatus::Revert {
            return Ok(Flow::Continue);
        }

        // Reinstate the previous best unless another final score beats it.
        let previous_score = self.score_of(&previous).unwrap_or(f64::MIN);
        let window = ctx
            .section_window_at(mission, complete.complete_time)?
            .unwrap_or_default();
        let beaten = ctx
            .repo()
            .list_completes(&CompleteListQuery {
                mission_ids: vec![mission.id],
                uid: Some(complete.uid),
                statuses: vec![CompleteStatus::Final],
                window,
                exclude_id: Some(complete.id),
            })?
            .iter()
            .any(|other| {
                other.id != previous_id
                    && self.score_of(other).is_some_and(|score| score >= previous_score)
            });
        if !beaten {
            ctx.repo()
                .set_complete_statuses(&[previous_id], CompleteStatus::Final)?;
        }
        Ok(Flow::Continue)
    }
}
