//! `assist` completion: a completion finalizes once enough other users
//! contributed to it.
//!
//! Without a target the completion waits (PENDING) until `requirement`
//! contributions are recorded in its `ext`. With `{"completeID": n}` the
//! caller contributes to completion `n` instead: the contribution is appended
//! to the target's `ext`, the target's handler chain is run again, and the
//! contributing completion itself is stored CLOSED.

use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::{Complete, CompleteId, CompleteStatus};
use crate::model::mission::Mission;
use crate::repo::mission_repo::require_complete;
use crate::rules::completions::ext_i64;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, Completion, Flow};
use serde::Deserialize;
use serde_json::{json, Value};

pub const TAG: &str = "assist";

const ASSISTS_KEY: &str = "assists";
const TARGET_KEY: &str = "completeID";

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    requirement: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assist {
    id: String,
    pub requirement: u32,
}

impl Assist {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        Ok(Self {
            id,
            requirement: config.requirement,
        })
    }

    fn target_id(&self, ctx: &ExecContext<'_>) -> MissionResult<Option<CompleteId>> {
        let Some(input) = ctx.input_for(&self.id) else {
            return Ok(None);
        };
        match input.get(TARGET_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_i64().map(Some).ok_or_else(|| {
                MissionError::validation(format!("assist `{}` completeID must be an integer", self.id))
            }),
        }
    }

    /// Handler ID of the assist rule on the target completion's mission.
    fn target_handler_id(ctx: &ExecContext<'_>, target: &Complete) -> MissionResult<String> {
        let mission = ctx
            .repo()
            .get_mission(target.mission_id)?
            .ok_or(MissionError::MissionNotFound(target.mission_id))?;
        let rules = ctx.registry().compile(&mission, false)?;
        rules
            .completion_by_tag(TAG)
            .map(|handler| handler.id().to_string())
            .ok_or_else(|| {
                MissionError::validation(format!(
                    "completion {} does not accept assists",
                    target.id
                ))
            })
    }

    fn contribute(
        &self,
        ctx: &ExecContext<'_>,
        complete: &mut Complete,
        target_id: CompleteId,
    ) -> MissionResult<Flow> {
        let mut target = require_complete(ctx.repo(), target_id)?;
        if !matches!(target.status, CompleteStatus::Pending | CompleteStatus::Final) {
            return Err(MissionError::validation(format!(
                "completion {target_id} can no longer be assisted"
            )));
        }
        if target.uid == complete.uid {
            return Err(MissionError::validation("cannot assist your own completion"));
        }

        let handler_id = Self::target_handler_id(ctx, &target)?;
        let mut assists = assist_list(&target, &handler_id);
        if assists
            .iter()
            .any(|entry| entry.get("UID").and_then(Value::as_i64) == Some(complete.uid))
        {
            return Err(MissionError::validation(format!(
                "completion {target_id} was already assisted by this user"
            )));
        }
        assists.push(json!({"UID": complete.uid, "completeID": complete.id}));
        target.set_ext(&handler_id, ASSISTS_KEY, Value::Array(assists));
        ctx.rerun(&mut target)?;

        complete
            .result
            .insert(self.id.clone(), json!({ "completeID": target_id }));
        complete.set_ext(&self.id, TARGET_KEY, Value::from(target_id));
        complete.status = CompleteStatus::Closed;
        Ok(Flow::Stop)
    }
}

fn assist_list(complete: &Complete, handler_id: &str) -> Vec<Value> {
    complete
        .ext_value(handler_id, ASSISTS_KEY)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

impl Completion for Assist {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if let Some(target_id) = self.target_id(ctx)? {
            return self.contribute(ctx, complete, target_id);
        }

        let received = assist_list(complete, &self.id).len();
        if received < self.requirement as usize {
            complete.status = CompleteStatus::Pending;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn revert(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        let Some(target_id) = ext_i64(complete, &self.id, TARGET_KEY) else {
            return Ok(Flow::Continue);
        };
        let mut target = require_complete(ctx.repo(), target_id)?;
        if target.status == CompleteStatus::Revert {
            return Ok(Flow::Continue);
        }

        let handler_id = Self::target_handler_id(ctx, &target)?;
        let remaining: Vec<Value> = assist_list(&target, &handler_id)
            .into_iter()
            .filter(|entry| entry.get("completeID").and_then(Value::as_i64) != Some(complete.id))
            .collect();
        target.set_ext(&handler_id, ASSISTS_KEY, Value::Array(remaining));
        ctx.rerun(&mut target)?;
        Ok(Flow::Continue)
    }
}
