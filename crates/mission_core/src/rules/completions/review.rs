//! `review` completion: a reviewer closes the mission with a final status.
//!
//! Callers without the review action pass through untouched.
//!
//! Input is the requested status (`"SUCCESS"`, `"FAILED"` or `"CLOSED"`),
//! either bare or as `{"status": ...}`.

use crate::auth::Action;
use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::Complete;
use crate::model::mission::{Mission, MissionStatus};
use crate::rules::{Completion, Flow};
use serde_json::Value;

pub const TAG: &str = "review";

const PREVIOUS_STATUS_KEY: &str = "previousStatus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    id: String,
}

impl Review {
    pub fn new(id: String) -> Self {
        Self { id }
    }

    fn requested_status(&self, ctx: &ExecContext<'_>) -> MissionResult<MissionStatus> {
        let raw = match ctx.input_for(&self.id) {
            Some(Value::Object(map)) => map.get("status").cloned(),
            Some(value) => Some(value.clone()),
            None => None,
        };
        let status = raw
            .and_then(|value| serde_json::from_value::<MissionStatus>(value).ok())
            .ok_or_else(|| {
                MissionError::validation(format!("review `{}` requires a status", self.id))
            })?;
        if !status.is_terminal() {
            return Err(MissionError::validation(format!(
                "review status must be SUCCESS, FAILED or CLOSED, got {status:?}"
            )));
        }
        Ok(status)
    }
}

impl Completion for Review {
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
        if !ctx.caps().check_action(&[Action::ReviewMission]) {
            return Ok(Flow::Continue);
        }
        let status = self.requested_status(ctx)?;

        let previous = mission.status.persisted();
        complete.set_ext(
            &self.id,
            PREVIOUS_STATUS_KEY,
            serde_json::to_value(previous).unwrap_or(Value::Null),
        );
        complete
            .result
            .insert(self.id.clone(), serde_json::to_value(status).unwrap_or(Value::Null));
        mission.status = status;
        Ok(Flow::Stop)
    }

    fn revert(
        &self,
        _ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        let Some(previous) = complete.ext_value(&self.id, PREVIOUS_STATUS_KEY).cloned() else {
            return Ok(Flow::Continue);
        };
        mission.status =
            serde_json::from_value::<MissionStatus>(previous).unwrap_or(MissionStatus::Open);
        Ok(Flow::Continue)
    }
}
