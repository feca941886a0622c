//! Rule contracts evaluated by the engine.
//!
//! # Responsibility
//! - Define the two fixed extension contracts: [`Prerequisite`] (availability
//!   rules) and [`Completion`] (handlers run when a mission is completed).
//! - Carry the explicit continue/stop signal returned by every rule call.
//!
//! # Invariants
//! - `Flow::Stop` ends the current rule loop and is never an error.
//! - Rule objects are immutable after construction and shared across threads.

pub mod completions;
pub mod prerequisites;
pub mod registry;

use crate::engine::aggregator::CountRequest;
use crate::engine::checker::CheckEnv;
use crate::engine::executor::ExecContext;
use crate::error::MissionResult;
use crate::model::complete::Complete;
use crate::model::mission::{Mission, MissionId};
use crate::repo::mission_repo::MissionRepository;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;

pub use registry::{MissionRules, RegistryError, RuleRegistry};

/// Outcome of one rule or handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Evaluate the next rule.
    Continue,
    /// Skip the remaining rules; the state reached so far stands.
    Stop,
}

/// Flag a prerequisite raises to be called again after the whole batch is
/// checked.
#[derive(Debug, Default)]
pub struct PostCheck {
    requested: bool,
}

impl PostCheck {
    pub fn request(&mut self) {
        self.requested = true;
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Availability rule attached to a mission.
pub trait Prerequisite: Debug + Send + Sync {
    fn tag(&self) -> &'static str;

    /// Other missions that must be loaded and checked alongside this one.
    fn related_missions(&self, _repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        Ok(Vec::new())
    }

    /// Registers the completion rows this rule will count during `check`.
    fn require_counts(
        &self,
        _mission: &Mission,
        _env: &CheckEnv<'_>,
        _request: &mut CountRequest,
    ) -> MissionResult<()> {
        Ok(())
    }

    fn check(
        &self,
        mission: &mut Mission,
        env: &CheckEnv<'_>,
        post: &mut PostCheck,
    ) -> MissionResult<Flow>;

    /// Runs once after every mission in the batch has been checked.
    fn post_check(&self, _mission: &mut Mission, _env: &CheckEnv<'_>) -> MissionResult<()> {
        Ok(())
    }
}

/// Handler run, in declared order, when a mission is completed or reverted.
pub trait Completion: Debug + Send + Sync {
    fn tag(&self) -> &'static str;

    /// Handler `ID`, the key into `Complete::result` and `Complete::ext`.
    fn id(&self) -> &str;

    fn related_missions(&self, _repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        Ok(Vec::new())
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow>;

    fn revert(
        &self,
        _ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        _complete: &mut Complete,
    ) -> MissionResult<Flow> {
        Ok(Flow::Continue)
    }
}

/// Decodes one tagged rule element into its concrete configuration.
pub(crate) fn decode_config<T: DeserializeOwned>(tag: &str, raw: &Value) -> Result<T, RegistryError> {
    serde_json::from_value(raw.clone()).map_err(|err| RegistryError::InvalidConfig {
        tag: tag.to_string(),
        message: err.to_string(),
    })
}

/// Parses a JSON object key holding a mission id.
pub(crate) fn parse_mission_key(tag: &str, key: &str) -> Result<MissionId, RegistryError> {
    key.trim()
        .parse::<MissionId>()
        .map_err(|_| RegistryError::InvalidConfig {
            tag: tag.to_string(),
            message: format!("`{key}` is not a mission id"),
        })
}
