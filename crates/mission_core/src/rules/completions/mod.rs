//! Built-in completion handler variants.

pub mod assist;
pub mod clear;
pub mod form;
pub mod high_score;
pub mod random_mission;
pub mod review;
pub mod stage;

use crate::model::complete::Complete;
use crate::rules::RegistryError;
use serde_json::Value;

/// Reads an integer stored at `ext[handler_id][key]`.
pub(crate) fn ext_i64(complete: &Complete, handler_id: &str, key: &str) -> Option<i64> {
    complete.ext_value(handler_id, key).and_then(Value::as_i64)
}

/// Reads a list of integers stored at `ext[handler_id][key]`.
pub(crate) fn ext_i64_list(complete: &Complete, handler_id: &str, key: &str) -> Option<Vec<i64>> {
    complete
        .ext_value(handler_id, key)?
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
}

pub(crate) fn invalid_config(tag: &str, message: impl Into<String>) -> RegistryError {
    RegistryError::InvalidConfig {
        tag: tag.to_string(),
        message: message.into(),
    }
}
