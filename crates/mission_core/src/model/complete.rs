//! Completion record model.
//!
//! # Invariants
//! - `result` and `ext` are keyed by completion handler `ID`.
//! - Records are never physically deleted; undo is `CompleteStatus::Revert`.

use crate::model::mission::MissionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable numeric completion identifier.
pub type CompleteId = i64;

/// Actor identifier supplied by the capability boundary.
pub type UserId = i64;

/// Completion attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompleteStatus {
    Pending,
    Final,
    Closed,
    /// Terminal undo state.
    Revert,
}

impl CompleteStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Final => "final",
            Self::Closed => "closed",
            Self::Revert => "revert",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "final" => Some(Self::Final),
            "closed" => Some(Self::Closed),
            "revert" => Some(Self::Revert),
            _ => None,
        }
    }
}

/// One completion attempt of a mission by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complete {
    pub id: CompleteId,
    #[serde(rename = "UID")]
    pub uid: UserId,
    #[serde(rename = "missionID")]
    pub mission_id: MissionId,
    pub status: CompleteStatus,
    /// Human-readable label of the section window the completion counts in.
    pub section: String,
    pub result: Map<String, Value>,
    pub ext: Map<String, Value>,
    pub complete_time: DateTime<Utc>,
}

impl Complete {
    /// Creates an unsaved record with empty `result`/`ext`.
    pub fn new(
        uid: UserId,
        mission_id: MissionId,
        section: impl Into<String>,
        complete_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            uid,
            mission_id,
            status: CompleteStatus::Pending,
            section: section.into(),
            result: Map::new(),
            ext: Map::new(),
            complete_time,
        }
    }

    /// Writes `ext[handler_id][key]`, replacing a non-object slot.
    pub fn set_ext(&mut self, handler_id: &str, key: &str, value: Value) {
        let mut entry = match self.ext.remove(handler_id) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        entry.insert(key.to_string(), value);
        self.ext.insert(handler_id.to_string(), Value::Object(entry));
    }

    /// Reads `ext[handler_id][key]` when present.
    pub fn ext_value(&self, handler_id: &str, key: &str) -> Option<&Value> {
        self.ext.get(handler_id)?.get(key)
    }
}
