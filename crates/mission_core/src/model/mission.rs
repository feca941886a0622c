//! Mission domain model.
//!
//! # Responsibility
//! - Define the task definition record evaluated by the availability checker.
//! - Carry live, check-time-only fields next to persisted definition fields.
//!
//! # Invariants
//! - `quota`/`complete_count` are `None` until a check pass computes them;
//!   `Some(0)` is a real value (no allowance / no completions).
//! - Live statuses (`Active`, `Inactive`) are never persisted; storing a
//!   mission writes `Open` in their place.
//! - Completion handler `ID`s inside `completes` are unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stable numeric mission identifier.
pub type MissionId = i64;

/// Mission lifecycle status.
///
/// `Open`, `Success`, `Failed` and `Closed` are persisted. `Active` and
/// `Inactive` are layered over `Open` by the availability checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Open,
    Active,
    Inactive,
    Success,
    Failed,
    Closed,
}

impl MissionStatus {
    /// Status written to storage for this value.
    pub fn persisted(self) -> Self {
        match self {
            Self::Active | Self::Inactive => Self::Open,
            other => other,
        }
    }

    /// Whether the checker derives a live status for this value.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Active | Self::Inactive)
    }

    /// Terminal statuses a reviewer may assign.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Closed)
    }

    pub fn as_db_str(self) -> &'static str {
        match self.persisted() {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Closed => "closed",
            _ => "open",
        }
    }

    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Task definition plus its live, per-check state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    #[serde(default)]
    pub id: MissionId,
    /// Correlation tags for external entities.
    #[serde(rename = "relateID", default)]
    pub relate_id: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sort: i64,
    #[serde(default = "default_status")]
    pub status: MissionStatus,
    /// Tagged prerequisite configurations, evaluated in order.
    #[serde(default)]
    pub prerequisites: Vec<Value>,
    /// Tagged completion handler configurations, executed in order.
    #[serde(default)]
    pub completes: Vec<Value>,
    #[serde(default)]
    pub section_interval: Option<String>,
    #[serde(default)]
    pub active_interval: Option<String>,
    #[serde(default)]
    pub begin_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub quota: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", skip_deserializing)]
    pub complete_count: Option<i64>,
}

fn default_status() -> MissionStatus {
    MissionStatus::Open
}

impl Mission {
    /// Creates an open mission with empty rule lists.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            relate_id: BTreeMap::new(),
            kind: kind.into(),
            name: name.into(),
            description: String::new(),
            profile: BTreeMap::new(),
            sort: 0,
            status: MissionStatus::Open,
            prerequisites: Vec::new(),
            completes: Vec::new(),
            section_interval: None,
            active_interval: None,
            begin_time: None,
            end_time: None,
            quota: None,
            complete_count: None,
        }
    }

    /// Whether `at` lies within the absolute `begin_time`/`end_time` bounds.
    pub fn within_bounds(&self, at: DateTime<Utc>) -> bool {
        if self.begin_time.is_some_and(|begin| begin > at) {
            return false;
        }
        if self.end_time.is_some_and(|end| end < at) {
            return false;
        }
        true
    }

    /// Remaining completions in the current section, once both sides are known.
    pub fn remaining_quota(&self) -> Option<i64> {
        let quota = self.quota?;
        Some(quota - self.complete_count.unwrap_or(0))
    }

    /// Whether computed live numbers show no completion allowance left.
    pub fn quota_exhausted(&self) -> bool {
        match self.quota {
            Some(0) => true,
            Some(quota) => self.complete_count.is_some_and(|count| count >= quota),
            None => false,
        }
    }

    /// Clears live numbers before a check pass.
    pub fn reset_live(&mut self) {
        self.quota = None;
        self.complete_count = None;
    }
}
