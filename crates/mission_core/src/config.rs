//! Engine configuration.
//!
//! # Responsibility
//! - Hold engine-wide limits and per-type definition templates.
//! - Load from JSON supplied by the host.
//!
//! # Invariants
//! - Missing fields take defaults; a loaded config is always usable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 8;
pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const DEFAULT_MAX_LIST_LIMIT: u32 = 500;

/// Rule lists given to definitions of one mission type that declare none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MissionTemplate {
    pub prerequisites: Vec<Value>,
    pub completes: Vec<Value>,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Nesting bound for completions triggered by other completions.
    pub max_recursion_depth: u32,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
    /// Keyed by mission `type`.
    pub templates: BTreeMap<String, MissionTemplate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            default_list_limit: DEFAULT_LIST_LIMIT,
            max_list_limit: DEFAULT_MAX_LIST_LIMIT,
            templates: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Resolves the effective page size for a listing request.
    pub fn list_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_list_limit)
            .clamp(1, self.max_list_limit.max(1))
    }

    pub fn template(&self, kind: &str) -> Option<&MissionTemplate> {
        self.templates.get(kind)
    }
}
