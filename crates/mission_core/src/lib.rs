//! Mission availability and completion engine.
//!
//! Missions are stored definitions with ordered prerequisite and completion
//! rules. This crate decides which missions a user may complete at a given
//! time and executes completions transactionally.

pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod extension;
pub mod interval;
pub mod logging;
pub mod model;
pub mod repo;
pub mod rules;
pub mod service;

pub use auth::{parse_action, Action, Capabilities, CapabilitySet};
pub use config::{EngineConfig, MissionTemplate};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use engine::Engine;
pub use error::{MissionError, MissionResult};
pub use extension::points::{register_points_award, PointsLedger, SqlitePointsLedger};
pub use interval::{CalendarIntervals, IntervalError, IntervalResolver, Window};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::complete::{Complete, CompleteId, CompleteStatus, UserId};
pub use model::mission::{Mission, MissionId, MissionStatus};
pub use repo::mission_repo::{
    CompleteListQuery, MissionListQuery, MissionRepository, RepoError, RepoResult,
    SqliteMissionRepository,
};
pub use rules::{RegistryError, RuleRegistry};
pub use service::mission_service::{MissionQuery, MissionService};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
