//! Engine error taxonomy.
//!
//! # Invariants
//! - An interrupted handler chain is `Flow::Stop`, never an error.
//! - Any error returned inside a completion or revert aborts the whole
//!   transaction.

use crate::auth::Action;
use crate::db::DbError;
use crate::interval::IntervalError;
use crate::model::complete::CompleteId;
use crate::model::mission::MissionId;
use crate::repo::mission_repo::RepoError;
use crate::rules::registry::RegistryError;

pub type MissionResult<T> = Result<T, MissionError>;

/// Error returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error("mission not found: {0}")]
    MissionNotFound(MissionId),
    #[error("complete not found: {0}")]
    CompleteNotFound(CompleteId),
    /// Mission is not ACTIVE at the completion time.
    #[error("mission {0} is not available")]
    NotAvailable(MissionId),
    #[error("mission {0} has no quota left")]
    NoQuota(MissionId),
    /// Malformed definition or completion input.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("action `{}` is not permitted", .0.as_str())]
    Unauthorized(Action),
    #[error("recursive completion deeper than {0} levels")]
    RecursionLimit(u32),
    #[error("interval error: {0}")]
    Interval(IntervalError),
    #[error("{0}")]
    Repo(RepoError),
}

impl MissionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissionNotFound(_) => "mission_not_found",
            Self::CompleteNotFound(_) => "complete_not_found",
            Self::NotAvailable(_) => "not_available",
            Self::NoQuota(_) => "no_quota",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::RecursionLimit(_) => "recursion_limit",
            Self::Interval(_) => "interval",
            Self::Repo(_) => "repo",
        }
    }
}

impl From<RepoError> for MissionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::MissionNotFound(id) => Self::MissionNotFound(id),
            RepoError::CompleteNotFound(id) => Self::CompleteNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<DbError> for MissionError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for MissionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl From<IntervalError> for MissionError {
    fn from(value: IntervalError) -> Self {
        Self::Interval(value)
    }
}

impl From<RegistryError> for MissionError {
    fn from(value: RegistryError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::MissionError;
    use crate::repo::mission_repo::RepoError;

    #[test]
    fn not_found_repo_errors_surface_as_engine_variants() {
        let err = MissionError::from(RepoError::MissionNotFound(4));
        assert!(matches!(err, MissionError::MissionNotFound(4)));
        let err = MissionError::from(RepoError::InvalidData("bad".to_string()));
        assert_eq!(err.code(), "repo");
    }
}
