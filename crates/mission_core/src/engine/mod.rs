//! Mission engine: availability evaluation, completion and reversal.
//!
//! # Responsibility
//! - Own the shared, read-only collaborators (rule registry, interval
//!   resolver, configuration).
//! - Run the count-request, aggregate and check pipeline over a working set.
//!
//! # Invariants
//! - Engine methods never open transactions; callers pass the connection or
//!   transaction to run in.

pub mod aggregator;
pub mod checker;
pub mod executor;
pub mod working_set;

use crate::auth::Capabilities;
use crate::config::EngineConfig;
use crate::engine::aggregator::{aggregate, CompletionCounts, CountRequest};
use crate::engine::checker::{check_all, CheckEnv};
use crate::engine::working_set::WorkingSet;
use crate::error::MissionResult;
use crate::interval::IntervalResolver;
use crate::repo::mission_repo::MissionRepository;
use crate::rules::RuleRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared engine state.
pub struct Engine {
    registry: Arc<RuleRegistry>,
    intervals: Arc<dyn IntervalResolver>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        registry: Arc<RuleRegistry>,
        intervals: Arc<dyn IntervalResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            intervals,
            config,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn intervals(&self) -> &dyn IntervalResolver {
        self.intervals.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Computes live status and quota numbers for every mission in `working`.
    pub fn evaluate(
        &self,
        repo: &dyn MissionRepository,
        working: &mut WorkingSet,
        caps: &dyn Capabilities,
        target_time: DateTime<Utc>,
    ) -> MissionResult<()> {
        let empty = CompletionCounts::default();
        let mut request = CountRequest::new();
        {
            let env = CheckEnv {
                repo,
                intervals: self.intervals(),
                caps,
                target_time,
                working: &*working,
                counts: &empty,
            };
            for id in working.ids() {
                let (Some(mission), Some(rules)) = (working.get(id), working.rules(id)) else {
                    continue;
                };
                if !mission.status.is_open() {
                    continue;
                }
                for prerequisite in &rules.prerequisites {
                    prerequisite.require_counts(mission, &env, &mut request)?;
                }
            }
        }

        let counts = aggregate(repo, self.intervals(), working, &request)?;
        check_all(working, repo, self.intervals(), caps, target_time, &counts)
    }
}
