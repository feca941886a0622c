//! Missions loaded and checked together in one pass.
//!
//! # Invariants
//! - Every entry carries the rules compiled from its own definition.
//! - Extending the set follows prerequisite and completion references
//!   transitively; references to missing missions are skipped.

use crate::error::MissionResult;
use crate::model::mission::{Mission, MissionId};
use crate::repo::mission_repo::MissionRepository;
use crate::rules::{MissionRules, RuleRegistry};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    mission: Mission,
    rules: Arc<MissionRules>,
}

#[derive(Debug, Default)]
pub struct WorkingSet {
    entries: BTreeMap<MissionId, Entry>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `ids` plus every mission they reference.
    pub fn load(
        repo: &dyn MissionRepository,
        registry: &RuleRegistry,
        ids: &[MissionId],
    ) -> MissionResult<Self> {
        let mut working = Self::new();
        for mission in repo.get_missions(ids)? {
            working.insert(registry, mission)?;
        }
        working.extend_related(repo, registry, ids)?;
        Ok(working)
    }

    /// Compiles and stores one mission, replacing an existing entry.
    pub fn insert(&mut self, registry: &RuleRegistry, mission: Mission) -> MissionResult<()> {
        let rules = registry.compile(&mission, false)?;
        self.entries.insert(
            mission.id,
            Entry {
                mission,
                rules: Arc::new(rules),
            },
        );
        Ok(())
    }

    /// Pulls in missions referenced, directly or transitively, by `roots`.
    pub fn extend_related(
        &mut self,
        repo: &dyn MissionRepository,
        registry: &RuleRegistry,
        roots: &[MissionId],
    ) -> MissionResult<()> {
        let mut visited: BTreeSet<MissionId> = BTreeSet::new();
        let mut frontier: Vec<MissionId> = roots.to_vec();

        while !frontier.is_empty() {
            let mut wanted = BTreeSet::new();
            for id in frontier.drain(..) {
                if !visited.insert(id) {
                    continue;
                }
                let Some(entry) = self.entries.get(&id) else {
                    continue;
                };
                for prerequisite in &entry.rules.prerequisites {
                    wanted.extend(prerequisite.related_missions(repo)?);
                }
                for handler in &entry.rules.completions {
                    wanted.extend(handler.related_missions(repo)?);
                }
            }

            let missing: Vec<MissionId> = wanted
                .iter()
                .copied()
                .filter(|id| !self.entries.contains_key(id))
                .collect();
            if !missing.is_empty() {
                let loaded = repo.get_missions(&missing)?;
                debug!(
                    "event=working_set_extend module=engine status=ok requested={} loaded={}",
                    missing.len(),
                    loaded.len()
                );
                for mission in loaded {
                    self.insert(registry, mission)?;
                }
            }
            frontier.extend(wanted.into_iter().filter(|id| !visited.contains(id)));
        }
        Ok(())
    }

    pub fn contains(&self, id: MissionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: MissionId) -> Option<&Mission> {
        self.entries.get(&id).map(|entry| &entry.mission)
    }

    pub fn rules(&self, id: MissionId) -> Option<Arc<MissionRules>> {
        self.entries.get(&id).map(|entry| Arc::clone(&entry.rules))
    }

    pub fn ids(&self) -> Vec<MissionId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes a mission so it can be mutated while the rest stays readable.
    pub(crate) fn take(&mut self, id: MissionId) -> Option<(Mission, Arc<MissionRules>)> {
        self.entries
            .remove(&id)
            .map(|entry| (entry.mission, entry.rules))
    }

    pub(crate) fn put_back(&mut self, mission: Mission, rules: Arc<MissionRules>) {
        self.entries.insert(mission.id, Entry { mission, rules });
    }
}
