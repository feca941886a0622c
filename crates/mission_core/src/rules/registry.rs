//! Tag-keyed constructor tables for rule variants.
//!
//! # Responsibility
//! - Map a rule `type` tag to the constructor of its concrete variant.
//! - Compile a mission's raw rule arrays into rule objects.
//! - Assign missing completion handler `ID`s.
//!
//! # Invariants
//! - Tags are registered while the registry is built; the finished registry
//!   is shared read-only.
//! - Unknown completion tags are always rejected.
//! - Unknown prerequisite tags are rejected in strict mode and dropped with a
//!   warning otherwise.

use crate::model::mission::Mission;
use crate::rules::completions::{assist, clear, form, high_score, random_mission, review, stage};
use crate::rules::prerequisites::{complete_dependent, exclusion, quota};
use crate::rules::{Completion, Prerequisite};
use log::warn;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

/// Builds a prerequisite from its full raw element.
pub type PrerequisiteCtor =
    Box<dyn Fn(&Value) -> Result<Box<dyn Prerequisite>, RegistryError> + Send + Sync>;

/// Builds a completion handler from its assigned `ID` and full raw element.
pub type CompletionCtor =
    Box<dyn Fn(String, &Value) -> Result<Box<dyn Completion>, RegistryError> + Send + Sync>;

/// Registration and compilation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("rule tag is invalid: `{0}`")]
    InvalidTag(String),
    #[error("rule tag already registered: {0}")]
    DuplicateTag(String),
    #[error("unsupported rule type: {0}")]
    UnsupportedType(String),
    #[error("rule at index {0} has no `type`")]
    MissingType(usize),
    #[error("duplicate completion ID: {0}")]
    DuplicateId(String),
    #[error("invalid `{tag}` configuration: {message}")]
    InvalidConfig { tag: String, message: String },
}

/// Compiled rule objects of one mission, in declared order.
#[derive(Debug, Default)]
pub struct MissionRules {
    pub prerequisites: Vec<Box<dyn Prerequisite>>,
    pub completions: Vec<Box<dyn Completion>>,
}

impl MissionRules {
    /// Finds the first completion handler with `tag`.
    pub fn completion_by_tag(&self, tag: &str) -> Option<&dyn Completion> {
        self.completions
            .iter()
            .find(|handler| handler.tag() == tag)
            .map(|handler| handler.as_ref())
    }
}

/// Constructor tables for prerequisite and completion variants.
#[derive(Default)]
pub struct RuleRegistry {
    prerequisites: BTreeMap<String, PrerequisiteCtor>,
    completions: BTreeMap<String, CompletionCtor>,
}

impl Debug for RuleRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("prerequisites", &self.prerequisite_tags())
            .field("completions", &self.completion_tags())
            .finish()
    }
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in variant.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register_prerequisite(quota::TAG, |raw| Ok(Box::new(quota::Quota::from_raw(raw)?)))?;
        registry.register_prerequisite(complete_dependent::TAG, |raw| {
            Ok(Box::new(complete_dependent::CompleteDependent::from_raw(raw)?))
        })?;
        registry.register_prerequisite(exclusion::TAG, |raw| {
            Ok(Box::new(exclusion::Exclusion::from_raw(raw)?))
        })?;

        registry.register_completion(form::TAG, |id, raw| Ok(Box::new(form::Form::from_raw(id, raw)?)))?;
        registry.register_completion(stage::TAG, |id, raw| {
            Ok(Box::new(stage::Stage::from_raw(id, raw)?))
        })?;
        registry.register_completion(assist::TAG, |id, raw| {
            Ok(Box::new(assist::Assist::from_raw(id, raw)?))
        })?;
        registry.register_completion(high_score::TAG, |id, raw| {
            Ok(Box::new(high_score::HighScore::from_raw(id, raw)?))
        })?;
        registry.register_completion(random_mission::TAG, |id, raw| {
            Ok(Box::new(random_mission::RandomMission::from_raw(id, raw)?))
        })?;
        registry.register_completion(review::TAG, |id, _raw| Ok(Box::new(review::Review::new(id))))?;
        registry.register_completion(clear::TAG, |id, raw| {
            Ok(Box::new(clear::Clear::from_raw(id, raw)?))
        })?;
        Ok(registry)
    }

    pub fn register_prerequisite<F>(&mut self, tag: &str, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn(&Value) -> Result<Box<dyn Prerequisite>, RegistryError> + Send + Sync + 'static,
    {
        let tag = normalize_tag(tag)?;
        if self.prerequisites.contains_key(tag.as_str()) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        self.prerequisites.insert(tag, Box::new(ctor));
        Ok(())
    }

    pub fn register_completion<F>(&mut self, tag: &str, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn(String, &Value) -> Result<Box<dyn Completion>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        let tag = normalize_tag(tag)?;
        if self.completions.contains_key(tag.as_str()) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        self.completions.insert(tag, Box::new(ctor));
        Ok(())
    }

    pub fn prerequisite_tags(&self) -> Vec<&str> {
        self.prerequisites.keys().map(String::as_str).collect()
    }

    pub fn completion_tags(&self) -> Vec<&str> {
        self.completions.keys().map(String::as_str).collect()
    }

    pub fn construct_prerequisite(&self, raw: &Value) -> Result<Box<dyn Prerequisite>, RegistryError> {
        let tag = raw_tag(raw).ok_or(RegistryError::MissingType(0))?;
        let ctor = self
            .prerequisites
            .get(tag)
            .ok_or_else(|| RegistryError::UnsupportedType(tag.to_string()))?;
        ctor(raw)
    }

    pub fn construct_completion(
        &self,
        id: String,
        raw: &Value,
    ) -> Result<Box<dyn Completion>, RegistryError> {
        let tag = raw_tag(raw).ok_or(RegistryError::MissingType(0))?;
        let ctor = self
            .completions
            .get(tag)
            .ok_or_else(|| RegistryError::UnsupportedType(tag.to_string()))?;
        ctor(id, raw)
    }

    /// Compiles a mission's raw rules.
    ///
    /// `strict` rejects unknown prerequisite tags; otherwise they are dropped.
    pub fn compile(&self, mission: &Mission, strict: bool) -> Result<MissionRules, RegistryError> {
        let mut rules = MissionRules::default();

        for (index, raw) in mission.prerequisites.iter().enumerate() {
            let tag = raw_tag(raw).ok_or(RegistryError::MissingType(index))?;
            if !self.prerequisites.contains_key(tag) {
                if strict {
                    return Err(RegistryError::UnsupportedType(tag.to_string()));
                }
                warn!(
                    "event=rule_drop module=rules status=warn mission_id={} index={} tag={}",
                    mission.id, index, tag
                );
                continue;
            }
            rules.prerequisites.push(self.construct_prerequisite(raw)?);
        }

        let ids = assign_completion_ids(&mission.completes)?;
        for (raw, id) in mission.completes.iter().zip(ids) {
            rules.completions.push(self.construct_completion(id, raw)?);
        }

        Ok(rules)
    }

    /// Writes assigned completion `ID`s back into the raw elements and
    /// validates the result strictly.
    pub fn normalize(&self, mission: &mut Mission) -> Result<(), RegistryError> {
        let ids = assign_completion_ids(&mission.completes)?;
        for (raw, id) in mission.completes.iter_mut().zip(ids) {
            if let Value::Object(map) = raw {
                map.insert("ID".to_string(), Value::String(id));
            }
        }
        self.compile(mission, true).map(|_| ())
    }
}

fn normalize_tag(tag: &str) -> Result<String, RegistryError> {
    let trimmed = tag.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidTag(tag.to_string()));
    }
    Ok(trimmed.to_string())
}

fn raw_tag(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(Value::as_str).map(str::trim)
}

fn raw_id(raw: &Value) -> Option<&str> {
    raw.get("ID")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Resolves the handler `ID` of every completion element.
///
/// Elements without one get `{tag}_{index}`, suffixed `_n` when that collides
/// with an explicit `ID`.
pub fn assign_completion_ids(raw: &[Value]) -> Result<Vec<String>, RegistryError> {
    let mut used = BTreeSet::new();
    for element in raw {
        if let Some(id) = raw_id(element) {
            if !used.insert(id.to_string()) {
                return Err(RegistryError::DuplicateId(id.to_string()));
            }
        }
    }

    let mut ids = Vec::with_capacity(raw.len());
    for (index, element) in raw.iter().enumerate() {
        if let Some(id) = raw_id(element) {
            ids.push(id.to_string());
            continue;
        }
        let tag = raw_tag(element).ok_or(RegistryError::MissingType(index))?;
        let base = format!("{tag}_{index}");
        let mut candidate = base.clone();
        let mut suffix = 1;
        while used.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        used.insert(candidate.clone());
        ids.push(candidate);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::{assign_completion_ids, RegistryError, RuleRegistry};
    use crate::model::mission::Mission;
    use serde_json::json;

    #[test]
    fn builtin_registry_knows_every_variant() {
        let registry = RuleRegistry::with_builtin().expect("builtin registry");
        assert_eq!(
            registry.prerequisite_tags(),
            vec!["completeDependent", "exclusion", "quota"]
        );
        assert_eq!(registry.completion_tags().len(), 7);
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let mut registry = RuleRegistry::with_builtin().expect("builtin registry");
        let err = registry
            .register_completion("form", |_, _| Err(RegistryError::MissingType(0)))
            .expect_err("duplicate tag must fail");
        assert_eq!(err, RegistryError::DuplicateTag("form".to_string()));
    }

    #[test]
    fn missing_ids_get_tag_index_and_avoid_collisions() {
        let raw = vec![
            json!({"type": "form", "ID": "stage_1"}),
            json!({"type": "stage"}),
            json!({"type": "review"}),
        ];
        let ids = assign_completion_ids(&raw).expect("ids");
        assert_eq!(ids, vec!["stage_1", "stage_1_1", "review_2"]);
    }

    #[test]
    fn duplicate_explicit_ids_are_rejected() {
        let raw = vec![json!({"type": "form", "ID": "a"}), json!({"type": "review", "ID": "a"})];
        assert_eq!(
            assign_completion_ids(&raw),
            Err(RegistryError::DuplicateId("a".to_string()))
        );
    }

    #[test]
    fn unknown_prerequisite_is_dropped_only_when_lenient() {
        let registry = RuleRegistry::with_builtin().expect("builtin registry");
        let mut mission = Mission::new("daily", "check in");
        mission.prerequisites = vec![json!({"type": "legacy"}), json!({"type": "quota", "allowance": 1})];

        let rules = registry.compile(&mission, false).expect("lenient compile");
        assert_eq!(rules.prerequisites.len(), 1);
        assert_eq!(
            registry.compile(&mission, true).expect_err("strict compile"),
            RegistryError::UnsupportedType("legacy".to_string())
        );
    }

    #[test]
    fn unknown_completion_is_always_rejected() {
        let registry = RuleRegistry::with_builtin().expect("builtin registry");
        let mut mission = Mission::new("daily", "check in");
        mission.completes = vec![json!({"type": "teleport"})];
        assert!(matches!(
            registry.compile(&mission, false),
            Err(RegistryError::UnsupportedType(_))
        ));
    }

    #[test]
    fn normalize_writes_ids_back() {
        let registry = RuleRegistry::with_builtin().expect("builtin registry");
        let mut mission = Mission::new("daily", "check in");
        mission.completes = vec![json!({"type": "stage", "stageCount": 2})];
        registry.normalize(&mut mission).expect("normalize");
        assert_eq!(mission.completes[0]["ID"], "stage_0");
    }
}
