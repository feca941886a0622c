//! `randomMission` completion: completes one weighted-random candidate.

use crate::engine::executor::ExecContext;
use crate::error::{MissionError, MissionResult};
use crate::model::complete::Complete;
use crate::model::mission::{Mission, MissionId, MissionStatus};
use crate::repo::mission_repo::MissionRepository;
use crate::rules::completions::ext_i64;
use crate::rules::registry::RegistryError;
use crate::rules::{decode_config, parse_mission_key, Completion, Flow};
use log::debug;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const TAG: &str = "randomMission";

const MISSION_KEY: &str = "missionID";
const COMPLETE_KEY: &str = "completeID";

#[derive(Debug, Deserialize)]
struct Config {
    possibility: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomMission {
    id: String,
    /// Candidate mission id to base weight.
    pub possibility: BTreeMap<MissionId, u32>,
}

impl RandomMission {
    pub fn from_raw(id: String, raw: &Value) -> Result<Self, RegistryError> {
        let config: Config = decode_config(TAG, raw)?;
        let mut possibility = BTreeMap::new();
        for (key, weight) in config.possibility {
            possibility.insert(parse_mission_key(TAG, &key)?, weight);
        }
        Ok(Self { id, possibility })
    }

    /// Base weight scaled by remaining quota; unavailable candidates weigh 0.
    fn weights(&self, ctx: &ExecContext<'_>, current: MissionId) -> Vec<(MissionId, u64)> {
        self.possibility
            .iter()
            .map(|(id, weight)| {
                let adjusted = match ctx.working().get(*id) {
                    Some(candidate)
                        if *id != current && candidate.status == MissionStatus::Active =>
                    {
                        match candidate.remaining_quota() {
                            Some(remaining) => {
                                u64::from(*weight) * u64::try_from(remaining.max(0)).unwrap_or(0)
                            }
                            None => u64::from(*weight),
                        }
                    }
                    _ => 0,
                };
                (*id, adjusted)
            })
            .collect()
    }
}

/// Picks an entry with probability proportional to its weight.
pub(crate) fn pick_weighted<R: Rng>(weights: &[(MissionId, u64)], rng: &mut R) -> Option<MissionId> {
    let total: u64 = weights.iter().map(|(_, weight)| weight).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.gen_range(0..total);
    for (id, weight) in weights {
        if roll < *weight {
            return Some(*id);
        }
        roll -= weight;
    }
    None
}

impl Completion for RandomMission {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn related_missions(&self, _repo: &dyn MissionRepository) -> MissionResult<Vec<MissionId>> {
        Ok(self.possibility.keys().copied().collect())
    }

    fn complete(
        &self,
        ctx: &ExecContext<'_>,
        mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if ext_i64(complete, &self.id, COMPLETE_KEY).is_some() {
            return Ok(Flow::Continue);
        }

        let weights = self.weights(ctx, mission.id);
        let picked = pick_weighted(&weights, &mut rand::thread_rng())
            .ok_or(MissionError::NotAvailable(mission.id))?;
        debug!(
            "event=random_pick module=rules status=ok mission_id={} picked={} candidates={}",
            mission.id,
            picked,
            weights.len()
        );

        let delegated = ctx.complete_other(picked, ctx.input(), ctx.target_time())?;
        complete.set_ext(&self.id, MISSION_KEY, Value::from(picked));
        complete.set_ext(&self.id, COMPLETE_KEY, Value::from(delegated.id));
        Ok(Flow::Continue)
    }

    fn revert(
        &self,
        ctx: &ExecContext<'_>,
        _mission: &mut Mission,
        complete: &mut Complete,
    ) -> MissionResult<Flow> {
        if let Some(delegated) = ext_i64(complete, &self.id, COMPLETE_KEY) {
            ctx.revert_other(delegated)?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::{pick_weighted, RandomMission};
    use serde_json::json;

    #[test]
    fn zero_weights_are_never_picked() {
        let weights = vec![(10, 1), (20, 0)];
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            assert_eq!(pick_weighted(&weights, &mut rng), Some(10));
        }
        assert_eq!(pick_weighted(&[(20, 0)], &mut rng), None);
    }

    #[test]
    fn parses_string_keyed_weights() {
        let rule = RandomMission::from_raw(
            "random_0".to_string(),
            &json!({"type": "randomMission", "possibility": {"10": 1, "20": 0}}),
        )
        .expect("random config");
        assert_eq!(rule.possibility.get(&10), Some(&1));
        assert_eq!(rule.possibility.get(&20), Some(&0));
    }
}
