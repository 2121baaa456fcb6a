//! Serializable world snapshots for save / restore and exact replay
//!
//! A checkpoint holds everything the next tick depends on. JSON is written
//! with shortest round-trip float formatting and parsed with
//! `float_roundtrip`, so a save / load cycle reproduces every bit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::simulation::encounter::BodyPair;
use crate::simulation::error::{SimError, SimResult};
use crate::simulation::params::SimConfig;
use crate::simulation::states::{is_finite3, Body};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: u32,
    pub tick: u64,
    pub sim_time: f64,
    pub bodies: Vec<Body>,
    pub rng_state: [u64; 4],
    pub config: SimConfig,
    pub next_body_id: u32,
    pub encounter_pairs: Vec<BodyPair>,
    pub energy_baseline: Option<f64>,
    #[serde(default)]
    pub degraded: bool,
}

impl Checkpoint {
    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string(self).map_err(|e| SimError::InvalidState(format!("checkpoint encode: {e}")))
    }

    pub fn from_json(text: &str) -> SimResult<Self> {
        let cp: Checkpoint =
            serde_json::from_str(text).map_err(|e| SimError::InvalidState(format!("checkpoint decode: {e}")))?;
        cp.validate()?;
        Ok(cp)
    }

    /// Structural checks run before a checkpoint replaces live state
    pub fn validate(&self) -> SimResult<()> {
        let invalid = |msg: String| Err(SimError::InvalidState(msg));

        if self.version != CHECKPOINT_VERSION {
            return invalid(format!("unsupported checkpoint version {}", self.version));
        }
        if self.rng_state == [0; 4] {
            return invalid("rng state is all zero".into());
        }
        if !self.sim_time.is_finite() {
            return invalid("sim time is not finite".into());
        }
        self.config.validate().map_err(|e| SimError::InvalidState(e.to_string()))?;

        // ids strictly increasing implies unique and keeps the array in id order
        for w in self.bodies.windows(2) {
            if w[0].core.id >= w[1].core.id {
                return invalid(format!("body ids out of order or duplicated at {}", w[1].core.id));
            }
        }
        for b in &self.bodies {
            if b.core.id.0 >= self.next_body_id {
                return invalid(format!("body {} is not below next id {}", b.core.id, self.next_body_id));
            }
            if b.state.active && !(is_finite3(&b.state.x) && is_finite3(&b.state.v)) {
                return invalid(format!("active body {} has a non-finite state", b.core.id));
            }
            if !b.core.fixed && b.core.mass <= 0.0 {
                return invalid(format!("body {} has non-positive mass", b.core.id));
            }
        }

        let ids: BTreeSet<_> = self.bodies.iter().map(|b| b.core.id).collect();
        for (a, b) in &self.encounter_pairs {
            if !ids.contains(a) || !ids.contains(b) {
                return invalid(format!("encounter pair ({a}, {b}) references an unknown body"));
            }
        }
        for b in &self.bodies {
            if let Some(d) = b.state.dominant {
                if !ids.contains(&d) {
                    return invalid(format!("body {} orbits unknown body {d}", b.core.id));
                }
            }
        }
        Ok(())
    }
}
