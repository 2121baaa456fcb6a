//! Numerical and physical parameters for the simulation
//!
//! `SimConfig` holds runtime settings:
//! - tick rate and physics step size,
//! - gravitational constant, softening length and the Barnes–Hut opening angle,
//! - solver selection, adaptive integrator tolerances and close-encounter thresholds,
//! - collision handling, body limit and diagnostics thresholds
//!
//! Every field has a default so YAML scenarios only name what they change.

use serde::{Deserialize, Serialize};

use crate::simulation::error::{SimError, SimResult};

/// Gravitational constant in SI units (m³ kg⁻¹ s⁻²)
pub const G_SI: f64 = 6.674_30e-11;

/// What happens when two bodies overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionMode {
    None,
    #[default]
    Merge,
    Bounce,
}

/// Gravity solver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Direct,
    BarnesHut,
    /// Direct summation up to `direct_threshold` active bodies, tree above
    #[default]
    Auto,
}

/// Step-size control for the adaptive RKF45 integrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    pub rtol: f64,   // relative error tolerance
    pub atol: f64,   // absolute error tolerance
    pub min_dt: f64, // smallest substep before accepting anyway
    pub max_dt: f64, // largest substep
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            rtol: 1e-9,
            atol: 1e-12,
            min_dt: 1e-9,
            max_dt: 1e3,
        }
    }
}

/// Close-encounter classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncounterParams {
    /// Pair flagged when `d < hill_factor * (h_i + h_j)`
    pub hill_factor: f64,
    /// Pair flagged when the partner's pull exceeds this multiple of everything else
    pub tidal_ratio: Option<f64>,
    /// Pair flagged when the relative jerk scale exceeds this (1/s²)
    pub jerk_norm: Option<f64>,
    /// Thresholds of an already flagged pair are relaxed by `1 + hysteresis`
    pub hysteresis: f64,
    pub max_subset_size: usize,
}

impl Default for EncounterParams {
    fn default() -> Self {
        Self {
            hill_factor: 0.1,
            tidal_ratio: Some(2.0),
            jerk_norm: None,
            hysteresis: 0.1,
            max_subset_size: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub tick_rate: u32, // server ticks per wall-clock second
    pub dt: f64,        // simulated seconds per tick
    #[serde(alias = "G")]
    pub gravitational_constant: f64,
    pub softening: f64, // Plummer softening length ε
    pub theta: f64,     // Barnes–Hut opening angle
    pub solver: SolverKind,
    pub direct_threshold: usize,
    pub max_tree_depth: usize,
    pub max_substeps: u32,
    pub adaptive: AdaptiveParams,
    pub collision_mode: CollisionMode,
    pub restitution: f64, // bounce coefficient in [0, 1]
    pub encounter: EncounterParams,
    pub max_bodies: usize,
    pub energy_drift_threshold: f64, // relative energy error that triggers a warning
    pub compaction_threshold: usize, // inactive bodies tolerated before compaction
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            dt: 1.0 / 60.0,
            gravitational_constant: G_SI,
            softening: 1.0e3,
            theta: 0.5,
            solver: SolverKind::Auto,
            direct_threshold: 64,
            max_tree_depth: 32,
            max_substeps: 64,
            adaptive: AdaptiveParams::default(),
            collision_mode: CollisionMode::Merge,
            restitution: 0.5,
            encounter: EncounterParams::default(),
            max_bodies: 10_000,
            energy_drift_threshold: 1e-3,
            compaction_threshold: 64,
        }
    }
}

impl SimConfig {
    /// Squared softening length, the ε² added to every pairwise distance
    pub fn eps2(&self) -> f64 {
        self.softening * self.softening
    }

    /// Whether `active` bodies are few enough for direct summation
    pub fn use_direct(&self, active: usize) -> bool {
        match self.solver {
            SolverKind::Direct => true,
            SolverKind::BarnesHut => false,
            SolverKind::Auto => active <= self.direct_threshold,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        fn check(ok: bool, what: &str) -> SimResult<()> {
            if ok {
                Ok(())
            } else {
                Err(SimError::InvalidConfig(what.to_string()))
            }
        }

        check(self.tick_rate > 0, "tick_rate must be positive")?;
        check(self.dt.is_finite() && self.dt > 0.0, "dt must be finite and positive")?;
        check(
            self.gravitational_constant.is_finite() && self.gravitational_constant > 0.0,
            "gravitational_constant must be finite and positive",
        )?;
        check(self.softening.is_finite() && self.softening >= 0.0, "softening must be finite and non-negative")?;
        check(self.theta.is_finite() && self.theta >= 0.0, "theta must be finite and non-negative")?;
        check(self.max_tree_depth > 0, "max_tree_depth must be positive")?;
        check(self.max_substeps > 0, "max_substeps must be positive")?;
        check(
            self.adaptive.rtol >= 0.0 && self.adaptive.atol >= 0.0 && self.adaptive.rtol + self.adaptive.atol > 0.0,
            "adaptive tolerances must be non-negative and not both zero",
        )?;
        check(
            self.adaptive.min_dt > 0.0 && self.adaptive.max_dt >= self.adaptive.min_dt,
            "adaptive step bounds need 0 < min_dt <= max_dt",
        )?;
        check((0.0..=1.0).contains(&self.restitution), "restitution must lie in [0, 1]")?;
        check(
            self.encounter.hill_factor.is_finite() && self.encounter.hill_factor >= 0.0,
            "hill_factor must be finite and non-negative",
        )?;
        check(
            self.encounter.hysteresis.is_finite() && self.encounter.hysteresis >= 0.0,
            "hysteresis must be finite and non-negative",
        )?;
        check(
            [self.encounter.tidal_ratio, self.encounter.jerk_norm]
                .iter()
                .flatten()
                .all(|t| t.is_finite() && *t > 0.0),
            "tidal_ratio and jerk_norm must be positive when set",
        )?;
        check(self.energy_drift_threshold > 0.0, "energy_drift_threshold must be positive")?;
        check(self.max_bodies > 0, "max_bodies must be positive")?;
        Ok(())
    }
}
