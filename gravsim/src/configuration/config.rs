//! Configuration types for loading server scenarios from YAML.
//!
//! A scenario file consists of:
//!
//! - [`ServerConfig`]   – tick rate, sessions, snapshot cadence, network bind address
//! - [`SimConfig`]      – physics settings (every field optional, see `simulation::params`)
//! - `preset`           – an optional built-in body set to start from
//! - [`BodyConfig`]     – extra bodies, added after the preset
//!
//! # YAML format
//!
//! ```yaml
//! server:
//!   tick_rate: 60
//!   max_sessions: 16
//!   bind: "127.0.0.1:7878"
//!   snapshot_interval: 300
//!   owned_body_policy: despawn
//!   seed: "sol"               # number or string
//!
//! simulation:
//!   dt: 3600.0                # simulated seconds per tick
//!   softening: 1.0e6
//!   theta: 0.5
//!
//! preset: sun_earth_moon
//!
//! bodies:
//!   - name: "probe"
//!     kind: asteroid
//!     x: [ 1.6e11, 0.0, 0.0 ]
//!     v: [ 0.0, 2.9e4, 0.0 ]
//!     m: 1.0e3
//!     radius: 10.0
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simulation::error::SimError;
use crate::simulation::params::SimConfig;
use crate::simulation::rng::DeterministicRng;
use crate::simulation::scenario::Preset;
use crate::simulation::states::{BodyKind, BodySpec, NVec3};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read scenario file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed scenario YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error(transparent)]
    Sim(#[from] SimError),
}

/// What happens to a player's avatar when the session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnedBodyPolicy {
    #[default]
    Despawn,
    Persist,
}

/// World seed, as a number or a string hashed into one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Number(u64),
    Text(String),
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Number(42)
    }
}

impl Seed {
    pub fn rng(&self) -> DeterministicRng {
        match self {
            Seed::Number(n) => DeterministicRng::new(*n),
            Seed::Text(s) => DeterministicRng::from_str_seed(s),
        }
    }
}

/// Avatar spawned for every joining player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub mass: f64,
    pub radius: f64,
    pub spawn_distance: f64, // from the primary
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self { mass: 1.0e4, radius: 50.0, spawn_distance: 1.5e11 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_sessions: usize,
    pub bind: String,
    pub snapshot_interval: u64,    // ticks between full snapshots
    pub diagnostics_interval: u64, // ticks between stepResult messages
    pub session_timeout_secs: f64,
    pub owned_body_policy: OwnedBodyPolicy,
    pub seed: Seed,
    /// Overrides for the physics settings most often tuned per server
    pub softening: Option<f64>,
    pub theta: Option<f64>,
    pub avatar: AvatarConfig,
    pub thrust_limit: f64, // max |thrust| accepted from an input, m/s²
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_sessions: 32,
            bind: "127.0.0.1:7878".to_string(),
            snapshot_interval: 300,
            diagnostics_interval: 60,
            session_timeout_secs: 30.0,
            owned_body_policy: OwnedBodyPolicy::Despawn,
            seed: Seed::default(),
            softening: None,
            theta: None,
            avatar: AvatarConfig::default(),
            thrust_limit: 100.0,
        }
    }
}

/// Configuration for a single body's initial state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: BodyKind,
    pub x: Vec<f64>, // initial position [x, y, z]
    pub v: Vec<f64>, // initial velocity [vx, vy, vz]
    pub m: f64,      // mass
    #[serde(default)]
    pub radius: f64,
    #[serde(default)]
    pub fixed: bool,
}

fn default_kind() -> BodyKind {
    BodyKind::Asteroid
}

impl BodyConfig {
    pub fn to_spec(&self) -> Result<BodySpec, ConfigError> {
        let vec = |v: &[f64], what: &str| -> Result<NVec3, ConfigError> {
            match v {
                [x, y, z] => Ok(NVec3::new(*x, *y, *z)),
                _ => Err(ConfigError::Invalid(format!(
                    "body '{}': {what} needs 3 components, got {}",
                    self.name,
                    v.len()
                ))),
            }
        };
        let mut spec = BodySpec::new(self.kind, self.m, self.radius, vec(&self.x, "x")?, vec(&self.v, "v")?)
            .named(self.name.clone());
        spec.fixed = self.fixed;
        Ok(spec)
    }
}

/// Top-level scenario configuration loaded from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub server: ServerConfig,
    pub simulation: SimConfig,
    pub preset: Option<Preset>,
    pub bodies: Vec<BodyConfig>,
}

impl ScenarioConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: ScenarioConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        let cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Physics settings with the server-level overrides applied
    pub fn effective_sim_config(&self) -> SimConfig {
        let mut sim = self.simulation.clone();
        sim.tick_rate = self.server.tick_rate;
        if let Some(eps) = self.server.softening {
            sim.softening = eps;
        }
        if let Some(theta) = self.server.theta {
            sim.theta = theta;
        }
        sim
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.server;
        if s.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be positive".into()));
        }
        if s.snapshot_interval == 0 || s.diagnostics_interval == 0 {
            return Err(ConfigError::Invalid("snapshot and diagnostics intervals must be positive".into()));
        }
        if !(s.session_timeout_secs.is_finite() && s.session_timeout_secs > 0.0) {
            return Err(ConfigError::Invalid("session_timeout_secs must be positive".into()));
        }
        if !(s.thrust_limit.is_finite() && s.thrust_limit >= 0.0) {
            return Err(ConfigError::Invalid("thrust_limit must be non-negative".into()));
        }
        self.effective_sim_config().validate()?;
        for b in &self.bodies {
            b.to_spec()?;
        }
        Ok(())
    }
}
