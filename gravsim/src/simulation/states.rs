//! Core state types for the N-body simulation.
//!
//! Defines the vector type and the body model:
//! - `NVec3` (3d, double precision) for every position / velocity / acceleration
//! - `BodyCore` (identity and physical constants) and `BodyState` (phase-space state)
//! - `Body`, the pair of both, stored in id order by the world
//!
//! Vectors are `Copy` values. A binding is read-only unless declared `mut`,
//! and all mutable physics state lives in `BodyState` fields reached through `&mut`.

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub type NVec3 = Vector3<f64>;

/// True when every component is a finite float
pub fn is_finite3(v: &NVec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// True when any component is NaN
pub fn has_nan3(v: &NVec3) -> bool {
    v.x.is_nan() || v.y.is_nan() || v.z.is_nan()
}

/// Build a vector from a `[x, y, z]` array (wire and config format)
pub fn vec3(a: [f64; 3]) -> NVec3 {
    NVec3::new(a[0], a[1], a[2])
}

/// Stable body identifier, never reused within a world
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u32);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a client session (owner of player bodies)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Closed set of body categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    Star,
    Planet,
    Moon,
    Asteroid,
    Debris,
    PlayerAvatar,
}

impl BodyKind {
    /// Rank deciding which body survives a merge when masses are equal
    pub fn merge_rank(self) -> u8 {
        match self {
            BodyKind::Star => 5,
            BodyKind::Planet => 4,
            BodyKind::Moon => 3,
            BodyKind::PlayerAvatar => 2,
            BodyKind::Asteroid => 1,
            BodyKind::Debris => 0,
        }
    }

    /// Whether this body carries a sphere of influence other bodies can fall into
    pub fn is_attractor(self) -> bool {
        match self {
            BodyKind::Star | BodyKind::Planet | BodyKind::Moon => true,
            BodyKind::Asteroid | BodyKind::Debris | BodyKind::PlayerAvatar => false,
        }
    }
}

/// Which integrator advanced a body on the last tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorMode {
    #[default]
    Symplectic,
    Adaptive,
}

/// Identity and physical constants of a body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyCore {
    pub id: BodyId,
    pub name: String,
    pub kind: BodyKind,
    pub mass: f64,   // > 0 unless fixed
    pub radius: f64, // collision radius
    pub fixed: bool, // excluded from integration, still attracts
    pub owner: Option<SessionId>,
}

/// Phase-space state of a body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    pub x: NVec3,      // position
    pub v: NVec3,      // velocity
    pub a: NVec3,      // acceleration at x
    pub a_prev: NVec3, // acceleration at the start of the previous tick
    pub active: bool,  // false once removed (soft deletion)
    #[serde(default)]
    pub mode: IntegratorMode,
    #[serde(default)]
    pub dominant: Option<BodyId>, // sphere-of-influence parent
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub core: BodyCore,
    pub state: BodyState,
}

impl Body {
    pub fn id(&self) -> BodyId {
        self.core.id
    }

    /// Active and not fixed, i.e. advanced by an integrator
    pub fn is_dynamic(&self) -> bool {
        self.state.active && !self.core.fixed
    }

    pub fn momentum(&self) -> NVec3 {
        self.state.v * self.core.mass
    }

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.core.mass * self.state.v.norm_squared()
    }

    pub fn distance_to(&self, other: &Body) -> f64 {
        (self.state.x - other.state.x).norm()
    }
}

/// Everything needed to add a body; the world assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct BodySpec {
    pub name: String,
    pub kind: BodyKind,
    pub mass: f64,
    pub radius: f64,
    pub fixed: bool,
    pub owner: Option<SessionId>,
    pub position: NVec3,
    pub velocity: NVec3,
}

impl BodySpec {
    pub fn new(kind: BodyKind, mass: f64, radius: f64, position: NVec3, velocity: NVec3) -> Self {
        Self {
            name: String::new(),
            kind,
            mass,
            radius,
            fixed: false,
            owner: None,
            position,
            velocity,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    pub fn owned_by(mut self, owner: SessionId) -> Self {
        self.owner = Some(owner);
        self
    }
}
