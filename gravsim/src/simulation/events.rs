//! Discrete world events, pushed to clients as they happen

use serde::{Deserialize, Serialize};

use crate::simulation::collision::CollisionOutcome;
use crate::simulation::encounter::BodyPair;
use crate::simulation::states::{BodyId, BodyKind, IntegratorMode, SessionId};

/// Why a body left the simulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RemovalReason {
    Explicit,
    Merged { into: BodyId },
    /// Non-finite state, isolated by the world
    Fault,
}

/// Conservation and integration-quality warnings. They never block a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConservationWarning {
    EnergyDrift { relative_error: f64, threshold: f64 },
    /// Flagged pairs that did not fit into the adaptive subset
    SubsetOverflow { pairs: Vec<BodyPair>, max_subset_size: usize },
    /// The adaptive integrator ran out of substeps and forced the last one
    AdaptiveNotConverged { bodies: Vec<BodyId>, substeps: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SimEvent {
    Collision { a: BodyId, b: BodyId, separation: f64, outcome: CollisionOutcome },
    SoiTransition { body: BodyId, from: Option<BodyId>, to: Option<BodyId> },
    IntegratorSwitch { body: BodyId, mode: IntegratorMode },
    ConservationWarning(ConservationWarning),
    BodyAdded { body: BodyId, kind: BodyKind, owner: Option<SessionId> },
    BodyRemoved { body: BodyId, reason: RemovalReason },
    BodyFault { body: BodyId, code: String, message: String },
}
