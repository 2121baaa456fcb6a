//! Error taxonomy of the simulation core
//!
//! Per-body faults (`NanDetected`, `NumericalOverflow`) isolate the body and
//! never abort a tick; rejected mutations surface as `Err` to the caller.

use thiserror::Error;

use crate::simulation::states::BodyId;

pub type SimResult<T> = Result<T, SimError>;

/// How the server treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged or reported to the caller, the world keeps running untouched
    Recoverable,
    /// The affected body (or restored state) is discarded
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("bodies {a} and {b} are {separation:.3e} apart, inside the softening length")]
    Singularity { a: BodyId, b: BodyId, separation: f64 },

    #[error("state of body {body} overflowed to infinity")]
    NumericalOverflow { body: BodyId },

    #[error("NaN in the state of body {body}")]
    NanDetected { body: BodyId },

    #[error("relative energy error {relative_error:.3e} exceeds {threshold:.3e}")]
    EnergyDivergence { relative_error: f64, threshold: f64 },

    #[error("body limit of {limit} reached")]
    BodyLimitExceeded { limit: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("unknown body {0}")]
    UnknownBody(BodyId),

    #[error("body {0} is fixed and cannot take an impulse")]
    FixedBodyImpulse(BodyId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SimError {
    pub fn severity(&self) -> Severity {
        match self {
            SimError::NumericalOverflow { .. } | SimError::NanDetected { .. } | SimError::InvalidState(_) => {
                Severity::Fatal
            }
            SimError::Singularity { .. }
            | SimError::EnergyDivergence { .. }
            | SimError::BodyLimitExceeded { .. }
            | SimError::InvalidBody(_)
            | SimError::UnknownBody(_)
            | SimError::FixedBodyImpulse(_)
            | SimError::InvalidConfig(_) => Severity::Recoverable,
        }
    }

    /// Stable code sent to clients in `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            SimError::Singularity { .. } => "SINGULARITY",
            SimError::NumericalOverflow { .. } => "NUMERICAL_OVERFLOW",
            SimError::NanDetected { .. } => "NAN_DETECTED",
            SimError::EnergyDivergence { .. } => "ENERGY_DIVERGENCE",
            SimError::BodyLimitExceeded { .. } => "BODY_LIMIT_EXCEEDED",
            SimError::InvalidState(_) => "INVALID_STATE",
            SimError::InvalidBody(_) => "INVALID_BODY",
            SimError::UnknownBody(_) => "UNKNOWN_BODY",
            SimError::FixedBodyImpulse(_) => "FIXED_BODY",
            SimError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}
