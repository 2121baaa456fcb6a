//! Wire messages between the authoritative server and its clients.
//!
//! Control messages are JSON objects tagged by a `type` field with camelCase
//! field names. Positions travel separately in the binary frame of
//! [`crate::network::codec`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::simulation::error::SimError;
use crate::simulation::events::SimEvent;
use crate::simulation::states::{Body, BodyId, BodyKind, IntegratorMode, NVec3, SessionId};
use crate::simulation::world::StepReport;

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest JSON text message accepted from a client
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

pub const MAX_PLAYER_NAME: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        player_name: String,
        protocol_version: u32,
    },
    Leave,
    Input(InputCommand),
    RequestSnapshot,
    CameraUpdate {
        position: NVec3,
        fov: f64,
    },
    AdminCommand {
        cmd: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// `rtt` is the round trip the client measured from the previous pong
    Ping {
        timestamp: f64,
        #[serde(default)]
        rtt: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCommand {
    pub sequence: u64,
    /// Requested acceleration of the player's avatar, m/s²
    #[serde(default = "NVec3::zeros")]
    pub thrust_vector: NVec3,
    #[serde(default)]
    pub spawn: Option<SpawnRequest>,
    #[serde(default)]
    pub despawn: Option<BodyId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    pub kind: BodyKind,
    pub mass: f64,
    pub radius: f64,
    pub position: NVec3,
    pub velocity: NVec3,
    #[serde(default)]
    pub name: String,
}

/// Client-facing view of one body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodySnapshot {
    pub id: BodyId,
    pub name: String,
    pub kind: BodyKind,
    pub mass: f64,
    pub radius: f64,
    pub position: NVec3,
    pub velocity: NVec3,
    pub fixed: bool,
    pub owner: Option<SessionId>,
    pub mode: IntegratorMode,
    pub dominant: Option<BodyId>,
}

impl From<&Body> for BodySnapshot {
    fn from(b: &Body) -> Self {
        Self {
            id: b.core.id,
            name: b.core.name.clone(),
            kind: b.core.kind,
            mass: b.core.mass,
            radius: b.core.radius,
            position: b.state.x,
            velocity: b.state.v,
            fixed: b.core.fixed,
            owner: b.core.owner,
            mode: b.state.mode,
            dominant: b.state.dominant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Snapshot {
        tick: u64,
        sim_time: f64,
        bodies: Vec<BodySnapshot>,
        your_session: Option<SessionId>,
    },
    /// Body set changes; precedes the position frame of the same tick
    Delta {
        tick: u64,
        added: Vec<BodySnapshot>,
        removed: Vec<BodyId>,
    },
    StepResult {
        tick: u64,
        diagnostics: StepReport,
    },
    PlayerJoined {
        session_id: SessionId,
        player_name: String,
        body_id: Option<BodyId>,
    },
    PlayerLeft {
        session_id: SessionId,
    },
    Event {
        tick: u64,
        #[serde(flatten)]
        event: SimEvent,
    },
    Pong {
        timestamp: f64,
        server_time: f64,
    },
    Error {
        code: String,
        message: String,
    },
    AdminResponse {
        success: bool,
        data: serde_json::Value,
    },
    InputAck {
        sequence: u64,
        tick: u64,
    },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error { code: code.to_string(), message: message.into() }
    }
}

impl From<&SimError> for ServerMessage {
    fn from(e: &SimError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("position frame of {0} bytes is shorter than its header")]
    ShortFrame(usize),

    #[error("position frame declares {expected} bytes but holds {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("protocol version {client} is not supported (server speaks {server})")]
    VersionMismatch { client: u32, server: u32 },

    #[error("join before sending other messages")]
    NotJoined,

    #[error("this connection already joined")]
    AlreadyJoined,

    #[error("admin rights required")]
    NotAdmin,

    #[error("server is full")]
    ServerFull,

    #[error("clients may not send binary frames")]
    UnexpectedBinary,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "MALFORMED",
            ProtocolError::TooLarge { .. } => "TOO_LARGE",
            ProtocolError::ShortFrame(_) | ProtocolError::FrameLength { .. } => "BAD_FRAME",
            ProtocolError::VersionMismatch { .. } => "VERSION_MISMATCH",
            ProtocolError::NotJoined => "NOT_JOINED",
            ProtocolError::AlreadyJoined => "ALREADY_JOINED",
            ProtocolError::NotAdmin => "NOT_ADMIN",
            ProtocolError::ServerFull => "SERVER_FULL",
            ProtocolError::UnexpectedBinary => "UNEXPECTED_BINARY",
        }
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(e: &ProtocolError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}
