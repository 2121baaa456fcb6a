//! Per-connection player sessions
//!
//! A connection becomes a session on `join`. The manager keeps at most one
//! pending input per session (latest sequence wins), the smoothed round-trip
//! time the client reports, and the wall-clock time it last heard from the
//! client so idle sessions can be evicted.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::network::protocol::{InputCommand, ProtocolError, MAX_PLAYER_NAME, PROTOCOL_VERSION};
use crate::simulation::states::{BodyId, NVec3, SessionId};

/// Smoothing weight of a new RTT sample
const RTT_ALPHA: f64 = 0.2;

/// Transport-level connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: NVec3,
    pub fov: f64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub connection: ConnectionId,
    pub player_name: String,
    pub body: Option<BodyId>,
    pub is_admin: bool,
    /// Highest input sequence accepted so far
    pub last_input_seq: Option<u64>,
    pending: Option<InputCommand>,
    pub rtt_ms: Option<f64>,
    pub last_seen: Instant,
    pub camera: Option<Camera>,
}

pub struct SessionManager {
    sessions: BTreeMap<SessionId, Session>,
    by_connection: BTreeMap<ConnectionId, SessionId>,
    next_id: u32,
    max_sessions: usize,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self {
            sessions: BTreeMap::new(),
            by_connection: BTreeMap::new(),
            next_id: 1,
            max_sessions,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn by_connection(&self, conn: ConnectionId) -> Option<&Session> {
        self.by_connection.get(&conn).and_then(|id| self.sessions.get(id))
    }

    fn by_connection_mut(&mut self, conn: ConnectionId) -> Option<&mut Session> {
        let id = self.by_connection.get(&conn)?;
        self.sessions.get_mut(id)
    }

    /// Open a session for `conn`. The first player to join while no admin is
    /// connected becomes admin.
    pub fn join(
        &mut self,
        conn: ConnectionId,
        player_name: &str,
        protocol_version: u32,
        now: Instant,
    ) -> Result<SessionId, ProtocolError> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch { client: protocol_version, server: PROTOCOL_VERSION });
        }
        if self.by_connection.contains_key(&conn) {
            return Err(ProtocolError::AlreadyJoined);
        }
        if self.sessions.len() >= self.max_sessions {
            return Err(ProtocolError::ServerFull);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let is_admin = !self.sessions.values().any(|s| s.is_admin);
        let player_name = sanitize_name(player_name, id);

        log::info!("{player_name} joined as {id} on {conn}{}", if is_admin { " (admin)" } else { "" });
        self.sessions.insert(
            id,
            Session {
                id,
                connection: conn,
                player_name,
                body: None,
                is_admin,
                last_input_seq: None,
                pending: None,
                rtt_ms: None,
                last_seen: now,
                camera: None,
            },
        );
        self.by_connection.insert(conn, id);
        Ok(id)
    }

    pub fn leave(&mut self, conn: ConnectionId) -> Option<Session> {
        let id = self.by_connection.remove(&conn)?;
        let session = self.sessions.remove(&id)?;
        log::info!("{} ({id}) left", session.player_name);
        Some(session)
    }

    pub fn touch(&mut self, conn: ConnectionId, now: Instant) {
        if let Some(s) = self.by_connection_mut(conn) {
            s.last_seen = s.last_seen.max(now);
        }
    }

    pub fn set_body(&mut self, id: SessionId, body: Option<BodyId>) {
        if let Some(s) = self.sessions.get_mut(&id) {
            s.body = body;
        }
    }

    pub fn set_camera(&mut self, conn: ConnectionId, camera: Camera) {
        if let Some(s) = self.by_connection_mut(conn) {
            s.camera = Some(camera);
        }
    }

    /// Fold a client-measured round trip into the smoothed estimate
    pub fn record_rtt(&mut self, conn: ConnectionId, rtt_ms: f64) {
        if !(rtt_ms.is_finite() && rtt_ms >= 0.0) {
            return;
        }
        if let Some(s) = self.by_connection_mut(conn) {
            s.rtt_ms = Some(match s.rtt_ms {
                Some(prev) => prev + RTT_ALPHA * (rtt_ms - prev),
                None => rtt_ms,
            });
        }
    }

    /// Queue an input. Returns `false` when its sequence is not newer than one
    /// already accepted; the newest pending input replaces older ones.
    pub fn record_input(&mut self, conn: ConnectionId, input: InputCommand) -> Result<bool, ProtocolError> {
        let s = self.by_connection_mut(conn).ok_or(ProtocolError::NotJoined)?;
        if s.last_input_seq.is_some_and(|last| input.sequence <= last) {
            log::warn!("{}: dropped stale input {} (last {:?})", s.id, input.sequence, s.last_input_seq);
            return Ok(false);
        }
        s.last_input_seq = Some(input.sequence);
        s.pending = Some(input);
        Ok(true)
    }

    /// Drain pending inputs in session order
    pub fn take_pending_inputs(&mut self) -> Vec<(SessionId, InputCommand)> {
        self.sessions
            .values_mut()
            .filter_map(|s| s.pending.take().map(|input| (s.id, input)))
            .collect()
    }

    /// Connections idle for longer than the timeout
    pub fn expired(&self, now: Instant) -> Vec<ConnectionId> {
        self.sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_seen) > self.timeout)
            .map(|s| s.connection)
            .collect()
    }
}

fn sanitize_name(raw: &str, id: SessionId) -> String {
    let name: String = raw.trim().chars().filter(|c| !c.is_control()).take(MAX_PLAYER_NAME).collect();
    if name.is_empty() {
        format!("player-{}", id.0)
    } else {
        name
    }
}
