//! The authoritative server: owns the world and every session, and turns one
//! fixed-rate tick into outbound messages.
//!
//! The transport only enqueues [`Inbound`] items. Everything that touches the
//! world happens inside [`AuthoritativeServer::tick`], in this order:
//!
//! 1. drain the inbound queue (joins, leaves, messages, disconnects)
//! 2. evict sessions idle past the timeout
//! 3. apply each session's latest pending input
//! 4. apply deferred body removals
//! 5. step the world (unless paused)
//! 6. broadcast events, the body-set delta, snapshots, the position frame and
//!    periodic step results
//!
//! Time is a parameter so tests drive the clock.

use std::collections::{BTreeSet, VecDeque};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::configuration::config::{ConfigError, OwnedBodyPolicy, ScenarioConfig, ServerConfig};
use crate::network::codec::{decode_client_message, encode_positions, encode_server_message};
use crate::network::protocol::{BodySnapshot, ClientMessage, InputCommand, ProtocolError, ServerMessage, SpawnRequest};
use crate::network::session::{Camera, ConnectionId, SessionManager};
use crate::simulation::checkpoint::Checkpoint;
use crate::simulation::encounter::primary_index;
use crate::simulation::error::{Severity, SimError};
use crate::simulation::params::{SimConfig, SolverKind};
use crate::simulation::scenario::{Preset, Scenario};
use crate::simulation::states::{BodyId, BodyKind, BodySpec, NVec3, SessionId};
use crate::simulation::world::{SimulationWorld, StepReport};

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connected(ConnectionId),
    Text(ConnectionId, String),
    Binary(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub connection: ConnectionId,
    pub payload: Payload,
}

pub struct AuthoritativeServer {
    config: ServerConfig,
    world: SimulationWorld,
    sessions: SessionManager,
    inbox: VecDeque<Inbound>,
    outbox: Vec<Outbound>,
    pending_removals: Vec<BodyId>,
    /// Active body ids as last announced to clients
    announced: BTreeSet<BodyId>,
    force_snapshot: bool,
    paused: bool,
    ticks: u64,
    started: Instant,
    last_report: Option<StepReport>,
}

impl AuthoritativeServer {
    pub fn new(config: ServerConfig, world: SimulationWorld, now: Instant) -> Self {
        let timeout = Duration::from_secs_f64(config.session_timeout_secs);
        let sessions = SessionManager::new(config.max_sessions, timeout);
        let announced = world.active_ids().into_iter().collect();
        Self {
            config,
            world,
            sessions,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            pending_removals: Vec::new(),
            announced,
            force_snapshot: false,
            paused: false,
            ticks: 0,
            started: now,
            last_report: None,
        }
    }

    pub fn from_scenario(cfg: &ScenarioConfig, now: Instant) -> Result<Self, ConfigError> {
        let world = Scenario::build(cfg)?;
        log::info!(
            "server ready: {} bodies, {} Hz, up to {} sessions",
            world.active_count(),
            cfg.server.tick_rate,
            cfg.server.max_sessions
        );
        Ok(Self::new(cfg.server.clone(), world, now))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn world(&self) -> &SimulationWorld {
        &self.world
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn last_report(&self) -> Option<&StepReport> {
        self.last_report.as_ref()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64)
    }

    /// Queue a transport event for the next tick
    pub fn enqueue(&mut self, inbound: Inbound) {
        self.inbox.push_back(inbound);
    }

    pub fn tick(&mut self, now: Instant) -> Vec<Outbound> {
        // (1)
        while let Some(inbound) = self.inbox.pop_front() {
            self.handle_inbound(inbound, now);
        }

        // (2)
        for conn in self.sessions.expired(now) {
            log::info!("{conn} timed out");
            self.end_session(conn);
            self.outbox.push(Outbound { connection: conn, payload: Payload::Close });
        }

        // (3)
        for (sid, input) in self.sessions.take_pending_inputs() {
            self.apply_input(sid, input);
        }

        // (4)
        for id in std::mem::take(&mut self.pending_removals) {
            if let Err(e) = self.world.remove_body(id) {
                log::debug!("deferred removal of {id} skipped: {e}");
            }
        }

        // (5)
        let events = if self.paused {
            self.world.take_events()
        } else {
            match self.world.step(self.world.config().dt) {
                Ok(mut report) => {
                    let events = std::mem::take(&mut report.events);
                    self.last_report = Some(report);
                    events
                }
                Err(e) => {
                    match e.severity() {
                        Severity::Fatal => log::error!("tick {} failed: {e}", self.world.tick()),
                        Severity::Recoverable => log::warn!("tick {} skipped: {e}", self.world.tick()),
                    }
                    self.world.take_events()
                }
            }
        };
        self.ticks += 1;

        // (6)
        let tick = self.world.tick();
        for event in events {
            self.broadcast(&ServerMessage::Event { tick, event });
        }
        self.broadcast_delta();
        if self.force_snapshot || self.ticks % self.config.snapshot_interval.max(1) == 0 {
            self.force_snapshot = false;
            for (sid, conn) in self.session_connections() {
                self.send_snapshot(conn, Some(sid));
            }
        }
        let frame = encode_positions(tick, &self.world.positions_flat());
        for (_, conn) in self.session_connections() {
            self.outbox.push(Outbound { connection: conn, payload: Payload::Binary(frame.clone()) });
        }
        if self.ticks % self.config.diagnostics_interval.max(1) == 0 {
            if let Some(report) = &self.last_report {
                let msg = ServerMessage::StepResult { tick: report.tick, diagnostics: report.clone() };
                self.broadcast(&msg);
            }
        }

        std::mem::take(&mut self.outbox)
    }

    // inbound ==============================================================================

    fn handle_inbound(&mut self, inbound: Inbound, now: Instant) {
        match inbound {
            Inbound::Connected(conn) => log::debug!("{conn} connected"),
            Inbound::Closed(conn) => {
                log::debug!("{conn} closed");
                self.end_session(conn);
            }
            Inbound::Binary(conn, _) => self.reject(conn, &ProtocolError::UnexpectedBinary),
            Inbound::Text(conn, text) => {
                self.sessions.touch(conn, now);
                match decode_client_message(&text) {
                    Ok(msg) => self.handle_message(conn, msg, now),
                    Err(e) => self.reject(conn, &e),
                }
            }
        }
    }

    fn handle_message(&mut self, conn: ConnectionId, msg: ClientMessage, now: Instant) {
        if let ClientMessage::Join { player_name, protocol_version } = &msg {
            self.join(conn, player_name, *protocol_version, now);
            return;
        }
        let Some(session) = self.sessions.by_connection(conn) else {
            self.reject(conn, &ProtocolError::NotJoined);
            return;
        };
        let (sid, is_admin) = (session.id, session.is_admin);

        match msg {
            ClientMessage::Join { .. } => {}
            ClientMessage::Leave => self.end_session(conn),
            ClientMessage::Input(input) => {
                if let Err(e) = self.sessions.record_input(conn, input) {
                    self.reject(conn, &e);
                }
            }
            ClientMessage::RequestSnapshot => self.send_snapshot(conn, Some(sid)),
            ClientMessage::CameraUpdate { position, fov } => {
                self.sessions.set_camera(conn, Camera { position, fov });
            }
            ClientMessage::AdminCommand { cmd, args } => {
                if !is_admin {
                    self.reject(conn, &ProtocolError::NotAdmin);
                    return;
                }
                let (success, data) = match self.admin(&cmd, &args) {
                    Ok(data) => (true, data),
                    Err(message) => {
                        log::warn!("admin command '{cmd}' from {sid} failed: {message}");
                        (false, Value::String(message))
                    }
                };
                self.send(conn, &ServerMessage::AdminResponse { success, data });
            }
            ClientMessage::Ping { timestamp, rtt } => {
                if let Some(rtt) = rtt {
                    self.sessions.record_rtt(conn, rtt);
                }
                let server_time = now.saturating_duration_since(self.started).as_secs_f64() * 1000.0;
                self.send(conn, &ServerMessage::Pong { timestamp, server_time });
            }
        }
    }

    fn join(&mut self, conn: ConnectionId, player_name: &str, protocol_version: u32, now: Instant) {
        let sid = match self.sessions.join(conn, player_name, protocol_version, now) {
            Ok(sid) => sid,
            Err(e) => {
                self.reject(conn, &e);
                return;
            }
        };
        let body = self.bind_new_avatar(sid, conn);

        self.send_snapshot(conn, Some(sid));
        let name = self.sessions.get(sid).map(|s| s.player_name.clone()).unwrap_or_default();
        self.broadcast(&ServerMessage::PlayerJoined { session_id: sid, player_name: name, body_id: body });
    }

    /// Close a session, handling its bodies per the owned-body policy.
    /// Removals are deferred to the tick's removal phase.
    fn end_session(&mut self, conn: ConnectionId) {
        let Some(session) = self.sessions.leave(conn) else {
            return;
        };
        let owned: Vec<BodyId> = self
            .world
            .active_bodies()
            .filter(|b| b.core.owner == Some(session.id))
            .map(|b| b.core.id)
            .collect();
        self.release_bodies(owned);
        self.broadcast(&ServerMessage::PlayerLeft { session_id: session.id });
    }

    /// Bodies whose owner is gone: despawned at the next removal phase or left unowned
    fn release_bodies(&mut self, ids: Vec<BodyId>) {
        match self.config.owned_body_policy {
            OwnedBodyPolicy::Despawn => self.pending_removals.extend(ids),
            OwnedBodyPolicy::Persist => {
                for id in ids {
                    if let Err(e) = self.world.set_owner(id, None) {
                        log::debug!("could not release {id}: {e}");
                    }
                }
            }
        }
    }

    /// Re-tie sessions and bodies after the world was replaced under them.
    /// A session keeps its avatar only if the restored world still has it
    /// active and owned by that session; otherwise it gets a new one.
    fn reconcile_sessions(&mut self) {
        let live: BTreeSet<SessionId> = self.sessions.iter().map(|s| s.id).collect();
        let orphaned: Vec<BodyId> = self
            .world
            .active_bodies()
            .filter(|b| b.core.owner.is_some_and(|owner| !live.contains(&owner)))
            .map(|b| b.core.id)
            .collect();
        if !orphaned.is_empty() {
            log::info!("{} restored bodies have no live owner", orphaned.len());
        }
        self.release_bodies(orphaned);

        for (sid, conn) in self.session_connections() {
            let avatar = self.sessions.get(sid).and_then(|s| s.body);
            if !avatar.is_some_and(|id| self.owns(sid, id)) {
                self.bind_new_avatar(sid, conn);
            }
        }
    }

    fn owns(&self, sid: SessionId, id: BodyId) -> bool {
        self.world.body(id).is_some_and(|b| b.state.active && b.core.owner == Some(sid))
    }

    // inputs ===============================================================================

    fn apply_input(&mut self, sid: SessionId, input: InputCommand) {
        let Some(session) = self.sessions.get(sid) else {
            return;
        };
        let (conn, avatar) = (session.connection, session.body);
        let dt = self.world.config().dt;

        let thrust = clamp_norm(input.thrust_vector, self.config.thrust_limit);
        match avatar {
            _ if thrust == NVec3::zeros() => {}
            Some(body) if self.owns(sid, body) => {
                if let Err(e) = self.world.apply_impulse(body, thrust * dt) {
                    log::warn!("{sid}: thrust rejected: {e}");
                    self.send(conn, &ServerMessage::from(&e));
                }
            }
            Some(body) => {
                log::warn!("{sid}: thrust on {body}, which it does not own");
                self.send(conn, &ServerMessage::error("NOT_OWNER", format!("body {body} is not yours")));
            }
            None => {}
        }

        if let Some(spawn) = input.spawn {
            if let Err(e) = self.world.add_body(spawn_spec(spawn, sid)) {
                log::warn!("{sid}: spawn rejected: {e}");
                self.send(conn, &ServerMessage::from(&e));
            }
        }

        if let Some(id) = input.despawn {
            let owner = self.world.body(id).filter(|b| b.state.active).map(|b| b.core.owner);
            match owner {
                Some(owner) if owner == Some(sid) => self.pending_removals.push(id),
                Some(_) => self.send(conn, &ServerMessage::error("NOT_OWNER", format!("body {id} is not yours"))),
                None => self.send(conn, &ServerMessage::from(&SimError::UnknownBody(id))),
            }
        }

        let tick = self.world.tick();
        self.send(conn, &ServerMessage::InputAck { sequence: input.sequence, tick });
    }

    /// Circular orbit around the primary at the configured distance, random phase
    fn spawn_avatar(&mut self, sid: SessionId) -> Result<BodyId, SimError> {
        let avatar = self.config.avatar.clone();
        let g = self.world.config().gravitational_constant;
        let primary = primary_index(self.world.bodies()).map(|p| {
            let b = &self.world.bodies()[p];
            (b.state.x, b.state.v, b.core.mass)
        });

        let phase = self.world.rng_mut().range(0.0, TAU);
        let dir = NVec3::new(phase.cos(), phase.sin(), 0.0);
        let tangent = NVec3::new(-phase.sin(), phase.cos(), 0.0);
        let (x, v) = match primary {
            Some((px, pv, m)) => {
                let speed = (g * m / avatar.spawn_distance).sqrt();
                (px + dir * avatar.spawn_distance, pv + tangent * speed)
            }
            None => (dir * avatar.spawn_distance, NVec3::zeros()),
        };

        let name = self.sessions.get(sid).map(|s| s.player_name.clone()).unwrap_or_default();
        let spec = BodySpec::new(BodyKind::PlayerAvatar, avatar.mass, avatar.radius, x, v)
            .named(name)
            .owned_by(sid);
        self.world.add_body(spec)
    }

    /// Spawn and bind a fresh avatar, telling the session when that fails
    fn bind_new_avatar(&mut self, sid: SessionId, conn: ConnectionId) -> Option<BodyId> {
        let body = match self.spawn_avatar(sid) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("no avatar for {sid}: {e}");
                self.send(conn, &ServerMessage::from(&e));
                None
            }
        };
        self.sessions.set_body(sid, body);
        body
    }

    // admin ================================================================================

    fn admin(&mut self, cmd: &str, args: &Value) -> Result<Value, String> {
        match cmd {
            "pause" => {
                self.paused = true;
                Ok(json!({ "paused": true }))
            }
            "resume" => {
                self.paused = false;
                Ok(json!({ "paused": false }))
            }
            "status" => {
                let cfg = self.world.config();
                Ok(json!({
                    "tick": self.world.tick(),
                    "simTime": self.world.sim_time(),
                    "paused": self.paused,
                    "bodies": self.world.active_count(),
                    "sessions": self.sessions.len(),
                    "degraded": self.world.is_degraded(),
                    "dt": cfg.dt,
                    "solver": cfg.solver,
                    "theta": cfg.theta,
                    "softening": cfg.softening,
                    "diagnostics": serde_json::to_value(self.world.measure()).map_err(|e| e.to_string())?,
                }))
            }
            "checkpoint" => serde_json::to_value(self.world.create_checkpoint()).map_err(|e| e.to_string()),
            "restore" => {
                let raw = args.get("checkpoint").unwrap_or(args);
                let cp: Checkpoint = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
                self.world.restore_checkpoint(&cp).map_err(|e| e.to_string())?;
                self.pending_removals.clear();
                self.last_report = None;
                self.reconcile_sessions();
                // respawned avatars reach clients through the snapshot
                self.world.take_events();
                self.force_snapshot = true;
                Ok(json!({ "tick": cp.tick, "bodies": self.world.active_count() }))
            }
            "setTheta" => {
                let theta = number_arg(args, "theta")?;
                self.world.set_theta(theta).map_err(|e| e.to_string())?;
                Ok(json!({ "theta": theta }))
            }
            "setSoftening" => {
                let softening = number_arg(args, "softening")?;
                self.world.set_softening(softening).map_err(|e| e.to_string())?;
                Ok(json!({ "softening": softening }))
            }
            "setDt" => {
                let dt = number_arg(args, "dt")?;
                self.update_config(|c| c.dt = dt)?;
                Ok(json!({ "dt": dt }))
            }
            "setSolver" => {
                let raw = args.get("solver").unwrap_or(args);
                let solver: SolverKind = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
                self.update_config(|c| c.solver = solver)?;
                Ok(json!({ "solver": solver }))
            }
            "setEncounter" => {
                let mut config = self.world.config().clone();
                apply_encounter_args(&mut config, args)?;
                self.world.set_config(config).map_err(|e| e.to_string())?;
                let cfg = self.world.config();
                Ok(json!({
                    "hillFactor": cfg.encounter.hill_factor,
                    "tidalRatio": cfg.encounter.tidal_ratio,
                    "jerkNorm": cfg.encounter.jerk_norm,
                    "hysteresis": cfg.encounter.hysteresis,
                    "maxSubsetSize": cfg.encounter.max_subset_size,
                    "maxSubsteps": cfg.max_substeps,
                    "rtol": cfg.adaptive.rtol,
                    "atol": cfg.adaptive.atol,
                }))
            }
            "loadPreset" => {
                let name = args.get("preset").and_then(Value::as_str).or(args.as_str()).ok_or("missing preset name")?;
                let preset = Preset::from_name(name).ok_or_else(|| format!("unknown preset '{name}'"))?;
                self.load_preset(preset).map_err(|e| e.to_string())?;
                Ok(json!({ "preset": preset.name(), "bodies": self.world.active_count() }))
            }
            other => Err(format!("unknown command '{other}'")),
        }
    }

    /// Change one physics setting; the world validates the result
    fn update_config(&mut self, change: impl FnOnce(&mut SimConfig)) -> Result<(), String> {
        let mut config = self.world.config().clone();
        change(&mut config);
        self.world.set_config(config).map_err(|e| e.to_string())
    }

    /// Replace the world with a fresh one holding `preset`, keeping the physics
    /// settings, and give every session a new avatar
    fn load_preset(&mut self, preset: Preset) -> Result<(), SimError> {
        let mut world = SimulationWorld::with_rng(self.world.config().clone(), self.config.seed.rng())?;
        preset.populate(&mut world)?;
        world.take_events();
        self.world = world;
        self.pending_removals.clear();
        self.last_report = None;

        for (sid, conn) in self.session_connections() {
            self.bind_new_avatar(sid, conn);
        }
        // avatars are part of the snapshot, not the event stream
        self.world.take_events();
        self.force_snapshot = true;
        log::info!("loaded preset '{}'", preset.name());
        Ok(())
    }

    // outbound =============================================================================

    fn session_connections(&self) -> Vec<(SessionId, ConnectionId)> {
        self.sessions.iter().map(|s| (s.id, s.connection)).collect()
    }

    fn send(&mut self, conn: ConnectionId, msg: &ServerMessage) {
        match encode_server_message(msg) {
            Ok(text) => self.outbox.push(Outbound { connection: conn, payload: Payload::Text(text) }),
            Err(e) => log::error!("could not encode message for {conn}: {e}"),
        }
    }

    fn broadcast(&mut self, msg: &ServerMessage) {
        let text = match encode_server_message(msg) {
            Ok(text) => text,
            Err(e) => {
                log::error!("could not encode broadcast: {e}");
                return;
            }
        };
        for (_, conn) in self.session_connections() {
            self.outbox.push(Outbound { connection: conn, payload: Payload::Text(text.clone()) });
        }
    }

    fn reject(&mut self, conn: ConnectionId, e: &ProtocolError) {
        log::warn!("{conn}: {e}");
        self.send(conn, &ServerMessage::from(e));
    }

    fn send_snapshot(&mut self, conn: ConnectionId, your_session: Option<SessionId>) {
        let msg = ServerMessage::Snapshot {
            tick: self.world.tick(),
            sim_time: self.world.sim_time(),
            bodies: self.world.active_bodies().map(BodySnapshot::from).collect(),
            your_session,
        };
        self.send(conn, &msg);
    }

    /// Announce body-set changes so clients can map frame slots to ids
    fn broadcast_delta(&mut self) {
        let current: BTreeSet<BodyId> = self.world.active_ids().into_iter().collect();
        if current == self.announced {
            return;
        }
        let added = current
            .difference(&self.announced)
            .filter_map(|&id| self.world.body(id))
            .map(BodySnapshot::from)
            .collect();
        let removed = self.announced.difference(&current).copied().collect();
        self.announced = current;
        self.broadcast(&ServerMessage::Delta { tick: self.world.tick(), added, removed });
    }
}

/// Scale `v` down to at most `limit`. The norm is taken on `v / max|v_i|` so
/// huge finite components cannot overflow it.
fn clamp_norm(v: NVec3, limit: f64) -> NVec3 {
    if !v.iter().all(|c| c.is_finite()) {
        return NVec3::zeros();
    }
    let scale = v.amax();
    if scale == 0.0 {
        return v;
    }
    let unit = v / scale;
    if unit.norm() * scale > limit {
        unit.normalize() * limit
    } else {
        v
    }
}

fn spawn_spec(req: SpawnRequest, owner: SessionId) -> BodySpec {
    BodySpec::new(req.kind, req.mass, req.radius, req.position, req.velocity)
        .named(req.name)
        .owned_by(owner)
}

/// Overwrite the encounter and adaptive settings named in `args`.
/// `tidalRatio` and `jerkNorm` accept `null` to disable the test.
fn apply_encounter_args(config: &mut SimConfig, args: &Value) -> Result<(), String> {
    let fields = args.as_object().ok_or("expected an object of encounter settings")?;
    for (key, value) in fields {
        let number = || value.as_f64().ok_or_else(|| format!("expected a number for '{key}'"));
        let count = || value.as_u64().ok_or_else(|| format!("expected a non-negative integer for '{key}'"));
        let optional = || if value.is_null() { Ok(None) } else { number().map(Some) };
        match key.as_str() {
            "hillFactor" => config.encounter.hill_factor = number()?,
            "tidalRatio" => config.encounter.tidal_ratio = optional()?,
            "jerkNorm" => config.encounter.jerk_norm = optional()?,
            "hysteresis" => config.encounter.hysteresis = number()?,
            "maxSubsetSize" => {
                config.encounter.max_subset_size = usize::try_from(count()?).map_err(|e| e.to_string())?;
            }
            "maxSubsteps" => config.max_substeps = u32::try_from(count()?).map_err(|e| e.to_string())?,
            "rtol" => config.adaptive.rtol = number()?,
            "atol" => config.adaptive.atol = number()?,
            other => return Err(format!("unknown encounter setting '{other}'")),
        }
    }
    Ok(())
}

/// A number passed either bare or as `{ "<key>": n }` / `{ "value": n }`
fn number_arg(args: &Value, key: &str) -> Result<f64, String> {
    args.as_f64()
        .or_else(|| args.get(key).and_then(Value::as_f64))
        .or_else(|| args.get("value").and_then(Value::as_f64))
        .ok_or_else(|| format!("expected a number for '{key}'"))
}
