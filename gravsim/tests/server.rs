use std::time::{Duration, Instant};

use serde_json::{json, Value};

use gravsim::configuration::config::{OwnedBodyPolicy, ScenarioConfig};
use gravsim::network::codec::{decode_positions, decode_server_message};
use gravsim::network::protocol::{ServerMessage, PROTOCOL_VERSION};
use gravsim::network::server::{AuthoritativeServer, Inbound, Outbound, Payload};
use gravsim::network::session::ConnectionId;
use gravsim::simulation::params::SolverKind;
use gravsim::simulation::states::{BodyKind, NVec3};

const SCENARIO: &str = r#"
server:
  max_sessions: 4
  snapshot_interval: 1000
  diagnostics_interval: 2
  session_timeout_secs: 5.0
  thrust_limit: 10.0
  avatar:
    mass: 1.0e-6
    radius: 1.0e-3
    spawn_distance: 2.0
simulation:
  dt: 0.01
  G: 1.0
  softening: 0.0
  solver: direct
  collision_mode: none
bodies:
  - name: star
    kind: star
    x: [0.0, 0.0, 0.0]
    v: [0.0, 0.0, 0.0]
    m: 1.0
    fixed: true
"#;

fn server_with(policy: OwnedBodyPolicy, t0: Instant) -> AuthoritativeServer {
    let mut cfg = ScenarioConfig::from_yaml_str(SCENARIO).unwrap();
    cfg.server.owned_body_policy = policy;
    AuthoritativeServer::from_scenario(&cfg, t0).unwrap()
}

fn admin(server: &mut AuthoritativeServer, cmd: &str, args: Value) {
    send(server, A, json!({ "type": "adminCommand", "cmd": cmd, "args": args }));
}

fn admin_results(out: &[Outbound]) -> Vec<bool> {
    of_type(&texts(out, A), "adminResponse").iter().map(|r| r["success"].as_bool().unwrap()).collect()
}

const A: ConnectionId = ConnectionId(1);
const B: ConnectionId = ConnectionId(2);

fn send(server: &mut AuthoritativeServer, conn: ConnectionId, msg: Value) {
    server.enqueue(Inbound::Text(conn, msg.to_string()));
}

fn join(server: &mut AuthoritativeServer, conn: ConnectionId, name: &str) {
    server.enqueue(Inbound::Connected(conn));
    send(server, conn, json!({ "type": "join", "playerName": name, "protocolVersion": PROTOCOL_VERSION }));
}

/// JSON messages addressed to `conn`, in order
fn texts(out: &[Outbound], conn: ConnectionId) -> Vec<Value> {
    out.iter()
        .filter(|o| o.connection == conn)
        .filter_map(|o| match &o.payload {
            Payload::Text(t) => Some(serde_json::from_str(t).unwrap()),
            _ => None,
        })
        .collect()
}

fn of_type<'a>(msgs: &'a [Value], kind: &str) -> Vec<&'a Value> {
    msgs.iter().filter(|m| m["type"] == kind).collect()
}

fn avatar_of(server: &AuthoritativeServer, conn: ConnectionId) -> gravsim::BodyId {
    server.sessions().by_connection(conn).unwrap().body.unwrap()
}

#[test]
fn join_sends_snapshot_and_spawns_avatar() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    let out = server.tick(t0);

    let msgs = texts(&out, A);
    let snapshot = of_type(&msgs, "snapshot");
    assert_eq!(snapshot.len(), 1);
    let decoded = decode_server_message(&snapshot[0].to_string()).unwrap();
    let ServerMessage::Snapshot { bodies, your_session, .. } = decoded else {
        panic!("not a snapshot");
    };
    assert!(your_session.is_some());
    assert_eq!(bodies.len(), 2);
    assert!(bodies.iter().any(|b| b.kind == BodyKind::PlayerAvatar && b.owner == your_session));

    assert_eq!(of_type(&msgs, "playerJoined").len(), 1);

    let frames: Vec<&Outbound> = out
        .iter()
        .filter(|o| o.connection == A && matches!(o.payload, Payload::Binary(_)))
        .collect();
    assert_eq!(frames.len(), 1);
    let Payload::Binary(bytes) = &frames[0].payload else { unreachable!() };
    let frame = decode_positions(bytes).unwrap();
    assert_eq!(frame.tick, 1);
    assert_eq!(frame.body_count(), 2);

    let avatar = avatar_of(&server, A);
    let body = server.world().body(avatar).unwrap();
    assert!((body.state.x.norm() - 2.0).abs() < 1e-3);
}

#[test]
fn delta_precedes_the_position_frame() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    server.tick(t0);

    join(&mut server, B, "bob");
    let out = server.tick(t0);
    let mine: Vec<&Outbound> = out.iter().filter(|o| o.connection == A).collect();

    let delta_at = mine
        .iter()
        .position(|o| matches!(&o.payload, Payload::Text(t) if t.contains(r#""type":"delta""#)))
        .unwrap();
    let frame_at = mine.iter().position(|o| matches!(o.payload, Payload::Binary(_))).unwrap();
    assert!(delta_at < frame_at);

    let msgs = texts(&out, A);
    let delta = of_type(&msgs, "delta");
    assert_eq!(delta[0]["added"].as_array().unwrap().len(), 1);
    assert!(delta[0]["removed"].as_array().unwrap().is_empty());
}

#[test]
fn latest_input_wins() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "pause", "args": null }));
    server.tick(t0);
    assert!(server.is_paused());

    let avatar = avatar_of(&server, A);
    let v0 = server.world().body(avatar).unwrap().state.v;

    send(&mut server, A, json!({ "type": "input", "sequence": 1, "thrustVector": [1.0, 0.0, 0.0] }));
    send(&mut server, A, json!({ "type": "input", "sequence": 2, "thrustVector": [0.0, 2.0, 0.0] }));
    let out = server.tick(t0);

    let acks = of_type(&texts(&out, A), "inputAck").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["sequence"], 2);

    let dv = server.world().body(avatar).unwrap().state.v - v0;
    assert!((dv - NVec3::new(0.0, 0.02, 0.0)).norm() < 1e-12, "{dv:?}");

    // stale sequence is dropped
    send(&mut server, A, json!({ "type": "input", "sequence": 2, "thrustVector": [5.0, 0.0, 0.0] }));
    let out = server.tick(t0);
    assert!(of_type(&texts(&out, A), "inputAck").is_empty());
}

#[test]
fn thrust_is_clamped_to_the_limit() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "pause" }));
    server.tick(t0);

    let avatar = avatar_of(&server, A);
    let v0 = server.world().body(avatar).unwrap().state.v;
    send(&mut server, A, json!({ "type": "input", "sequence": 1, "thrustVector": [1000.0, 0.0, 0.0] }));
    server.tick(t0);

    let dv = server.world().body(avatar).unwrap().state.v - v0;
    assert!((dv.norm() - 10.0 * 0.01).abs() < 1e-12);
}

#[test]
fn huge_thrust_is_clamped_not_dropped() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "pause" }));
    server.tick(t0);

    let avatar = avatar_of(&server, A);
    let v0 = server.world().body(avatar).unwrap().state.v;
    send(&mut server, A, json!({ "type": "input", "sequence": 1, "thrustVector": [1e308, 1e308, 0.0] }));
    server.tick(t0);

    let dv = server.world().body(avatar).unwrap().state.v - v0;
    let expected = NVec3::new(1.0, 1.0, 0.0).normalize() * (10.0 * 0.01);
    assert!((dv - expected).norm() < 1e-12, "{dv:?}");
}

#[test]
fn idle_session_times_out_and_avatar_despawns() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    join(&mut server, B, "bob");
    server.tick(t0);
    let avatar = avatar_of(&server, A);

    // bob keeps talking, ada goes quiet
    send(&mut server, B, json!({ "type": "ping", "timestamp": 1.0 }));
    server.tick(t0 + Duration::from_secs(4));
    let out = server.tick(t0 + Duration::from_secs(6));

    assert!(out.iter().any(|o| o.connection == A && o.payload == Payload::Close));
    assert!(server.sessions().by_connection(A).is_none());
    assert!(server.sessions().by_connection(B).is_some());
    assert!(!server.world().body(avatar).map_or(false, |b| b.state.active));
    assert_eq!(of_type(&texts(&out, B), "playerLeft").len(), 1);
}

#[test]
fn persist_policy_keeps_the_avatar_unowned() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Persist, t0);
    join(&mut server, A, "ada");
    server.tick(t0);
    let avatar = avatar_of(&server, A);

    send(&mut server, A, json!({ "type": "leave" }));
    server.tick(t0);

    let body = server.world().body(avatar).unwrap();
    assert!(body.state.active);
    assert_eq!(body.core.owner, None);
    assert!(server.sessions().is_empty());
}

#[test]
fn disconnect_despawns_owned_bodies() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    server.tick(t0);
    let avatar = avatar_of(&server, A);

    server.enqueue(Inbound::Closed(A));
    server.tick(t0);
    assert!(!server.world().body(avatar).map_or(false, |b| b.state.active));
    assert_eq!(server.world().active_count(), 1);
}

#[test]
fn malformed_message_only_affects_its_sender() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    join(&mut server, B, "bob");
    server.tick(t0);

    server.enqueue(Inbound::Text(B, "{not json".to_string()));
    server.enqueue(Inbound::Binary(B, vec![1, 2, 3]));
    let out = server.tick(t0);

    let errors = of_type(&texts(&out, B), "error").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["code"], "MALFORMED");
    assert_eq!(errors[1]["code"], "UNEXPECTED_BINARY");
    assert!(of_type(&texts(&out, A), "error").is_empty());

    // both sessions still get their frames
    for conn in [A, B] {
        assert!(out.iter().any(|o| o.connection == conn && matches!(o.payload, Payload::Binary(_))));
    }
}

#[test]
fn version_mismatch_is_rejected() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    send(&mut server, A, json!({ "type": "join", "playerName": "ada", "protocolVersion": PROTOCOL_VERSION + 1 }));
    let out = server.tick(t0);

    let errors = of_type(&texts(&out, A), "error").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(errors[0]["code"], "VERSION_MISMATCH");
    assert!(server.sessions().is_empty());
    assert_eq!(server.world().active_count(), 1);
}

#[test]
fn messages_before_join_are_rejected() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    send(&mut server, A, json!({ "type": "input", "sequence": 1, "thrustVector": [1.0, 0.0, 0.0] }));
    let out = server.tick(t0);
    let errors = of_type(&texts(&out, A), "error").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(errors[0]["code"], "NOT_JOINED");
}

#[test]
fn only_the_admin_may_run_commands() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    join(&mut server, B, "bob");
    server.tick(t0);

    send(&mut server, B, json!({ "type": "adminCommand", "cmd": "pause" }));
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "status" }));
    let out = server.tick(t0);

    assert_eq!(of_type(&texts(&out, B), "error")[0]["code"], "NOT_ADMIN");
    assert!(!server.is_paused());
    let status = of_type(&texts(&out, A), "adminResponse")[0].clone();
    assert_eq!(status["success"], true);
    assert_eq!(status["data"]["sessions"], 2);
    assert_eq!(status["data"]["bodies"], 3);
}

#[test]
fn admin_checkpoint_and_restore() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    server.tick(t0);
    let positions = server.world().positions_flat();

    // taken while draining, before this tick's step
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "checkpoint" }));
    let out = server.tick(t0);
    let checkpoint = of_type(&texts(&out, A), "adminResponse")[0]["data"].clone();
    let tick = checkpoint["tick"].as_u64().unwrap();
    assert_eq!(tick, 1);

    for _ in 0..10 {
        server.tick(t0);
    }
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "restore", "args": checkpoint }));
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "pause" }));
    let out = server.tick(t0);

    let responses = of_type(&texts(&out, A), "adminResponse").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(responses[0]["success"], true);
    assert!(server.is_paused());
    assert_eq!(server.world().tick(), tick);
    assert_eq!(server.world().positions_flat(), positions);
    // clients are resynchronised with a full snapshot
    assert_eq!(of_type(&texts(&out, A), "snapshot").len(), 1);
}

#[test]
fn restore_rebinds_every_session_to_a_body_it_owns() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    server.tick(t0);
    admin(&mut server, "checkpoint", Value::Null);
    let out = server.tick(t0);
    let checkpoint = of_type(&texts(&out, A), "adminResponse")[0]["data"].clone();

    // bob joins after the checkpoint, so his avatar id is not in it
    join(&mut server, B, "bob");
    server.tick(t0);
    admin(&mut server, "restore", checkpoint);
    admin(&mut server, "pause", Value::Null);
    let out = server.tick(t0);
    assert_eq!(admin_results(&out), vec![true, true]);

    for conn in [A, B] {
        let sid = server.sessions().by_connection(conn).unwrap().id;
        let body = server.world().body(avatar_of(&server, conn)).unwrap();
        assert!(body.state.active);
        assert_eq!(body.core.owner, Some(sid));
        assert_eq!(body.core.kind, BodyKind::PlayerAvatar);
    }

    let bob = avatar_of(&server, B);
    let bob_v0 = server.world().body(bob).unwrap().state.v;
    send(
        &mut server,
        A,
        json!({
            "type": "input",
            "sequence": 1,
            "spawn": { "kind": "debris", "mass": 1.0e-6, "radius": 1.0e-3,
                       "position": [3.0, 0.0, 0.0], "velocity": [0.0, 0.5, 0.0] }
        }),
    );
    send(&mut server, B, json!({ "type": "input", "sequence": 1, "thrustVector": [10.0, 0.0, 0.0] }));
    server.tick(t0);
    server.tick(t0);

    let debris = server.world().active_bodies().find(|b| b.core.kind == BodyKind::Debris).unwrap();
    assert_ne!(debris.core.id, bob);
    assert_eq!(debris.state.v, NVec3::new(0.0, 0.5, 0.0));
    let dv = server.world().body(bob).unwrap().state.v - bob_v0;
    assert!((dv - NVec3::new(0.1, 0.0, 0.0)).norm() < 1e-12, "{dv:?}");
}

#[test]
fn restore_applies_the_policy_to_bodies_of_departed_sessions() {
    for policy in [OwnedBodyPolicy::Despawn, OwnedBodyPolicy::Persist] {
        let t0 = Instant::now();
        let mut server = server_with(policy, t0);
        join(&mut server, A, "ada");
        join(&mut server, B, "bob");
        server.tick(t0);
        let ada = avatar_of(&server, A);
        let bob = avatar_of(&server, B);

        admin(&mut server, "checkpoint", Value::Null);
        let out = server.tick(t0);
        let checkpoint = of_type(&texts(&out, A), "adminResponse")[0]["data"].clone();

        send(&mut server, B, json!({ "type": "leave" }));
        server.tick(t0);
        admin(&mut server, "restore", checkpoint);
        let out = server.tick(t0);
        assert_eq!(admin_results(&out), vec![true]);

        // ada's avatar survives the restore under the same id
        assert_eq!(avatar_of(&server, A), ada);
        let restored = server.world().body(bob).unwrap();
        match policy {
            OwnedBodyPolicy::Despawn => assert!(!restored.state.active),
            OwnedBodyPolicy::Persist => {
                assert!(restored.state.active);
                assert_eq!(restored.core.owner, None);
            }
        }
    }
}

#[test]
fn admin_physics_settings() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    admin(&mut server, "setDt", json!({ "dt": 0.02 }));
    admin(&mut server, "setSolver", json!("barnes_hut"));
    admin(
        &mut server,
        "setEncounter",
        json!({ "hillFactor": 0.5, "tidalRatio": null, "jerkNorm": 3.0, "maxSubsetSize": 4,
                "maxSubsteps": 128, "rtol": 1e-8, "atol": 1e-10 }),
    );
    admin(&mut server, "setEncounter", json!({ "hillFactor": -1.0 }));
    admin(&mut server, "setEncounter", json!({ "jerkNorm": 0.0 }));
    admin(&mut server, "setEncounter", json!({ "warp": 1.0 }));
    admin(&mut server, "setSolver", json!({ "solver": "quantum" }));
    admin(&mut server, "setDt", json!(0.0));
    let out = server.tick(t0);

    assert_eq!(admin_results(&out), vec![true, true, true, false, false, false, false, false]);
    let cfg = server.world().config();
    assert_eq!(cfg.dt, 0.02);
    assert_eq!(cfg.solver, SolverKind::BarnesHut);
    assert_eq!(cfg.encounter.hill_factor, 0.5);
    assert_eq!(cfg.encounter.tidal_ratio, None);
    assert_eq!(cfg.encounter.jerk_norm, Some(3.0));
    assert_eq!(cfg.encounter.max_subset_size, 4);
    assert_eq!(cfg.max_substeps, 128);
    assert_eq!(cfg.adaptive.rtol, 1e-8);
    assert_eq!(cfg.adaptive.atol, 1e-10);
    // this tick already stepped with the new size and solver
    assert_eq!(server.world().sim_time(), 0.02);
    assert_eq!(server.last_report().unwrap().solver, "barnes-hut");

    admin(&mut server, "status", Value::Null);
    let out = server.tick(t0);
    let status = of_type(&texts(&out, A), "adminResponse")[0].clone();
    assert_eq!(status["data"]["dt"], 0.02);
    assert_eq!(status["data"]["solver"], "barnes_hut");
}

#[test]
fn admin_tuning_commands() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "setTheta", "args": { "theta": 0.25 } }));
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "setSoftening", "args": 0.5 }));
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "setSoftening", "args": -1.0 }));
    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "warp" }));
    let out = server.tick(t0);

    let responses = of_type(&texts(&out, A), "adminResponse").into_iter().cloned().collect::<Vec<_>>();
    let ok: Vec<bool> = responses.iter().map(|r| r["success"].as_bool().unwrap()).collect();
    assert_eq!(ok, vec![true, true, false, false]);
    assert_eq!(server.world().config().theta, 0.25);
    assert_eq!(server.world().config().softening, 0.5);
}

#[test]
fn load_preset_replaces_the_world() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    server.tick(t0);

    send(&mut server, A, json!({ "type": "adminCommand", "cmd": "loadPreset", "args": { "preset": "sun_earth_moon" } }));
    let out = server.tick(t0);

    assert_eq!(of_type(&texts(&out, A), "adminResponse")[0]["success"], true);
    // Sun, Earth, Moon and the respawned avatar
    assert_eq!(server.world().active_count(), 4);
    let avatar = avatar_of(&server, A);
    assert_eq!(server.world().body(avatar).unwrap().core.kind, BodyKind::PlayerAvatar);
}

#[test]
fn load_preset_reports_avatars_it_cannot_spawn() {
    let t0 = Instant::now();
    let mut cfg = ScenarioConfig::from_yaml_str(SCENARIO).unwrap();
    cfg.simulation.max_bodies = 3;
    let mut server = AuthoritativeServer::from_scenario(&cfg, t0).unwrap();
    join(&mut server, A, "ada");
    server.tick(t0);

    admin(&mut server, "loadPreset", json!("sun_earth_moon"));
    let out = server.tick(t0);

    assert_eq!(admin_results(&out), vec![true]);
    let errors = of_type(&texts(&out, A), "error").into_iter().cloned().collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], "BODY_LIMIT_EXCEEDED");
    assert_eq!(server.sessions().by_connection(A).unwrap().body, None);
    assert_eq!(server.world().active_count(), 3);
}

#[test]
fn spawn_and_despawn_owned_bodies() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    join(&mut server, B, "bob");
    server.tick(t0);

    send(
        &mut server,
        A,
        json!({
            "type": "input",
            "sequence": 1,
            "thrustVector": [0.0, 0.0, 0.0],
            "spawn": { "kind": "debris", "mass": 1.0e-6, "radius": 1.0e-3,
                       "position": [3.0, 0.0, 0.0], "velocity": [0.0, 0.5, 0.0] }
        }),
    );
    server.tick(t0);
    assert_eq!(server.world().active_count(), 4);
    let spawned = server
        .world()
        .active_bodies()
        .find(|b| b.core.kind == BodyKind::Debris)
        .map(|b| b.core.id)
        .unwrap();

    // bob cannot remove ada's body
    send(&mut server, B, json!({ "type": "input", "sequence": 1, "despawn": spawned.0 }));
    let out = server.tick(t0);
    assert_eq!(of_type(&texts(&out, B), "error")[0]["code"], "NOT_OWNER");
    assert!(server.world().body(spawned).unwrap().state.active);

    send(&mut server, A, json!({ "type": "input", "sequence": 2, "despawn": spawned.0 }));
    server.tick(t0);
    assert!(!server.world().body(spawned).map_or(false, |b| b.state.active));
}

#[test]
fn ping_is_answered_and_rtt_recorded() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");
    send(&mut server, A, json!({ "type": "ping", "timestamp": 123.5, "rtt": 40.0 }));
    let out = server.tick(t0 + Duration::from_millis(250));

    let pong = of_type(&texts(&out, A), "pong")[0].clone();
    assert_eq!(pong["timestamp"], 123.5);
    assert!((pong["serverTime"].as_f64().unwrap() - 250.0).abs() < 1e-6);
    assert_eq!(server.sessions().by_connection(A).unwrap().rtt_ms, Some(40.0));
}

#[test]
fn step_results_follow_the_diagnostics_interval() {
    let t0 = Instant::now();
    let mut server = server_with(OwnedBodyPolicy::Despawn, t0);
    join(&mut server, A, "ada");

    let counts: Vec<usize> = (0..4).map(|_| of_type(&texts(&server.tick(t0), A), "stepResult").len()).collect();
    assert_eq!(counts, vec![0, 1, 0, 1]);
}
