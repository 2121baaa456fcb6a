//! The simulation world: body storage, the per-tick pipeline and mutations.
//!
//! One call to [`SimulationWorld::step`] runs:
//! 1. global accelerations at start-of-tick positions (evaluation 1)
//! 2. close-encounter classification
//! 3. RKF45 for the encounter subset, then velocity-Verlet for the bulk with
//!    the second global evaluation at the drifted positions
//! 4. isolation of non-finite bodies and collision resolution
//! 5. tick / time advance
//! 6. sphere-of-influence parents, conserved quantities, compaction
//!
//! Bodies live in one `Vec` in strictly increasing id order. Removal only
//! deactivates; inactive bodies are compacted away in bulk.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::simulation::barnes_hut::{softened_inv_r3, BarnesHutTree, TreePoint};
use crate::simulation::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use crate::simulation::collision::{self, CollisionOutcome};
use crate::simulation::diagnostics::{self, ConservationMonitor, ConservedQuantities};
use crate::simulation::encounter::{self, BodyPair};
use crate::simulation::error::{SimError, SimResult};
use crate::simulation::events::{ConservationWarning, RemovalReason, SimEvent};
use crate::simulation::forces::{self, GravitySolver};
use crate::simulation::integrator::{AdaptiveRkf45, IntegrationStats, PhaseState, VelocityVerlet};
use crate::simulation::params::{CollisionMode, SimConfig};
use crate::simulation::rng::DeterministicRng;
use crate::simulation::states::{
    has_nan3, is_finite3, Body, BodyCore, BodyId, BodySpec, BodyState, IntegratorMode, NVec3, SessionId,
};

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub tick: u64,
    pub sim_time: f64,
    pub dt: f64,
    pub solver: String,
    pub active_bodies: usize,
    pub adaptive_bodies: Vec<BodyId>,
    pub adaptive_substeps: u32,
    pub collisions: usize,
    pub faults: usize,
    pub singularities: usize,
    pub diagnostics: ConservedQuantities,
    /// Events since the previous report, mutations included
    #[serde(skip)]
    pub events: Vec<SimEvent>,
}

pub struct SimulationWorld {
    config: SimConfig,
    bodies: Vec<Body>,
    rng: DeterministicRng,
    tick: u64,
    sim_time: f64,
    next_id: u32,
    encounter_pairs: BTreeSet<BodyPair>,
    monitor: ConservationMonitor,
    degraded: bool,
    events: Vec<SimEvent>,
}

impl SimulationWorld {
    pub fn new(config: SimConfig, seed: u64) -> SimResult<Self> {
        Self::with_rng(config, DeterministicRng::new(seed))
    }

    pub fn with_rng(config: SimConfig, rng: DeterministicRng) -> SimResult<Self> {
        config.validate()?;
        let monitor = ConservationMonitor::new(config.energy_drift_threshold);
        Ok(Self {
            config,
            bodies: Vec::new(),
            rng,
            tick: 0,
            sim_time: 0.0,
            next_id: 0,
            encounter_pairs: BTreeSet::new(),
            monitor,
            degraded: false,
            events: Vec::new(),
        })
    }

    pub fn from_checkpoint(cp: &Checkpoint) -> SimResult<Self> {
        let mut world = Self::new(cp.config.clone(), 0)?;
        world.restore_checkpoint(cp)?;
        Ok(world)
    }

    // accessors ============================================================================

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn active_bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.iter().filter(|b| b.state.active)
    }

    pub fn active_count(&self) -> usize {
        self.active_bodies().count()
    }

    pub fn active_ids(&self) -> Vec<BodyId> {
        self.active_bodies().map(|b| b.core.id).collect()
    }

    fn index_of(&self, id: BodyId) -> Option<usize> {
        self.bodies.binary_search_by_key(&id, |b| b.core.id).ok()
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.index_of(id).map(|i| &self.bodies[i])
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn encounter_pairs(&self) -> &BTreeSet<BodyPair> {
        &self.encounter_pairs
    }

    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    pub fn rng_mut(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    /// Positions of the active bodies in id order, flattened `[x0, y0, z0, x1, ...]`
    pub fn positions_flat(&self) -> Vec<f64> {
        self.active_bodies()
            .flat_map(|b| [b.state.x.x, b.state.x.y, b.state.x.z])
            .collect()
    }

    /// Drain events raised since the last step report
    pub fn take_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    /// Conserved quantities right now, against the current energy baseline
    pub fn measure(&self) -> ConservedQuantities {
        let solver = forces::select_solver(&self.config, self.active_count());
        let mut q = diagnostics::measure(&self.bodies, solver.as_ref());
        let mut probe = self.monitor.clone();
        probe.update(&mut q);
        q
    }

    // configuration ========================================================================

    pub fn set_config(&mut self, config: SimConfig) -> SimResult<()> {
        config.validate()?;
        self.monitor.threshold = config.energy_drift_threshold;
        self.config = config;
        self.monitor.rebaseline();
        Ok(())
    }

    pub fn set_theta(&mut self, theta: f64) -> SimResult<()> {
        let config = SimConfig { theta, ..self.config.clone() };
        self.set_config(config)
    }

    pub fn set_softening(&mut self, softening: f64) -> SimResult<()> {
        let config = SimConfig { softening, ..self.config.clone() };
        self.set_config(config)
    }

    // mutations ============================================================================

    pub fn add_body(&mut self, spec: BodySpec) -> SimResult<BodyId> {
        let invalid = |msg: &str| Err(SimError::InvalidBody(msg.to_string()));
        if !is_finite3(&spec.position) || !is_finite3(&spec.velocity) {
            return invalid("position and velocity must be finite");
        }
        if !spec.mass.is_finite() || spec.mass < 0.0 || (!spec.fixed && spec.mass == 0.0) {
            return invalid("mass must be finite and strictly positive unless the body is fixed");
        }
        if !spec.radius.is_finite() || spec.radius < 0.0 {
            return invalid("radius must be finite and non-negative");
        }
        if self.active_count() >= self.config.max_bodies {
            return Err(SimError::BodyLimitExceeded { limit: self.config.max_bodies });
        }

        let id = BodyId(self.next_id);
        self.next_id += 1;
        let name = if spec.name.is_empty() { format!("body-{}", id.0) } else { spec.name };

        self.bodies.push(Body {
            core: BodyCore {
                id,
                name,
                kind: spec.kind,
                mass: spec.mass,
                radius: spec.radius,
                fixed: spec.fixed,
                owner: spec.owner,
            },
            state: BodyState {
                x: spec.position,
                v: spec.velocity,
                a: NVec3::zeros(),
                a_prev: NVec3::zeros(),
                active: true,
                mode: IntegratorMode::Symplectic,
                dominant: None,
            },
        });

        let idx = self.bodies.len() - 1;
        let dominant = self.dominant_for(idx);
        self.bodies[idx].state.dominant = dominant;

        log::debug!("added body {id} ({:?}, m = {:.3e})", spec.kind, spec.mass);
        self.events.push(SimEvent::BodyAdded { body: id, kind: spec.kind, owner: spec.owner });
        self.monitor.rebaseline();
        Ok(id)
    }

    /// Deactivate a body. `Ok(false)` when it was already inactive.
    pub fn remove_body(&mut self, id: BodyId) -> SimResult<bool> {
        let idx = self.index_of(id).ok_or(SimError::UnknownBody(id))?;
        if !self.bodies[idx].state.active {
            return Ok(false);
        }
        deactivate(&mut self.bodies[idx]);
        log::debug!("removed body {id}");
        self.events.push(SimEvent::BodyRemoved { body: id, reason: RemovalReason::Explicit });
        self.monitor.rebaseline();
        Ok(true)
    }

    /// Add `dv` to a body's velocity
    pub fn apply_impulse(&mut self, id: BodyId, dv: NVec3) -> SimResult<()> {
        if !is_finite3(&dv) {
            return Err(SimError::InvalidBody("impulse must be finite".into()));
        }
        let idx = self.index_of(id).ok_or(SimError::UnknownBody(id))?;
        let body = &mut self.bodies[idx];
        if !body.state.active {
            return Err(SimError::UnknownBody(id));
        }
        if body.core.fixed {
            return Err(SimError::FixedBodyImpulse(id));
        }
        body.state.v += dv;
        self.monitor.rebaseline();
        Ok(())
    }

    pub fn set_owner(&mut self, id: BodyId, owner: Option<SessionId>) -> SimResult<()> {
        let idx = self.index_of(id).ok_or(SimError::UnknownBody(id))?;
        self.bodies[idx].core.owner = owner;
        Ok(())
    }

    // the tick =============================================================================

    pub fn step(&mut self, dt: f64) -> SimResult<StepReport> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::InvalidConfig(format!("step size {dt} must be finite and positive")));
        }

        let n = self.bodies.len();
        let active = self.active_count();
        let solver = forces::select_solver(&self.config, active);

        // (1) evaluation 1 at start-of-tick positions
        let mut a_start = vec![NVec3::zeros(); n];
        solver.accelerations(&self.bodies, &mut a_start);
        for (b, a) in self.bodies.iter_mut().zip(&a_start) {
            if b.state.active {
                b.state.a = *a;
            }
        }

        // (2) close encounters
        let report = encounter::classify(&self.bodies, &self.encounter_pairs, &self.config);
        self.encounter_pairs = report.flagged_set();
        if !report.overflow.is_empty() {
            log::warn!(
                "{} close-encounter pair(s) exceed the adaptive subset of {}",
                report.overflow.len(),
                self.config.encounter.max_subset_size
            );
            self.events.push(SimEvent::ConservationWarning(ConservationWarning::SubsetOverflow {
                pairs: report.overflow.clone(),
                max_subset_size: self.config.encounter.max_subset_size,
            }));
        }

        let adaptive_bodies: Vec<BodyId> = report.subset.iter().map(|&i| self.bodies[i].core.id).collect();
        let mut in_subset = vec![false; n];
        for &i in &report.subset {
            in_subset[i] = true;
        }
        for (b, &adaptive) in self.bodies.iter_mut().zip(&in_subset) {
            if !b.is_dynamic() {
                continue;
            }
            let mode = if adaptive { IntegratorMode::Adaptive } else { IntegratorMode::Symplectic };
            if mode != b.state.mode {
                b.state.mode = mode;
                self.events.push(SimEvent::IntegratorSwitch { body: b.core.id, mode });
            }
        }

        // (3) subset first against the frozen field, then the bulk
        let adaptive = self.integrate_subset(&report.subset, &in_subset, active, dt);
        self.integrate_bulk(&in_subset, &a_start, solver.as_ref(), dt);

        // (4) faults and collisions
        let faults = self.isolate_faults();
        let (collisions, singularities) = self.resolve_collisions();

        // (5)
        self.tick += 1;
        self.sim_time += dt;

        // (6)
        self.update_dominants();
        let mut diagnostics = diagnostics::measure(&self.bodies, solver.as_ref());
        if let Some(warning) = self.monitor.update(&mut diagnostics) {
            log::warn!("tick {}: {warning:?}", self.tick);
            self.events.push(SimEvent::ConservationWarning(warning));
        }
        self.compact();

        Ok(StepReport {
            tick: self.tick,
            sim_time: self.sim_time,
            dt,
            solver: solver.name().to_string(),
            active_bodies: self.active_count(),
            adaptive_bodies,
            adaptive_substeps: adaptive.substeps,
            collisions,
            faults,
            singularities,
            diagnostics,
            events: std::mem::take(&mut self.events),
        })
    }

    /// RKF45 over the coupled subset. The rest of the system is a field frozen
    /// at start-of-tick positions; subset members attract each other directly.
    fn integrate_subset(&mut self, subset: &[usize], in_subset: &[bool], active: usize, dt: f64) -> IntegrationStats {
        if subset.is_empty() {
            return IntegrationStats { converged: true, ..Default::default() };
        }

        let cfg = &self.config;
        let g = cfg.gravitational_constant;
        let eps2 = cfg.eps2();
        // direct worlds get an exact field: theta = 0 opens every node
        let theta = if cfg.use_direct(active) { 0.0 } else { cfg.theta };

        let external: Vec<TreePoint> = self
            .bodies
            .iter()
            .zip(in_subset)
            .filter(|(b, &inside)| b.state.active && !inside)
            .map(|(b, _)| TreePoint { id: b.core.id, x: b.state.x, m: b.core.mass })
            .collect();
        let field = BarnesHutTree::from_points(external, cfg.max_tree_depth);

        let masses: Vec<f64> = subset.iter().map(|&i| self.bodies[i].core.mass).collect();
        let mut states: Vec<PhaseState> = subset
            .iter()
            .map(|&i| {
                let s = &self.bodies[i].state;
                PhaseState { x: s.x, v: s.v, a: s.a }
            })
            .collect();

        let rk = AdaptiveRkf45::from_config(cfg);
        let stats = rk.integrate(&mut states, dt, |xs| {
            xs.iter()
                .enumerate()
                .map(|(k, x)| {
                    let mut a = field.calculate_acceleration(x, None, g, eps2, theta);
                    for (l, y) in xs.iter().enumerate() {
                        if l != k {
                            let r = y - x;
                            a += r * (g * masses[l] * softened_inv_r3(&r, eps2));
                        }
                    }
                    a
                })
                .collect()
        });

        for (&i, s) in subset.iter().zip(&states) {
            self.bodies[i].state.x = s.x;
            self.bodies[i].state.v = s.v;
        }

        if !stats.converged {
            let ids: Vec<BodyId> = subset.iter().map(|&i| self.bodies[i].core.id).collect();
            log::warn!("adaptive integrator did not converge for {} bodies", ids.len());
            self.events.push(SimEvent::ConservationWarning(ConservationWarning::AdaptiveNotConverged {
                bodies: ids,
                substeps: stats.substeps,
            }));
        }
        log::trace!("rkf45: {} substeps, {} rejected", stats.substeps, stats.rejected);
        stats
    }

    /// Velocity-Verlet for every dynamic body outside the subset. The batch
    /// evaluation (evaluation 2) sees the subset already at its final positions
    /// and refreshes `a` for every body.
    fn integrate_bulk(&mut self, in_subset: &[bool], a_start: &[NVec3], solver: &dyn GravitySolver, dt: f64) {
        let n = self.bodies.len();
        let bulk: Vec<usize> = (0..n).filter(|&i| self.bodies[i].is_dynamic() && !in_subset[i]).collect();
        let mut states: Vec<PhaseState> = bulk
            .iter()
            .map(|&i| {
                let s = &self.bodies[i].state;
                PhaseState { x: s.x, v: s.v, a: a_start[i] }
            })
            .collect();

        let mut acc = vec![NVec3::zeros(); n];
        {
            let bodies = &mut self.bodies;
            VelocityVerlet.step_batch(&mut states, dt, |positions| {
                for (&i, x) in bulk.iter().zip(positions) {
                    bodies[i].state.x = *x;
                }
                solver.accelerations(bodies, &mut acc);
                bulk.iter().map(|&i| acc[i]).collect()
            });
        }

        for (&i, s) in bulk.iter().zip(&states) {
            self.bodies[i].state.x = s.x;
            self.bodies[i].state.v = s.v;
        }
        for ((b, a_old), a_new) in self.bodies.iter_mut().zip(a_start).zip(&acc) {
            if b.state.active {
                b.state.a_prev = *a_old;
                b.state.a = *a_new;
            }
        }
    }

    /// Deactivate every body whose state went non-finite
    fn isolate_faults(&mut self) -> usize {
        let mut faults = 0;
        for b in self.bodies.iter_mut().filter(|b| b.state.active) {
            if is_finite3(&b.state.x) && is_finite3(&b.state.v) {
                continue;
            }
            let id = b.core.id;
            let err = if has_nan3(&b.state.x) || has_nan3(&b.state.v) {
                SimError::NanDetected { body: id }
            } else {
                SimError::NumericalOverflow { body: id }
            };
            log::error!("isolating body {id}: {err}");
            self.events.push(SimEvent::BodyFault { body: id, code: err.code().to_string(), message: err.to_string() });
            self.events.push(SimEvent::BodyRemoved { body: id, reason: RemovalReason::Fault });
            deactivate(b);
            faults += 1;
        }
        if faults > 0 {
            self.degraded = true;
            self.monitor.rebaseline();
        }
        faults
    }

    /// Returns (collisions resolved, singular pairs seen)
    fn resolve_collisions(&mut self) -> (usize, usize) {
        let cfg = &self.config;
        let summary = collision::resolve(&mut self.bodies, cfg.collision_mode, cfg.restitution, cfg.softening);

        for &(a, b, separation) in &summary.singular {
            log::debug!("{}", SimError::Singularity { a, b, separation });
        }

        for ev in &summary.events {
            self.events.push(SimEvent::Collision { a: ev.a, b: ev.b, separation: ev.separation, outcome: ev.outcome });
            if let CollisionOutcome::Merged { survivor, absorbed } = ev.outcome {
                if let Some(idx) = self.index_of(absorbed) {
                    self.bodies[idx].state.dominant = None;
                }
                self.events.push(SimEvent::BodyRemoved { body: absorbed, reason: RemovalReason::Merged { into: survivor } });
            }
        }
        if !summary.events.is_empty() && self.config.collision_mode != CollisionMode::None {
            self.monitor.rebaseline();
        }
        (summary.events.len(), summary.singular.len())
    }

    /// Sphere-of-influence parent of body `idx`: the smallest attractor sphere
    /// containing it, falling back to the primary.
    fn dominant_for(&self, idx: usize) -> Option<BodyId> {
        let p = encounter::primary_index(&self.bodies)?;
        soi_parent(&self.bodies, idx, p)
    }

    fn update_dominants(&mut self) {
        let Some(p) = encounter::primary_index(&self.bodies) else {
            return;
        };
        let parents: Vec<Option<BodyId>> = (0..self.bodies.len())
            .map(|i| if self.bodies[i].state.active { soi_parent(&self.bodies, i, p) } else { None })
            .collect();

        for (b, to) in self.bodies.iter_mut().zip(parents) {
            if !b.state.active || b.state.dominant == to {
                continue;
            }
            let from = b.state.dominant;
            b.state.dominant = to;
            log::debug!("body {} changed sphere of influence: {from:?} -> {to:?}", b.core.id);
            self.events.push(SimEvent::SoiTransition { body: b.core.id, from, to });
        }
    }

    fn compact(&mut self) {
        let inactive = self.bodies.len() - self.active_count();
        if inactive <= self.config.compaction_threshold {
            return;
        }
        self.bodies.retain(|b| b.state.active);
        let ids: BTreeSet<BodyId> = self.bodies.iter().map(|b| b.core.id).collect();
        self.encounter_pairs.retain(|(a, b)| ids.contains(a) && ids.contains(b));
        log::debug!("compacted {inactive} inactive bodies");
    }

    // checkpoints ==========================================================================

    pub fn create_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            tick: self.tick,
            sim_time: self.sim_time,
            bodies: self.bodies.clone(),
            rng_state: self.rng.get_state(),
            config: self.config.clone(),
            next_body_id: self.next_id,
            encounter_pairs: self.encounter_pairs.iter().copied().collect(),
            energy_baseline: self.monitor.baseline(),
            degraded: self.degraded,
        }
    }

    /// Replace the whole world state. Nothing changes when validation fails.
    pub fn restore_checkpoint(&mut self, cp: &Checkpoint) -> SimResult<()> {
        cp.validate()?;
        let mut rng = self.rng.clone();
        rng.set_state(cp.rng_state)?;

        self.config = cp.config.clone();
        self.bodies = cp.bodies.clone();
        self.rng = rng;
        self.tick = cp.tick;
        self.sim_time = cp.sim_time;
        self.next_id = cp.next_body_id;
        self.encounter_pairs = cp.encounter_pairs.iter().copied().collect();
        self.monitor = ConservationMonitor::new(cp.config.energy_drift_threshold);
        self.monitor.set_baseline(cp.energy_baseline);
        self.degraded = cp.degraded;
        self.events.clear();
        log::info!("restored checkpoint at tick {} with {} bodies", cp.tick, cp.bodies.len());
        Ok(())
    }
}

/// Mark a body inactive and clear state that must stay serializable
fn deactivate(b: &mut Body) {
    b.state.active = false;
    b.state.dominant = None;
    if !(is_finite3(&b.state.x) && is_finite3(&b.state.v)) {
        b.state.x = NVec3::zeros();
        b.state.v = NVec3::zeros();
    }
    b.state.a = NVec3::zeros();
    b.state.a_prev = NVec3::zeros();
}

/// Smallest containing sphere of influence. The primary's sphere is unbounded;
/// another attractor `j` reaches `|x_j - x_p| (m_j / m_p)^0.4`.
fn soi_parent(bodies: &[Body], idx: usize, p: usize) -> Option<BodyId> {
    if idx == p {
        return None;
    }
    let primary = &bodies[p];
    let body = &bodies[idx];
    let mut best = (f64::INFINITY, primary.core.id);

    for (j, attractor) in bodies.iter().enumerate() {
        if j == idx || j == p || !attractor.state.active || !attractor.core.kind.is_attractor() {
            continue;
        }
        if attractor.core.mass <= 0.0 || primary.core.mass <= 0.0 {
            continue;
        }
        let soi = attractor.distance_to(primary) * (attractor.core.mass / primary.core.mass).powf(0.4);
        if soi < best.0 && body.distance_to(attractor) < soi {
            best = (soi, attractor.core.id);
        }
    }
    Some(best.1)
}
