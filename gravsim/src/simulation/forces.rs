//! Gravity solvers for the n-body engine
//!
//! Defines the [`GravitySolver`] trait with two implementations:
//! - [`DirectGravity`]: exact pairwise O(N²) sum, the reference
//! - [`BarnesHutGravity`]: octree approximation, O(N log N)
//!
//! Both use Plummer softening and skip inactive bodies (their output slot is
//! zero). Fixed bodies attract others and are attracted like anyone else;
//! the integrators simply never move them.

use crate::simulation::barnes_hut::{softened_inv_r, softened_inv_r3, BarnesHutTree};
use crate::simulation::params::SimConfig;
use crate::simulation::states::{is_finite3, Body, BodyId, NVec3};

/// Whether a body's mass is felt by others (a non-finite body is about to be isolated)
fn attracts(b: &Body) -> bool {
    b.state.active && is_finite3(&b.state.x)
}

/// Trait for whole-system gravity evaluation
pub trait GravitySolver {
    /// Overwrite `out[i]` with the acceleration of `bodies[i]`
    fn accelerations(&self, bodies: &[Body], out: &mut [NVec3]);

    /// Total pairwise potential energy `-Σ_{i<j} G m_i m_j / sqrt(r² + ε²)`
    fn potential_energy(&self, bodies: &[Body]) -> f64;

    fn name(&self) -> &'static str;
}

/// Pick the solver the config asks for, given the number of active bodies
pub fn select_solver(config: &SimConfig, active: usize) -> Box<dyn GravitySolver> {
    if config.use_direct(active) {
        Box::new(DirectGravity::from_config(config))
    } else {
        Box::new(BarnesHutGravity::from_config(config))
    }
}

/// Direct Newtonian gravity with Plummer softening
#[derive(Debug, Clone, Copy)]
pub struct DirectGravity {
    pub g: f64,    // gravitational constant
    pub eps2: f64, // softening squared
}

impl DirectGravity {
    pub fn from_config(config: &SimConfig) -> Self {
        Self { g: config.gravitational_constant, eps2: config.eps2() }
    }

    /// Field at an arbitrary position from every active body except `exclude`
    pub fn acceleration_at(&self, bodies: &[Body], position: &NVec3, exclude: Option<BodyId>) -> NVec3 {
        let mut acc = NVec3::zeros();
        for b in bodies.iter().filter(|b| attracts(b) && Some(b.core.id) != exclude) {
            let r = b.state.x - position;
            acc += softened_inv_r3(&r, self.eps2) * b.core.mass * r;
        }
        acc * self.g
    }
}

impl GravitySolver for DirectGravity {
    fn accelerations(&self, bodies: &[Body], out: &mut [NVec3]) {
        for a in out.iter_mut() {
            *a = NVec3::zeros();
        }

        let n = bodies.len();
        // each unordered pair (i, j), i < j, once: equal and opposite
        for i in 0..n {
            let bi = &bodies[i];
            if !attracts(bi) {
                continue;
            }
            for j in (i + 1)..n {
                let bj = &bodies[j];
                if !attracts(bj) {
                    continue;
                }
                // r points from i to j: i is pulled along +r, j along -r
                let r = bj.state.x - bi.state.x;
                let coef = self.g * softened_inv_r3(&r, self.eps2);
                out[i] += coef * bj.core.mass * r;
                out[j] -= coef * bi.core.mass * r;
            }
        }
    }

    fn potential_energy(&self, bodies: &[Body]) -> f64 {
        let mut pe = 0.0;
        let n = bodies.len();
        for i in 0..n {
            let bi = &bodies[i];
            if !attracts(bi) {
                continue;
            }
            for bj in bodies[(i + 1)..].iter().filter(|b| attracts(b)) {
                let r = bj.state.x - bi.state.x;
                pe -= self.g * bi.core.mass * bj.core.mass * softened_inv_r(&r, self.eps2);
            }
        }
        pe
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// Barnes–Hut gravity: one tree build per evaluation, one query per body
#[derive(Debug, Clone, Copy)]
pub struct BarnesHutGravity {
    pub g: f64,
    pub eps2: f64,
    pub theta: f64, // opening angle
    pub max_depth: usize,
}

impl BarnesHutGravity {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            g: config.gravitational_constant,
            eps2: config.eps2(),
            theta: config.theta,
            max_depth: config.max_tree_depth,
        }
    }

    pub fn build_tree(&self, bodies: &[Body]) -> BarnesHutTree {
        BarnesHutTree::build(bodies, self.max_depth)
    }
}

impl GravitySolver for BarnesHutGravity {
    fn accelerations(&self, bodies: &[Body], out: &mut [NVec3]) {
        let tree = self.build_tree(bodies);
        for (b, a) in bodies.iter().zip(out.iter_mut()) {
            *a = if b.state.active {
                tree.calculate_acceleration(&b.state.x, Some(b.core.id), self.g, self.eps2, self.theta)
            } else {
                NVec3::zeros()
            };
        }
    }

    fn potential_energy(&self, bodies: &[Body]) -> f64 {
        let tree = self.build_tree(bodies);
        // each pair is counted from both ends
        0.5 * bodies
            .iter()
            .filter(|b| attracts(b))
            .map(|b| b.core.mass * tree.calculate_potential(&b.state.x, Some(b.core.id), self.g, self.eps2, self.theta))
            .sum::<f64>()
    }

    fn name(&self) -> &'static str {
        "barnes-hut"
    }
}
