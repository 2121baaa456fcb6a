//! Time integrators for the N-body system
//!
//! - [`VelocityVerlet`]: symplectic fixed-step integrator for the bulk
//!   population. The acceleration at the start of the step is taken from the
//!   state (`PhaseState::a`), so one step costs one new batch evaluation.
//! - [`AdaptiveRkf45`]: embedded Runge–Kutta–Fehlberg 4(5) with step-size
//!   control, used for the coupled close-encounter subset. Work per tick is
//!   bounded by `max_substeps`; when the budget runs out the rest of the tick
//!   is taken in one forced step and reported as not converged.
//!
//! Both work on slices of [`PhaseState`] and an acceleration closure mapping
//! a slice of positions to a vector of accelerations (same length, same order).

use super::params::SimConfig;
use super::states::NVec3;

/// Position, velocity and acceleration of one integrated body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseState {
    pub x: NVec3,
    pub v: NVec3,
    pub a: NVec3, // acceleration at x
}

/// Work done by one call to [`Integrator::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntegrationStats {
    pub substeps: u32,   // accepted steps (including a forced one)
    pub rejected: u32,   // rejected trial steps
    pub max_error: f64,  // largest scaled error of an accepted step
    pub converged: bool, // false when a step was accepted above tolerance
}

/// Common interface so callers (and tests) can swap integrators
pub trait Integrator {
    /// Advance every state by `dt`; on return each `a` holds the acceleration at the new `x`
    fn advance<F>(&self, states: &mut [PhaseState], dt: f64, accel: F) -> IntegrationStats
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>;
}

// =========================================================================================
// velocity-Verlet
// =========================================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct VelocityVerlet;

impl VelocityVerlet {
    /// First half of the step:
    /// x_n+1 = x_n + dt v_n + (dt²/2) a_n, then v_half = v_n + (dt/2) a_n
    pub fn drift(state: &mut PhaseState, dt: f64) {
        state.x += state.v * dt + state.a * (0.5 * dt * dt);
        state.v += state.a * (0.5 * dt);
    }

    /// Second half: v_n+1 = v_half + (dt/2) a_n+1
    pub fn kick(state: &mut PhaseState, a_new: NVec3, dt: f64) {
        state.v += a_new * (0.5 * dt);
        state.a = a_new;
    }

    /// Advance a single state with a point acceleration function
    pub fn step<F>(&self, state: &mut PhaseState, dt: f64, mut accel: F)
    where
        F: FnMut(&NVec3) -> NVec3,
    {
        Self::drift(state, dt);
        let a_new = accel(&state.x);
        Self::kick(state, a_new, dt);
    }

    /// Advance a batch with exactly one call to `accel`, even for an empty batch,
    /// so the caller can rely on the evaluation happening.
    pub fn step_batch<F>(&self, states: &mut [PhaseState], dt: f64, mut accel: F)
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>,
    {
        for s in states.iter_mut() {
            Self::drift(s, dt);
        }

        let positions: Vec<NVec3> = states.iter().map(|s| s.x).collect();
        let a_new = accel(&positions);

        for (s, a) in states.iter_mut().zip(a_new) {
            Self::kick(s, a, dt);
        }
    }
}

impl Integrator for VelocityVerlet {
    fn advance<F>(&self, states: &mut [PhaseState], dt: f64, accel: F) -> IntegrationStats
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>,
    {
        self.step_batch(states, dt, accel);
        IntegrationStats { substeps: 1, rejected: 0, max_error: 0.0, converged: true }
    }
}

// =========================================================================================
// adaptive RKF45
// =========================================================================================

const SAFETY: f64 = 0.9;
const MIN_SCALE: f64 = 0.2;
const MAX_SCALE: f64 = 5.0;

/// Fehlberg stage coefficients (row s = weights of stages 0..s)
const B: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 4.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 32.0, 9.0 / 32.0, 0.0, 0.0, 0.0],
    [1932.0 / 2197.0, -7200.0 / 2197.0, 7296.0 / 2197.0, 0.0, 0.0],
    [439.0 / 216.0, -8.0, 3680.0 / 513.0, -845.0 / 4104.0, 0.0],
    [-8.0 / 27.0, 2.0, -3544.0 / 2565.0, 1859.0 / 4104.0, -11.0 / 40.0],
];

/// 4th-order weights
const C4: [f64; 6] = [25.0 / 216.0, 0.0, 1408.0 / 2565.0, 2197.0 / 4104.0, -1.0 / 5.0, 0.0];

/// 5th-order weights (propagated solution)
const C5: [f64; 6] = [16.0 / 135.0, 0.0, 6656.0 / 12825.0, 28561.0 / 56430.0, -9.0 / 50.0, 2.0 / 55.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveRkf45 {
    pub rtol: f64,
    pub atol: f64,
    pub min_dt: f64,
    pub max_dt: f64,
    pub max_substeps: u32,
}

/// Result of one trial step
struct Trial {
    x: Vec<NVec3>,
    v: Vec<NVec3>,
    error: f64, // scaled, accept when <= 1
}

impl AdaptiveRkf45 {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            rtol: config.adaptive.rtol,
            atol: config.adaptive.atol,
            min_dt: config.adaptive.min_dt,
            max_dt: config.adaptive.max_dt,
            max_substeps: config.max_substeps,
        }
    }

    /// Advance the coupled subset by `dt`.
    ///
    /// The state vector is all positions followed by all velocities; its
    /// derivative is (velocities, accelerations). Each trial costs six calls
    /// to `accel`, plus one final call to refresh `a`.
    pub fn integrate<F>(&self, states: &mut [PhaseState], dt: f64, mut accel: F) -> IntegrationStats
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>,
    {
        let mut stats = IntegrationStats { converged: true, ..Default::default() };
        if states.is_empty() || dt <= 0.0 {
            return stats;
        }

        let mut x: Vec<NVec3> = states.iter().map(|s| s.x).collect();
        let mut v: Vec<NVec3> = states.iter().map(|s| s.v).collect();

        let mut t = 0.0;
        let mut h = dt.min(self.max_dt);
        let mut attempts = 0u32;

        while t < dt {
            let remaining = dt - t;

            if attempts >= self.max_substeps {
                // budget spent: cover the rest in one step and flag it
                let trial = self.trial(&x, &v, remaining, &mut accel);
                log::debug!("rkf45: substep budget exhausted, forcing final step of {remaining:.3e}");
                stats.max_error = stats.max_error.max(trial.error);
                stats.substeps += 1;
                stats.converged = false;
                x = trial.x;
                v = trial.v;
                break;
            }

            let last = h >= remaining;
            let h_try = if last { remaining } else { h };
            attempts += 1;

            let trial = self.trial(&x, &v, h_try, &mut accel);
            let err = trial.error;
            let factor = if !err.is_finite() {
                MIN_SCALE
            } else if err > 0.0 {
                (SAFETY * err.powf(-0.2)).clamp(MIN_SCALE, MAX_SCALE)
            } else {
                MAX_SCALE
            };

            if err <= 1.0 || h_try <= self.min_dt {
                if err > 1.0 || err.is_nan() {
                    stats.converged = false;
                }
                stats.max_error = stats.max_error.max(err);
                stats.substeps += 1;
                x = trial.x;
                v = trial.v;
                t = if last { dt } else { t + h_try };
                h = (h_try * factor).clamp(self.min_dt, self.max_dt);
            } else {
                stats.rejected += 1;
                h = (h_try * factor).max(self.min_dt);
            }
        }

        let a = accel(&x);
        for (((s, xi), vi), ai) in states.iter_mut().zip(x).zip(v).zip(a) {
            s.x = xi;
            s.v = vi;
            s.a = ai;
        }
        stats
    }

    /// One embedded Fehlberg step of size `h` from (x0, v0)
    fn trial<F>(&self, x0: &[NVec3], v0: &[NVec3], h: f64, accel: &mut F) -> Trial
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>,
    {
        let n = x0.len();
        // kx[s] = dx/dt, kv[s] = dv/dt at stage s
        let mut kx: Vec<Vec<NVec3>> = Vec::with_capacity(6);
        let mut kv: Vec<Vec<NVec3>> = Vec::with_capacity(6);

        for (s, row) in B.iter().enumerate() {
            let mut xs = x0.to_vec();
            let mut vs = v0.to_vec();
            for (j, &b) in row.iter().enumerate().take(s) {
                if b == 0.0 {
                    continue;
                }
                for k in 0..n {
                    xs[k] += kx[j][k] * (h * b);
                    vs[k] += kv[j][k] * (h * b);
                }
            }
            kv.push(accel(&xs));
            kx.push(vs);
        }

        let mut x5 = x0.to_vec();
        let mut v5 = v0.to_vec();
        let mut ex = vec![NVec3::zeros(); n];
        let mut ev = vec![NVec3::zeros(); n];
        for s in 0..6 {
            let diff = C5[s] - C4[s];
            for k in 0..n {
                x5[k] += kx[s][k] * (h * C5[s]);
                v5[k] += kv[s][k] * (h * C5[s]);
                ex[k] += kx[s][k] * (h * diff);
                ev[k] += kv[s][k] * (h * diff);
            }
        }

        let mut error: f64 = 0.0;
        for k in 0..n {
            for c in 0..3 {
                let sx = self.atol + self.rtol * x0[k][c].abs().max(x5[k][c].abs());
                let sv = self.atol + self.rtol * v0[k][c].abs().max(v5[k][c].abs());
                let e = (ex[k][c].abs() / sx).max(ev[k][c].abs() / sv);
                // NaN must win so the step is rejected
                if e.is_nan() || e > error {
                    error = e;
                }
            }
        }

        Trial { x: x5, v: v5, error }
    }
}

impl Integrator for AdaptiveRkf45 {
    fn advance<F>(&self, states: &mut [PhaseState], dt: f64, accel: F) -> IntegrationStats
    where
        F: FnMut(&[NVec3]) -> Vec<NVec3>,
    {
        self.integrate(states, dt, accel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonic(xs: &[NVec3]) -> Vec<NVec3> {
        xs.iter().map(|x| -x).collect()
    }

    fn oscillator() -> PhaseState {
        PhaseState { x: NVec3::new(1.0, 0.0, 0.0), v: NVec3::zeros(), a: NVec3::new(-1.0, 0.0, 0.0) }
    }

    #[test]
    fn verlet_batch_calls_accel_once() {
        let mut calls = 0;
        let mut states = vec![oscillator(); 3];
        VelocityVerlet.step_batch(&mut states, 0.01, |xs| {
            calls += 1;
            harmonic(xs)
        });
        assert_eq!(calls, 1);

        let mut empty: Vec<PhaseState> = Vec::new();
        VelocityVerlet.step_batch(&mut empty, 0.01, |xs| {
            calls += 1;
            harmonic(xs)
        });
        assert_eq!(calls, 2);
    }

    #[test]
    fn verlet_is_time_reversible() {
        let mut s = oscillator();
        let start = s;
        for _ in 0..1000 {
            VelocityVerlet.step(&mut s, 0.01, |x| -x);
        }
        s.v = -s.v;
        for _ in 0..1000 {
            VelocityVerlet.step(&mut s, 0.01, |x| -x);
        }
        assert!((s.x - start.x).norm() < 1e-9);
        assert!((s.v + start.v).norm() < 1e-9);
    }

    #[test]
    fn rkf45_tracks_harmonic_oscillator() {
        let rk = AdaptiveRkf45 { rtol: 1e-10, atol: 1e-12, min_dt: 1e-8, max_dt: 1.0, max_substeps: 10_000 };
        let mut states = vec![oscillator()];
        let t = std::f64::consts::PI; // half period: x = -1
        let stats = rk.integrate(&mut states, t, harmonic);
        assert!(stats.converged);
        assert!(stats.substeps > 1);
        assert!((states[0].x.x + 1.0).abs() < 1e-7, "x = {}", states[0].x.x);
        assert!(states[0].v.x.abs() < 1e-7);
        assert!((states[0].a.x - 1.0).abs() < 1e-7);
    }

    #[test]
    fn rkf45_budget_exhaustion_is_reported() {
        let rk = AdaptiveRkf45 { rtol: 1e-14, atol: 1e-16, min_dt: 1e-12, max_dt: 10.0, max_substeps: 2 };
        let mut states = vec![oscillator()];
        let stats = rk.integrate(&mut states, 5.0, harmonic);
        assert!(!stats.converged);
        // the whole interval was still covered: energy stays near 0.5
        let e = 0.5 * states[0].v.norm_squared() + 0.5 * states[0].x.norm_squared();
        assert!(e.is_finite());
    }

    #[test]
    fn integrators_share_the_trait() {
        fn run<I: Integrator>(integrator: &I) -> f64 {
            let mut states = vec![oscillator()];
            for _ in 0..100 {
                integrator.advance(&mut states, 0.01, harmonic);
            }
            states[0].x.x
        }
        let rk = AdaptiveRkf45 { rtol: 1e-10, atol: 1e-12, min_dt: 1e-8, max_dt: 1.0, max_substeps: 100 };
        let exact = 1.0_f64.cos();
        assert!((run(&VelocityVerlet) - exact).abs() < 1e-4);
        assert!((run(&rk) - exact).abs() < 1e-8);
    }
}
