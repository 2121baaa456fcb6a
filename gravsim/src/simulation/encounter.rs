//! Close-encounter classification
//!
//! Decides, once per tick, which bodies leave the symplectic bulk integrator
//! for the adaptive one. A pair of active bodies is flagged when any enabled
//! criterion holds:
//!
//! - Hill: `d < hill_factor * (h_i + h_j)`, where `h_k = |x_k - x_p| cbrt(m_k / 3 m_p)`
//!   is the Hill radius of `k` about the primary `p` (the most massive active body, `h_p = 0`)
//! - tidal: the pull of one member on the other exceeds `tidal_ratio` times
//!   everything else acting on it
//! - jerk: `G (m_i + m_j) |v_i - v_j| / (d² + ε²)^{3/2}` exceeds `jerk_norm`
//!
//! The tidal and jerk tests skip pairs containing the primary (every orbit
//! around the primary would trip them). A pair flagged on the previous tick is
//! judged against thresholds relaxed by `1 + hysteresis`.
//!
//! Candidate pairs come from a sweep along x with a per-body reach that bounds
//! every criterion from above, so the exact tests run on a small superset.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::simulation::barnes_hut::softened_inv_r3;
use crate::simulation::params::{EncounterParams, SimConfig};
use crate::simulation::states::{is_finite3, Body, BodyId};

/// Unordered body pair, stored as (lower id, higher id)
pub type BodyPair = (BodyId, BodyId);

pub fn ordered_pair(a: BodyId, b: BodyId) -> BodyPair {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncounterReason {
    Hill,
    Tidal,
    Jerk,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedPair {
    pub pair: BodyPair,
    pub i: usize, // body index of pair.0
    pub j: usize, // body index of pair.1
    pub separation: f64,
    pub reason: EncounterReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncounterReport {
    pub flagged: Vec<FlaggedPair>, // closest first
    pub subset: Vec<usize>,        // admitted body indices, ascending
    pub overflow: Vec<BodyPair>,   // flagged but left on the bulk integrator
}

impl EncounterReport {
    /// Every flagged pair, admitted or not; the hysteresis memory for the next tick
    pub fn flagged_set(&self) -> BTreeSet<BodyPair> {
        self.flagged.iter().map(|f| f.pair).collect()
    }
}

/// Effective thresholds for one pair
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    hill_factor: f64,
    tidal_ratio: Option<f64>,
    jerk_norm: Option<f64>,
}

impl Thresholds {
    fn strict(p: &EncounterParams) -> Self {
        Self { hill_factor: p.hill_factor, tidal_ratio: p.tidal_ratio, jerk_norm: p.jerk_norm }
    }

    fn relaxed(p: &EncounterParams) -> Self {
        let band = 1.0 + p.hysteresis;
        Self {
            hill_factor: p.hill_factor * band,
            tidal_ratio: p.tidal_ratio.map(|t| t / band),
            jerk_norm: p.jerk_norm.map(|j| j / band),
        }
    }
}

/// Index of the most massive active body (lowest index on ties)
pub fn primary_index(bodies: &[Body]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, b) in bodies.iter().enumerate() {
        if !b.state.active {
            continue;
        }
        match best {
            Some(k) if bodies[k].core.mass >= b.core.mass => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Hill radius of `body` about `primary`; zero for the primary itself
pub fn hill_radius(body: &Body, primary: &Body) -> f64 {
    if body.core.id == primary.core.id || primary.core.mass <= 0.0 {
        return 0.0;
    }
    let d = body.distance_to(primary);
    d * (body.core.mass.max(0.0) / (3.0 * primary.core.mass)).cbrt()
}

/// Classify close encounters and admit bodies to the adaptive subset.
///
/// `previous` holds the pairs flagged on the last tick. Body accelerations
/// (`state.a`) must be current; the tidal test reads them.
pub fn classify(bodies: &[Body], previous: &BTreeSet<BodyPair>, config: &SimConfig) -> EncounterReport {
    let mut report = EncounterReport::default();
    let Some(p) = primary_index(bodies) else {
        return report;
    };
    let primary = &bodies[p];
    let params = &config.encounter;
    let g = config.gravitational_constant;
    let eps2 = config.eps2();
    let strict = Thresholds::strict(params);
    let loose = Thresholds::relaxed(params);

    let candidates: Vec<usize> = (0..bodies.len())
        .filter(|&i| bodies[i].state.active && is_finite3(&bodies[i].state.x) && is_finite3(&bodies[i].state.v))
        .collect();
    if candidates.len() < 2 {
        return report;
    }

    let hill: Vec<f64> = bodies.iter().map(|b| hill_radius(b, primary)).collect();
    let reach = sweep_reach(bodies, &candidates, &hill, p, g, &loose);
    let reach_max = candidates.iter().map(|&i| reach[i]).fold(0.0, f64::max);

    let mut order = candidates.clone();
    order.sort_by(|&a, &b| bodies[a].state.x.x.total_cmp(&bodies[b].state.x.x).then(a.cmp(&b)));

    for (oa, &i) in order.iter().enumerate() {
        for &j in &order[oa + 1..] {
            let dx = bodies[j].state.x.x - bodies[i].state.x.x;
            if dx > reach[i] + reach_max {
                break;
            }
            if dx > reach[i] + reach[j] {
                continue;
            }
            let (bi, bj) = (&bodies[i], &bodies[j]);
            if bi.core.fixed && bj.core.fixed {
                continue;
            }

            let pair = ordered_pair(bi.core.id, bj.core.id);
            let th = if previous.contains(&pair) { loose } else { strict };
            let with_primary = i == p || j == p;

            if let Some(reason) = test_pair(bi, bj, hill[i], hill[j], with_primary, &th, g, eps2) {
                let (lo, hi) = if bi.core.id <= bj.core.id { (i, j) } else { (j, i) };
                report.flagged.push(FlaggedPair {
                    pair,
                    i: lo,
                    j: hi,
                    separation: bi.distance_to(bj),
                    reason,
                });
            }
        }
    }

    report
        .flagged
        .sort_by(|a, b| a.separation.total_cmp(&b.separation).then(a.pair.cmp(&b.pair)));
    admit(bodies, &mut report, params.max_subset_size);
    report
}

/// Admit flagged pairs, closest first, while the subset has room
fn admit(bodies: &[Body], report: &mut EncounterReport, max_subset: usize) {
    let mut admitted: BTreeSet<usize> = BTreeSet::new();
    for f in &report.flagged {
        let members: Vec<usize> = [f.i, f.j]
            .into_iter()
            .filter(|&k| !bodies[k].core.fixed && !admitted.contains(&k))
            .collect();
        if admitted.len() + members.len() <= max_subset {
            admitted.extend(members);
        } else {
            report.overflow.push(f.pair);
        }
    }
    report.subset = admitted.into_iter().collect();
}

/// Upper bound, per body, on the separation at which any criterion can fire
fn sweep_reach(bodies: &[Body], candidates: &[usize], hill: &[f64], p: usize, g: f64, th: &Thresholds) -> Vec<f64> {
    let m_max = candidates
        .iter()
        .filter(|&&k| k != p)
        .map(|&k| bodies[k].core.mass)
        .fold(0.0, f64::max);
    let v_max = candidates.iter().map(|&k| bodies[k].state.v.norm()).fold(0.0, f64::max);

    // jerk: d³ < G (m_i + m_j) |v_rel| / J
    let jerk_reach = th
        .jerk_norm
        .map_or(0.0, |j| if j > 0.0 { (g * 2.0 * m_max * 2.0 * v_max / j).cbrt() } else { f64::INFINITY });

    let mut reach = vec![0.0; bodies.len()];
    for &k in candidates {
        let mut r = th.hill_factor * hill[k];
        if k != p {
            // tidal: G m_j / d² > T/(1+T) |a_k|
            if let Some(t) = th.tidal_ratio {
                let a = bodies[k].state.a.norm();
                let tidal = if t > 0.0 && a > 0.0 { (g * m_max * (1.0 + t) / (t * a)).sqrt() } else { f64::INFINITY };
                r = r.max(tidal);
            }
            r = r.max(jerk_reach);
        }
        reach[k] = r;
    }
    reach
}

/// Apply every enabled criterion to one pair; the first that fires names the reason
#[allow(clippy::too_many_arguments)]
fn test_pair(bi: &Body, bj: &Body, hi: f64, hj: f64, with_primary: bool, th: &Thresholds, g: f64, eps2: f64) -> Option<EncounterReason> {
    let r = bj.state.x - bi.state.x;
    let d = r.norm();

    if d < th.hill_factor * (hi + hj) {
        return Some(EncounterReason::Hill);
    }
    if with_primary {
        return None;
    }

    let inv_r3 = softened_inv_r3(&r, eps2);

    if let Some(t) = th.tidal_ratio {
        // pull of j on i and of i on j, against everything else acting on each
        let a_ij = r * (g * bj.core.mass * inv_r3);
        let a_ji = -r * (g * bi.core.mass * inv_r3);
        let rest_i = (bi.state.a - a_ij).norm();
        let rest_j = (bj.state.a - a_ji).norm();
        if a_ij.norm() > t * rest_i || a_ji.norm() > t * rest_j {
            return Some(EncounterReason::Tidal);
        }
    }

    if let Some(j) = th.jerk_norm {
        let v_rel = (bi.state.v - bj.state.v).norm();
        if g * (bi.core.mass + bj.core.mass) * v_rel * inv_r3 > j {
            return Some(EncounterReason::Jerk);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::states::{BodyCore, BodyKind, BodyState, IntegratorMode, NVec3};

    fn body(id: u32, mass: f64, x: NVec3, fixed: bool) -> Body {
        Body {
            core: BodyCore {
                id: BodyId(id),
                name: String::new(),
                kind: if fixed { BodyKind::Star } else { BodyKind::Asteroid },
                mass,
                radius: 0.0,
                fixed,
                owner: None,
            },
            state: BodyState {
                x,
                v: NVec3::zeros(),
                a: NVec3::zeros(),
                a_prev: NVec3::zeros(),
                active: true,
                mode: IntegratorMode::Symplectic,
                dominant: None,
            },
        }
    }

    fn hill_only() -> SimConfig {
        let mut cfg = SimConfig { gravitational_constant: 1.0, softening: 0.0, ..Default::default() };
        cfg.encounter.hill_factor = 1.0;
        cfg.encounter.tidal_ratio = None;
        cfg.encounter.jerk_norm = None;
        cfg.encounter.hysteresis = 0.1;
        cfg
    }

    /// Star at the origin and two bodies `scale` Hill thresholds apart
    fn pair_at(scale: f64) -> Vec<Body> {
        let star = body(0, 1.0, NVec3::zeros(), true);
        let m = 1e-3;
        let h = hill_radius(&body(1, m, NVec3::new(10.0, 0.0, 0.0), false), &star);
        let d = scale * 2.0 * h;
        vec![
            star,
            body(1, m, NVec3::new(10.0, -0.5 * d, 0.0), false),
            body(2, m, NVec3::new(10.0, 0.5 * d, 0.0), false),
        ]
    }

    #[test]
    fn primary_is_heaviest_active() {
        let mut bodies = pair_at(1.0);
        assert_eq!(primary_index(&bodies), Some(0));
        bodies[0].state.active = false;
        assert_eq!(primary_index(&bodies), Some(1));
        assert_eq!(hill_radius(&bodies[0], &bodies[0]), 0.0);
    }

    #[test]
    fn hysteresis_keeps_flagged_pairs_inside_band() {
        let cfg = hill_only();
        let pair = (BodyId(1), BodyId(2));
        let fresh = BTreeSet::new();
        let remembered: BTreeSet<BodyPair> = [pair].into_iter().collect();

        // inside the strict threshold: flagged either way
        assert_eq!(classify(&pair_at(0.95), &fresh, &cfg).flagged_set(), remembered);

        // inside the band: only a previously flagged pair stays flagged
        let bodies = pair_at(1.05);
        assert!(classify(&bodies, &fresh, &cfg).flagged.is_empty());
        let report = classify(&bodies, &remembered, &cfg);
        assert_eq!(report.flagged_set(), remembered);
        assert_eq!(report.subset, vec![1, 2]);

        // beyond the band: released
        let bodies = pair_at(1.15);
        assert!(classify(&bodies, &remembered, &cfg).flagged.is_empty());
    }

    #[test]
    fn zero_hysteresis_is_a_single_boundary() {
        let mut cfg = hill_only();
        cfg.encounter.hysteresis = 0.0;
        let remembered: BTreeSet<BodyPair> = [(BodyId(1), BodyId(2))].into_iter().collect();
        assert!(classify(&pair_at(1.05), &remembered, &cfg).flagged.is_empty());
    }

    #[test]
    fn overflow_pairs_stay_on_bulk() {
        let mut cfg = hill_only();
        cfg.encounter.max_subset_size = 2;
        let mut bodies = pair_at(0.5);
        // a second, wider pair far away along z
        let h = hill_radius(&bodies[1], &bodies[0]);
        bodies.push(body(3, 1e-3, NVec3::new(10.0, 0.0, 5.0), false));
        bodies.push(body(4, 1e-3, NVec3::new(10.0, 1.5 * h, 5.0), false));

        let report = classify(&bodies, &BTreeSet::new(), &cfg);
        assert_eq!(report.flagged.len(), 2);
        assert_eq!(report.flagged[0].pair, (BodyId(1), BodyId(2)));
        assert_eq!(report.subset, vec![1, 2]);
        assert_eq!(report.overflow, vec![(BodyId(3), BodyId(4))]);
    }

    #[test]
    fn tidal_test_skips_the_primary() {
        let mut cfg = hill_only();
        cfg.encounter.hill_factor = 0.0;
        cfg.encounter.tidal_ratio = Some(2.0);
        let mut bodies = vec![
            body(0, 1.0, NVec3::zeros(), true),
            body(1, 1e-3, NVec3::new(1.0, 0.0, 0.0), false),
        ];
        // the planet's whole acceleration comes from the star
        bodies[1].state.a = NVec3::new(-1.0, 0.0, 0.0);
        assert!(classify(&bodies, &BTreeSet::new(), &cfg).flagged.is_empty());

        // a heavy neighbour dominating the planet's acceleration is tidal
        bodies.push(body(2, 0.5, NVec3::new(1.1, 0.0, 0.0), false));
        let pull = 0.5 / (0.1 * 0.1);
        bodies[1].state.a = NVec3::new(-1.0 + pull, 0.0, 0.0);
        bodies[2].state.a = NVec3::new(-1e-3 / 0.01 - 1.0 / 1.21, 0.0, 0.0);
        let report = classify(&bodies, &BTreeSet::new(), &cfg);
        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].reason, EncounterReason::Tidal);
        assert_eq!(report.subset, vec![1, 2]);
    }
}
