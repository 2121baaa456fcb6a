//! Collision detection and resolution
//!
//! Overlaps (`d < r_a + r_b`) are found with a sweep along x and resolved
//! closest first. A body consumed by a merge is skipped by every later
//! contact in the same pass, so cascades resolve one merge at a time.
//!
//! - merge: mass and momentum conserved, position at the center of mass,
//!   radius from summed volumes (constant density)
//! - bounce: relative normal velocity reflected with a restitution
//!   coefficient, only for approaching pairs; a fixed body has infinite mass
//!
//! Pairs closer than the softening length are also reported as singularities.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::simulation::params::CollisionMode;
use crate::simulation::states::{is_finite3, Body, BodyId};

/// A pair of body indices and their separation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub i: usize,
    pub j: usize,
    pub separation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CollisionOutcome {
    Merged { survivor: BodyId, absorbed: BodyId },
    Bounced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub a: BodyId,
    pub b: BodyId,
    pub separation: f64,
    pub outcome: CollisionOutcome,
}

/// Everything one resolution pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionSummary {
    pub events: Vec<CollisionEvent>,
    pub singular: Vec<(BodyId, BodyId, f64)>, // pairs inside the softening length
}

/// Find overlapping pairs and pairs closer than `softening`.
///
/// Returns `(overlaps, singular)`, each sorted by separation then indices.
pub fn detect_contacts(bodies: &[Body], softening: f64) -> (Vec<Contact>, Vec<Contact>) {
    let mut order: Vec<usize> = (0..bodies.len())
        .filter(|&i| bodies[i].state.active && is_finite3(&bodies[i].state.x))
        .collect();
    order.sort_by(|&a, &b| bodies[a].state.x.x.total_cmp(&bodies[b].state.x.x).then(a.cmp(&b)));

    let r_max = order.iter().map(|&i| bodies[i].core.radius).fold(0.0, f64::max);

    let mut overlaps = Vec::new();
    let mut singular = Vec::new();
    for (oa, &i) in order.iter().enumerate() {
        let bi = &bodies[i];
        let reach = (bi.core.radius + r_max).max(softening);
        for &j in &order[oa + 1..] {
            let bj = &bodies[j];
            if bj.state.x.x - bi.state.x.x > reach {
                break;
            }
            let d = bi.distance_to(bj);
            let (lo, hi) = if i < j { (i, j) } else { (j, i) };
            if d < bi.core.radius + bj.core.radius {
                overlaps.push(Contact { i: lo, j: hi, separation: d });
            }
            if d < softening {
                singular.push(Contact { i: lo, j: hi, separation: d });
            }
        }
    }

    let by_distance = |a: &Contact, b: &Contact| a.separation.total_cmp(&b.separation).then((a.i, a.j).cmp(&(b.i, b.j)));
    overlaps.sort_by(by_distance);
    singular.sort_by(by_distance);
    (overlaps, singular)
}

/// Order two bodies by who survives a merge: `Less` means `a` survives.
///
/// Fixed beats free, then heavier, then by kind rank, then lower id.
pub fn survivor_order(a: &Body, b: &Body) -> Ordering {
    b.core
        .fixed
        .cmp(&a.core.fixed)
        .then_with(|| b.core.mass.total_cmp(&a.core.mass))
        .then_with(|| b.core.kind.merge_rank().cmp(&a.core.kind.merge_rank()))
        .then_with(|| a.core.id.cmp(&b.core.id))
}

/// Absorb `loser` into `winner` and deactivate the loser
pub fn merge_into(winner: &mut Body, loser: &mut Body) {
    let m_w = winner.core.mass;
    let m_l = loser.core.mass;
    let total = m_w + m_l;

    if !winner.core.fixed && total > 0.0 {
        winner.state.x = (winner.state.x * m_w + loser.state.x * m_l) / total;
        winner.state.v = (winner.momentum() + loser.momentum()) / total;
    }
    winner.core.mass = total;
    winner.core.radius = (winner.core.radius.powi(3) + loser.core.radius.powi(3)).cbrt();

    loser.state.active = false;
}

/// Reflect the approaching normal velocity of a pair; returns false when nothing changed
pub fn bounce(a: &mut Body, b: &mut Body, restitution: f64) -> bool {
    let r = b.state.x - a.state.x;
    let d = r.norm();
    if d == 0.0 {
        return false;
    }
    let n = r / d;

    let approach = (b.state.v - a.state.v).dot(&n);
    if approach >= 0.0 {
        return false;
    }

    let inv = |body: &Body| if body.core.fixed { 0.0 } else { 1.0 / body.core.mass };
    let (inv_a, inv_b) = (inv(a), inv(b));
    let inv_sum = inv_a + inv_b;
    if inv_sum == 0.0 {
        return false;
    }

    let impulse = -(1.0 + restitution) * approach / inv_sum;
    a.state.v -= n * (impulse * inv_a);
    b.state.v += n * (impulse * inv_b);
    true
}

/// Two distinct mutable bodies out of one slice
fn pair_mut(bodies: &mut [Body], i: usize, j: usize) -> (&mut Body, &mut Body) {
    debug_assert!(i < j);
    let (left, right) = bodies.split_at_mut(j);
    (&mut left[i], &mut right[0])
}

/// Detect and resolve every contact according to `mode`
pub fn resolve(bodies: &mut [Body], mode: CollisionMode, restitution: f64, softening: f64) -> CollisionSummary {
    let (overlaps, singular) = detect_contacts(bodies, softening);
    let mut summary = CollisionSummary {
        singular: singular
            .iter()
            .map(|c| (bodies[c.i].core.id, bodies[c.j].core.id, c.separation))
            .collect(),
        ..Default::default()
    };

    for c in overlaps {
        let (a, b) = pair_mut(bodies, c.i, c.j);
        // consumed earlier in this pass
        if !a.state.active || !b.state.active {
            continue;
        }
        let (id_a, id_b) = (a.core.id, b.core.id);

        let outcome = match mode {
            CollisionMode::None => continue,
            CollisionMode::Merge => {
                let (winner, loser) = if survivor_order(a, b) == Ordering::Less { (a, b) } else { (b, a) };
                merge_into(winner, loser);
                CollisionOutcome::Merged { survivor: winner.core.id, absorbed: loser.core.id }
            }
            CollisionMode::Bounce => {
                if !bounce(a, b, restitution) {
                    continue;
                }
                CollisionOutcome::Bounced
            }
        };

        log::debug!("collision {id_a} / {id_b} at {:.3e}: {outcome:?}", c.separation);
        summary.events.push(CollisionEvent { a: id_a, b: id_b, separation: c.separation, outcome });
    }

    summary
}
