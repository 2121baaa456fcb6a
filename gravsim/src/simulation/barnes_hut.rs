//! # Barnes–Hut Octree (3D)
//!
//! This module implements a **3D Barnes–Hut octree** for approximating
//! gravitational acceleration in an `N`-body system. It replaces the naive
//! `O(N²)` all-pairs sum with an approximate `O(N log N)` traversal while
//! keeping nearby interactions exact.
//!
//! ## Core Concepts
//!
//! A group of distant bodies is treated as a single pseudo-body located at
//! their center of mass. For sufficiently far clusters, one interaction is far
//! cheaper than many individual ones.
//!
//! - Space is recursively subdivided into 8 cubic octants.
//! - Each octant becomes a node of the tree, stored in one arena (`Vec`).
//! - A leaf holds a bucket of points. Above `max_depth` a bucket holds at most
//!   one point; at `max_depth` the bucket takes every point that lands there,
//!   so coincident bodies never recurse forever.
//! - Each node stores:
//!   - total mass of its subtree
//!   - center of mass (COM)
//!   - cube center and half edge length (for opening test and subdivision)
//!
//! ## Determinism
//!
//! Points are inserted in the order they are given (body-array order) and
//! aggregates are summed bucket first, then children in index order. Two
//! builds from the same bodies produce bit-identical trees and accelerations.
//!
//! ## Softening
//!
//! Every pairwise term uses Plummer softening,
//! `a = G m r / (|r|² + ε²)^{3/2}` and `φ = -G m / sqrt(|r|² + ε²)`,
//! so a zero separation yields a zero (never infinite) contribution.

use crate::simulation::states::{is_finite3, Body, BodyId, NVec3};

/// A mass point stored in the tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreePoint {
    pub id: BodyId,
    pub x: NVec3,
    pub m: f64,
}

/// A single octree node.
///
/// Each node represents a cubic region of space that may be:
/// - empty (`mass == 0`, no points, no children)
/// - a leaf with a bucket of point indices
/// - an internal node with up to 8 children
///
/// The node stores both its geometry and the aggregate data (total mass,
/// center of mass) used to approximate it from far away.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub center: NVec3,
    pub half_size: f64,
    pub mass: f64,
    pub com: NVec3,
    pub children: [Option<usize>; 8], // indices into BarnesHutTree::nodes
    pub points: Vec<usize>,           // indices into BarnesHutTree::points
    pub depth: usize,
}

impl OctreeNode {
    fn new(center: NVec3, half_size: f64, depth: usize) -> Self {
        Self {
            center,
            half_size,
            mass: 0.0,
            com: NVec3::zeros(),
            children: [None; 8],
            points: Vec::new(),
            depth,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }

    /// Whether `pos` lies inside (or on the boundary of) this node's cube
    fn contains(&self, pos: &NVec3) -> bool {
        let d = pos - self.center;
        d.x.abs() <= self.half_size && d.y.abs() <= self.half_size && d.z.abs() <= self.half_size
    }
}

/// A complete 3D Barnes–Hut octree.
///
/// This structure owns:
/// - all octree nodes (`nodes`, root at index 0 when non-empty)
/// - a copy of every inserted point (`points`)
///
/// An empty tree (no massive points) answers every query with zero.
#[derive(Debug, Clone)]
pub struct BarnesHutTree {
    pub nodes: Vec<OctreeNode>,
    pub points: Vec<TreePoint>,
    pub max_depth: usize,
}

impl BarnesHutTree {
    /// Build an octree over every active body with positive mass.
    ///
    /// Inactive bodies, massless bodies and bodies with non-finite positions
    /// are skipped; they cannot contribute to anyone's acceleration.
    ///
    /// # Parameters
    /// - `bodies`   : The body array, in id order.
    /// - `max_depth`: Deepest level at which nodes are still subdivided.
    pub fn build(bodies: &[Body], max_depth: usize) -> Self {
        let points = bodies
            .iter()
            .filter(|b| b.state.active)
            .map(|b| TreePoint { id: b.core.id, x: b.state.x, m: b.core.mass })
            .collect();
        Self::from_points(points, max_depth)
    }

    /// Build an octree from an explicit point list.
    ///
    /// This:
    /// 1. Drops points with non-positive mass or non-finite positions.
    /// 2. Computes a cube that encloses every remaining point.
    /// 3. Inserts the points in order, subdividing nodes as needed.
    /// 4. Computes total mass and center of mass for every node (bottom-up).
    ///
    /// # Parameters
    /// - `points`   : Mass points, inserted in the given order.
    /// - `max_depth`: Deepest level at which nodes are still subdivided.
    ///
    /// # Returns
    /// A tree whose `nodes[0]` covers every point (or no nodes at all when
    /// there is nothing to insert).
    pub fn from_points(points: Vec<TreePoint>, max_depth: usize) -> Self {
        let points: Vec<TreePoint> = points
            .into_iter()
            .filter(|p| p.m > 0.0 && p.m.is_finite() && is_finite3(&p.x))
            .collect();

        let mut tree = BarnesHutTree { nodes: Vec::new(), points, max_depth };
        if tree.points.is_empty() {
            return tree;
        }

        let (center, half_size) = bounding_cube(&tree.points);
        tree.nodes.push(OctreeNode::new(center, half_size, 0));

        for i in 0..tree.points.len() {
            tree.insert_point(0, i);
        }

        tree.compute_mass_and_com(0);
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total mass held by the tree
    pub fn total_mass(&self) -> f64 {
        self.nodes.first().map_or(0.0, |root| root.mass)
    }

    /// Deepest level actually reached by any node
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Compute the gravitational acceleration at an arbitrary position.
    ///
    /// Traverses the tree from the root:
    /// - for a node far enough away (according to `theta`) the node's total
    ///   mass at its COM stands in for all of its points;
    /// - otherwise the traversal descends, down to exact sums over leaf points.
    ///
    /// A node whose cube contains `position` is never approximated, so the
    /// excluded body's own mass is never folded into a pseudo-body.
    ///
    /// # Parameters
    /// - `position`: Where to evaluate the field.
    /// - `exclude` : A body to skip (the body sitting at `position`), if any.
    /// - `g`       : Gravitational constant.
    /// - `eps2`    : Softening length squared.
    /// - `theta`   : Opening-angle threshold; `0` opens every node (exact).
    pub fn calculate_acceleration(&self, position: &NVec3, exclude: Option<BodyId>, g: f64, eps2: f64, theta: f64) -> NVec3 {
        let mut acc = NVec3::zeros();
        if !self.nodes.is_empty() {
            self.traverse_acceleration(0, position, exclude, eps2, theta, &mut acc);
        }
        acc * g
    }

    /// Compute the gravitational potential at a position (same traversal as
    /// [`BarnesHutTree::calculate_acceleration`]).
    pub fn calculate_potential(&self, position: &NVec3, exclude: Option<BodyId>, g: f64, eps2: f64, theta: f64) -> f64 {
        let mut phi = 0.0;
        if !self.nodes.is_empty() {
            self.traverse_potential(0, position, exclude, eps2, theta, &mut phi);
        }
        -g * phi
    }

    // helpers ==============================================================================

    /// Insert point `point_idx` into the subtree rooted at `node_idx`.
    ///
    /// - An empty leaf stores the point in its bucket.
    /// - A leaf at `max_depth` appends to its bucket.
    /// - An occupied leaf above `max_depth` is split: its point moves down one
    ///   level and the new point follows.
    /// - An internal node forwards the point to the octant containing it.
    fn insert_point(&mut self, node_idx: usize, point_idx: usize) {
        let depth = self.nodes[node_idx].depth;
        let is_leaf = self.nodes[node_idx].is_leaf();

        if is_leaf {
            if self.nodes[node_idx].points.is_empty() || depth >= self.max_depth {
                self.nodes[node_idx].points.push(point_idx);
                return;
            }
            // push the resident point(s) one level down
            let resident = std::mem::take(&mut self.nodes[node_idx].points);
            for r in resident {
                self.descend(node_idx, r);
            }
        }

        self.descend(node_idx, point_idx);
    }

    /// Forward a point into the right child, creating the child on demand
    fn descend(&mut self, node_idx: usize, point_idx: usize) {
        let pos = self.points[point_idx].x;
        let center = self.nodes[node_idx].center;
        let octant = child_index_for_point(&pos, &center);

        let child_idx = match self.nodes[node_idx].children[octant] {
            Some(idx) => idx,
            None => {
                let half = self.nodes[node_idx].half_size * 0.5;
                let depth = self.nodes[node_idx].depth + 1;
                let new_idx = self.nodes.len();
                self.nodes.push(OctreeNode::new(child_center(&center, half, octant), half, depth));
                self.nodes[node_idx].children[octant] = Some(new_idx);
                new_idx
            }
        };

        self.insert_point(child_idx, point_idx);
    }

    /// Recursively compute total mass and center of mass for a subtree.
    ///
    /// Bucket points are summed first (in insertion order), then children in
    /// octant order, so the floating-point result never depends on anything
    /// but the input order.
    fn compute_mass_and_com(&mut self, node_idx: usize) {
        let mut mass = 0.0;
        let mut weighted = NVec3::zeros();

        for &p in &self.nodes[node_idx].points {
            let point = &self.points[p];
            mass += point.m;
            weighted += point.x * point.m;
        }

        let children = self.nodes[node_idx].children;
        for child_idx in children.iter().flatten().copied() {
            self.compute_mass_and_com(child_idx);
            let child = &self.nodes[child_idx];
            mass += child.mass;
            weighted += child.com * child.mass;
        }

        let node = &mut self.nodes[node_idx];
        node.mass = mass;
        node.com = if mass > 0.0 { weighted / mass } else { node.center };
    }

    /// Decide whether `node` may be replaced by its COM for a query at `pos`
    fn accept(node: &OctreeNode, pos: &NVec3, theta: f64) -> Option<NVec3> {
        if node.is_leaf() || node.contains(pos) {
            return None;
        }
        let r = node.com - pos;
        let dist = r.norm();
        if dist > 0.0 && (2.0 * node.half_size) / dist < theta {
            Some(r)
        } else {
            None
        }
    }

    /// Accumulate `Σ m r / (|r|² + ε²)^{3/2}` (G applied by the caller)
    fn traverse_acceleration(&self, node_idx: usize, pos: &NVec3, exclude: Option<BodyId>, eps2: f64, theta: f64, acc: &mut NVec3) {
        let node = &self.nodes[node_idx];
        if node.mass == 0.0 {
            return;
        }

        if let Some(r) = Self::accept(node, pos, theta) {
            *acc += softened_inv_r3(&r, eps2) * node.mass * r;
            return;
        }

        for &p in &node.points {
            let point = &self.points[p];
            if Some(point.id) == exclude {
                continue;
            }
            let r = point.x - pos;
            *acc += softened_inv_r3(&r, eps2) * point.m * r;
        }

        for child in node.children.iter().flatten() {
            self.traverse_acceleration(*child, pos, exclude, eps2, theta, acc);
        }
    }

    /// Accumulate `Σ m / sqrt(|r|² + ε²)` (−G applied by the caller)
    fn traverse_potential(&self, node_idx: usize, pos: &NVec3, exclude: Option<BodyId>, eps2: f64, theta: f64, phi: &mut f64) {
        let node = &self.nodes[node_idx];
        if node.mass == 0.0 {
            return;
        }

        if let Some(r) = Self::accept(node, pos, theta) {
            *phi += node.mass * softened_inv_r(&r, eps2);
            return;
        }

        for &p in &node.points {
            let point = &self.points[p];
            if Some(point.id) == exclude {
                continue;
            }
            *phi += point.m * softened_inv_r(&(point.x - pos), eps2);
        }

        for child in node.children.iter().flatten() {
            self.traverse_potential(*child, pos, exclude, eps2, theta, phi);
        }
    }
}

/// `1 / sqrt(|r|² + ε²)`, or 0 for a coincident unsoftened pair
pub fn softened_inv_r(r: &NVec3, eps2: f64) -> f64 {
    let d2 = r.norm_squared() + eps2;
    if d2 > 0.0 {
        d2.sqrt().recip()
    } else {
        0.0
    }
}

/// `1 / (|r|² + ε²)^{3/2}`, or 0 for a coincident unsoftened pair
pub fn softened_inv_r3(r: &NVec3, eps2: f64) -> f64 {
    let inv_r = softened_inv_r(r, eps2);
    inv_r * inv_r * inv_r
}

/// Compute a cube (center, half edge) enclosing every point.
///
/// The cube is padded slightly so points on the max face still fall strictly
/// inside, and given a minimal size when all points coincide.
fn bounding_cube(points: &[TreePoint]) -> (NVec3, f64) {
    let mut min = points[0].x;
    let mut max = points[0].x;
    for p in &points[1..] {
        min = min.inf(&p.x);
        max = max.sup(&p.x);
    }

    let center = (min + max) * 0.5;
    let extent = max - min;
    let half = 0.5 * extent.x.max(extent.y).max(extent.z);
    let half = if half > 0.0 { half * (1.0 + 1e-9) } else { 1.0 };
    (center, half)
}

/// Which child octant (0..7) of a node centered at `center` contains `pos`.
///
/// Bit layout:
/// - bit 0: x >= center.x
/// - bit 1: y >= center.y
/// - bit 2: z >= center.z
fn child_index_for_point(pos: &NVec3, center: &NVec3) -> usize {
    let mut idx = 0;
    if pos.x >= center.x {
        idx |= 1;
    }
    if pos.y >= center.y {
        idx |= 2;
    }
    if pos.z >= center.z {
        idx |= 4;
    }
    idx
}

/// Center of octant `octant` of a parent centered at `center`, child half edge `half`
fn child_center(center: &NVec3, half: f64, octant: usize) -> NVec3 {
    let sign = |bit: usize| if octant & bit != 0 { 1.0 } else { -1.0 };
    center + NVec3::new(sign(1) * half, sign(2) * half, sign(4) * half)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u32, x: f64, y: f64, z: f64, m: f64) -> TreePoint {
        TreePoint { id: BodyId(id), x: NVec3::new(x, y, z), m }
    }

    #[test]
    fn empty_tree_gives_zero() {
        let tree = BarnesHutTree::from_points(Vec::new(), 16);
        assert!(tree.is_empty());
        assert_eq!(tree.calculate_acceleration(&NVec3::zeros(), None, 1.0, 0.0, 0.5), NVec3::zeros());
        assert_eq!(tree.calculate_potential(&NVec3::zeros(), None, 1.0, 0.0, 0.5), 0.0);
    }

    #[test]
    fn aggregates_match_points() {
        let pts = vec![
            point(0, 1.0, 0.0, 0.0, 1.0),
            point(1, -1.0, 0.0, 0.0, 3.0),
            point(2, 0.0, 4.0, -2.0, 2.0),
        ];
        let tree = BarnesHutTree::from_points(pts, 16);
        let root = &tree.nodes[0];
        assert_eq!(root.mass, 6.0);
        let com = NVec3::new((1.0 - 3.0) / 6.0, 8.0 / 6.0, -4.0 / 6.0);
        assert!((root.com - com).norm() < 1e-12);
    }

    #[test]
    fn coincident_points_stop_at_max_depth() {
        let pts: Vec<TreePoint> = (0..10).map(|i| point(i, 1.0, 1.0, 1.0, 1.0)).collect();
        let tree = BarnesHutTree::from_points(pts, 8);
        assert!(tree.depth() <= 8);
        assert_eq!(tree.total_mass(), 10.0);
        // the field of nine coincident points, excluding the tenth, is finite
        let a = tree.calculate_acceleration(&NVec3::new(1.0, 1.0, 1.0), Some(BodyId(0)), 1.0, 0.01, 0.5);
        assert!(is_finite3(&a));
        assert_eq!(a, NVec3::zeros());
    }

    #[test]
    fn massless_and_non_finite_points_are_skipped() {
        let pts = vec![
            point(0, 0.0, 0.0, 0.0, 0.0),
            point(1, f64::NAN, 0.0, 0.0, 1.0),
            point(2, 2.0, 0.0, 0.0, 1.0),
        ];
        let tree = BarnesHutTree::from_points(pts, 16);
        assert_eq!(tree.points.len(), 1);
        assert_eq!(tree.total_mass(), 1.0);
    }

    #[test]
    fn child_index_bits() {
        let c = NVec3::zeros();
        assert_eq!(child_index_for_point(&NVec3::new(-1.0, -1.0, -1.0), &c), 0);
        assert_eq!(child_index_for_point(&NVec3::new(1.0, -1.0, -1.0), &c), 1);
        assert_eq!(child_index_for_point(&NVec3::new(-1.0, 1.0, -1.0), &c), 2);
        assert_eq!(child_index_for_point(&NVec3::new(1.0, 1.0, 1.0), &c), 7);
    }
}
