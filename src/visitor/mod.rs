//! Stateful accumulators walked along a root-leaf-root tree traversal.

pub mod attribution;
pub mod impute;
pub mod interpolation;
pub mod nearneighbor;
pub mod score;

use crate::errors::Result;
use crate::l1distance;
use crate::nodeview::PathView;

// Default scoring functions. The seen/unseen split matters for anomaly
// detection: a point that matches an existing leaf is scored by how deep
// and heavy that leaf is, a separated point by how shallow the separation
// would be.

pub fn score_seen(depth: usize, mass: usize) -> f64 {
    1.0 / (depth as f64 + f64::log2(1.0 + mass as f64))
}

pub fn score_unseen(depth: usize, _mass: usize) -> f64 {
    1.0 / (depth as f64 + 1.0)
}

pub fn damp(leaf_mass: usize, tree_mass: usize) -> f64 {
    1.0 - leaf_mass as f64 / (2.0 * tree_mass as f64)
}

pub fn normalizer(score: f64, tree_mass: usize) -> f64 {
    score * f64::log2(1.0 + tree_mass as f64)
}

// Displacement ("density") variants: previously seen and unseen points are
// scored alike, and normalization makes the maximum score 1 instead of
// centering the average near 1.

pub fn score_seen_displacement(_depth: usize, mass: usize) -> f64 {
    1.0 / (1.0 + mass as f64)
}

pub fn score_unseen_displacement(_depth: usize, mass: usize) -> f64 {
    mass as f64
}

pub fn displacement_normalizer(score: f64, tree_mass: usize) -> f64 {
    score / (1.0 + tree_mass as f64)
}

pub fn identity(score: f64, _tree_mass: usize) -> f64 {
    score
}

/// The pluggable pieces of the scoring recursion, shared by every visitor.
///
/// Carrying these as plain function pointers keeps visitor construction
/// allocation-free and the hot path free of virtual dispatch.
pub struct VisitorInfo {
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
    pub distance: fn(&[f32], &[f32]) -> f64,
}

impl Default for VisitorInfo {
    fn default() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1distance,
        }
    }
}

impl VisitorInfo {
    pub fn displacement() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp: identity_damp,
            normalizer: displacement_normalizer,
            distance: l1distance,
        }
    }

    pub fn use_score(
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Self {
        VisitorInfo {
            ignore_mass,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1distance,
        }
    }

    pub fn use_distance(distance: fn(&[f32], &[f32]) -> f64) -> Self {
        VisitorInfo {
            distance,
            ..VisitorInfo::default()
        }
    }
}

fn identity_damp(_leaf_mass: usize, _tree_mass: usize) -> f64 {
    1.0
}

/// One accumulation pass over a single tree.
///
/// The walker calls `accept_leaf` once at the leaf the query descends to,
/// then `accept` on every ancestor from the leaf upward, and finally
/// `result`. A visitor that reports convergence stops receiving ancestors;
/// the walker also skips its own box bookkeeping from that point on.
pub trait Visitor<R> {
    fn accept_leaf(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()>;
    fn accept(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()>;
    fn result(&self, info: &VisitorInfo) -> Result<R>;
    fn is_converged(&self) -> bool;
    /// True when scoring must pretend the matched leaf is absent.
    fn use_shadow_box(&self) -> bool {
        false
    }
    /// True when the visitor reads the walker's bounding box.
    fn needs_box(&self) -> bool {
        false
    }
}

/// A visitor that can fork at nodes whose cut falls on a missing
/// coordinate; both children are walked and `combine_branches` reconciles
/// the two partial results.
pub trait MultiVisitor<R>: Visitor<R> {
    fn combine_branches(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView)
        -> Result<()>;
}
