use crate::errors::Result;
use crate::l2distance;
use crate::nodeview::PathView;
use crate::visitor::{Visitor, VisitorInfo};

/// The raw per-tree answer of a near-neighbor probe: the leaf handle, its
/// Euclidean distance from the query, and the leaf's stored sequence
/// indexes when the forest keeps them.
pub type NeighborCandidate = Option<(usize, f64, Option<Vec<i64>>)>;

/// Walks the query to its leaf and emits that leaf iff it lies within the
/// configured Euclidean threshold; the ancestors contribute nothing.
pub struct NearNeighborVisitor {
    threshold: f64,
    answer: NeighborCandidate,
}

impl NearNeighborVisitor {
    pub fn new(threshold: f64) -> Self {
        NearNeighborVisitor {
            threshold,
            answer: None,
        }
    }
}

impl Visitor<NeighborCandidate> for NearNeighborVisitor {
    fn accept_leaf(&mut self, point: &[f32], _info: &VisitorInfo, view: &PathView) -> Result<()> {
        let distance = l2distance(point, view.leaf_point());
        if distance <= self.threshold {
            self.answer = Some((
                view.leaf_handle(),
                distance,
                view.leaf_sequences().map(|s| s.to_vec()),
            ));
        }
        Ok(())
    }

    fn accept(&mut self, _point: &[f32], _info: &VisitorInfo, _view: &PathView) -> Result<()> {
        Ok(())
    }

    fn result(&self, _info: &VisitorInfo) -> Result<NeighborCandidate> {
        Ok(self.answer.clone())
    }

    // the leaf decides everything; skip the ascent
    fn is_converged(&self) -> bool {
        true
    }
}
