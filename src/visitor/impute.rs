use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::errors::{check_state, Result};
use crate::nodeview::PathView;
use crate::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// One tree's conditional-field candidate: the anomaly score of the
/// completed point, the leaf handle it was completed from, and the distance
/// between the completed point and that leaf.
pub type ImputeCandidate = (f64, usize, f64);

struct BranchFrame {
    converged: bool,
    score: f64,
    tie_break: f32,
    handle: usize,
    distance: f64,
}

/// Branching visitor behind imputation and conditional fields.
///
/// The walker forks at every node whose cut falls on a missing coordinate;
/// each branch scores its leaf as a completion candidate and
/// [`combine_branches`](MultiVisitor::combine_branches) keeps the branch
/// whose centrality-adjusted score is lower (more typical). With
/// `centrality` 1 the choice is purely score-driven; with 0 it is a random
/// draw among branch leaves.
pub struct ImputeVisitor {
    tree_mass: usize,
    centrality: f64,
    missing: Vec<usize>,
    rng: ChaCha20Rng,
    stack: Vec<BranchFrame>,
}

impl ImputeVisitor {
    pub fn new(missing: &[usize], centrality: f64, tree_mass: usize, seed: u64) -> Self {
        ImputeVisitor {
            tree_mass,
            centrality,
            missing: missing.to_vec(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            stack: Vec::new(),
        }
    }

    /// The score used to pick between branches, interpolating between the
    /// anomaly score and a uniform draw.
    fn adjusted_score(&self, frame: &BranchFrame, info: &VisitorInfo) -> f64 {
        self.centrality * (info.normalizer)(frame.score, self.tree_mass)
            + (1.0 - self.centrality) * frame.tie_break as f64
    }
}

impl Visitor<ImputeCandidate> for ImputeVisitor {
    fn accept_leaf(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        let mass = view.mass();
        let mut completed = point.to_vec();
        for &i in self.missing.iter() {
            completed[i] = view.leaf_point()[i];
        }
        let mut converged = false;
        let score = if view.is_duplicate() {
            converged = true;
            (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass)
        } else {
            (info.score_unseen)(view.depth(), mass)
        };
        let distance = (info.distance)(&completed, view.leaf_point());
        self.stack.push(BranchFrame {
            converged,
            score,
            tie_break: self.rng.gen::<f32>(),
            handle: view.leaf_handle(),
            distance,
        });
        Ok(())
    }

    fn accept(&mut self, _point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        let frame = self.stack.last_mut().expect("empty traversal stack");
        if !frame.converged {
            let probability = view.probability_of_cut();
            if probability == 0.0 {
                frame.converged = true;
            } else {
                frame.score = (1.0 - probability) * frame.score
                    + probability * (info.score_unseen)(view.depth(), view.mass());
            }
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo) -> Result<ImputeCandidate> {
        check_state(self.stack.len() == 1, "unbalanced branch stack")?;
        let frame = self.stack.last().expect("checked above");
        let normalized = (info.normalizer)(frame.score, self.tree_mass);
        Ok((normalized, frame.handle, frame.distance))
    }

    fn is_converged(&self) -> bool {
        self.stack
            .last()
            .map(|frame| frame.converged)
            .unwrap_or(false)
    }
}

impl MultiVisitor<ImputeCandidate> for ImputeVisitor {
    fn combine_branches(
        &mut self,
        _point: &[f32],
        info: &VisitorInfo,
        _view: &PathView,
    ) -> Result<()> {
        let second = self.stack.pop().expect("fork lost its second branch");
        let first = self.stack.pop().expect("fork lost its first branch");
        let converged = first.converged || second.converged;
        let mut winner = if self.adjusted_score(&second, info) < self.adjusted_score(&first, info)
        {
            second
        } else {
            first
        };
        winner.converged = converged;
        self.stack.push(winner);
        Ok(())
    }
}
