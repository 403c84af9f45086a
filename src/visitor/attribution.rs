use num::abs;

use crate::errors::{ForestError, Result};
use crate::nodeview::PathView;
use crate::output::DiVector;
use crate::visitor::{Visitor, VisitorInfo};

/// Directional attribution: the scalar score recursion carried out in
/// `DiVector` space, so that each coordinate direction receives the share
/// of the score its box extension is responsible for. The high/low total of
/// the result equals the scalar score up to summation order.
pub struct AttributionVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    shadow_box: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        AttributionVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            shadow_box: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }
}

impl Visitor<DiVector> for AttributionVisitor {
    fn accept_leaf(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        let mass = view.mass();
        if mass > info.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass);
                self.hit_duplicate = true;
                self.shadow_box = true;
            } else {
                self.score = (info.score_unseen)(view.depth(), mass);
                let leaf_box = view.bounding_box().ok_or(ForestError::PreconditionViolation {
                    msg: "attribution requires a box-maintaining walker",
                })?;
                self.probability.assign_probability_of_cut(leaf_box, point);
                debug_assert!(abs(self.probability.total() - 1.0) < 1e-6);
                self.attribution.add_scaled(&self.probability, self.score);
            }
        } else {
            self.score = (info.score_unseen)(view.depth(), mass);
            self.shadow_box = true;
        }
        Ok(())
    }

    fn accept(&mut self, point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        if self.converged {
            return Ok(());
        }
        let bounding_box = if self.shadow_box {
            view.shadow_box()
        } else {
            view.bounding_box()
        };
        let bounding_box = bounding_box.ok_or(ForestError::PreconditionViolation {
            msg: "attribution requires a box-maintaining walker",
        })?;
        self.probability
            .assign_probability_of_cut(bounding_box, point);
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
        } else {
            let unseen = (info.score_unseen)(view.depth(), view.mass());
            if !self.hit_duplicate {
                self.score = (1.0 - probability) * self.score + probability * unseen;
            }
            self.attribution.scale(1.0 - probability);
            self.attribution.add_scaled(&self.probability, unseen);
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo) -> Result<DiVector> {
        let normalized = (info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(normalized);
        Ok(answer)
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.shadow_box
    }

    fn needs_box(&self) -> bool {
        true
    }
}
