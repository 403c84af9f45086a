use crate::errors::{ForestError, Result};
use crate::nodeview::PathView;
use crate::output::InterpolationMeasure;
use crate::visitor::{Visitor, VisitorInfo};

/// Accumulates the directional interpolation measure used by density
/// queries: per axis and direction, a weight-like measure, a probability
/// mass and a distance, all discounted by the probability that the walk
/// would have been cut away below.
pub struct InterpolationVisitor {
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    shadow_box: bool,
    measure: InterpolationMeasure,
}

impl InterpolationVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        InterpolationVisitor {
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            shadow_box: false,
            measure: InterpolationMeasure::empty(dimensions, tree_mass as f32),
        }
    }
}

impl Visitor<InterpolationMeasure> for InterpolationVisitor {
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
                    msg: "interpolation requires a box-maintaining walker",
                })?;
                self.measure.update(point, leaf_box, self.score);
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
            msg: "interpolation requires a box-maintaining walker",
        })?;
        let unseen = (info.score_unseen)(view.depth(), view.mass());
        let probability = self.measure.update(point, bounding_box, unseen);
        if probability == 0.0 {
            self.converged = true;
        } else if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * unseen;
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo) -> Result<InterpolationMeasure> {
        let normalized = (info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.measure.clone();
        answer.measure.normalize(normalized);
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
