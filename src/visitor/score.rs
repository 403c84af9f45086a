use crate::errors::Result;
use crate::nodeview::PathView;
use crate::visitor::{Visitor, VisitorInfo};

/// Scalar anomaly score for one tree.
///
/// At the leaf the score starts from the seen/unseen split; on the way up
/// it is folded with the probability that a random cut at each ancestor
/// would have separated the query:
///
/// ```text
/// score <- p_cut * score_unseen(depth, mass) + (1 - p_cut) * score
/// ```
///
/// Once an ancestor's box contains the query, `p_cut` is zero for the rest
/// of the ascent and the visitor converges.
pub struct ScoreVisitor {
    tree_mass: usize,
    ignore_mass: usize,
    score: f64,
    converged: bool,
    shadow_box: bool,
}

impl ScoreVisitor {
    pub fn new(tree_mass: usize, info: &VisitorInfo) -> Self {
        ScoreVisitor {
            tree_mass,
            ignore_mass: info.ignore_mass,
            score: 0.0,
            converged: false,
            shadow_box: false,
        }
    }
}

impl Visitor<f64> for ScoreVisitor {
    fn accept_leaf(&mut self, _point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        let mass = view.mass();
        if mass > self.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (info.damp)(mass, self.tree_mass) * (info.score_seen)(view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (info.score_unseen)(view.depth(), mass);
            }
        } else {
            self.score = (info.score_unseen)(view.depth(), mass);
            self.shadow_box = true;
        }
        Ok(())
    }

    fn accept(&mut self, _point: &[f32], info: &VisitorInfo, view: &PathView) -> Result<()> {
        if !self.converged {
            let probability = if self.shadow_box {
                view.shadow_probability_of_cut()
            } else {
                view.probability_of_cut()
            };
            if probability == 0.0 {
                self.converged = true;
            } else {
                self.score = (1.0 - probability) * self.score
                    + probability * (info.score_unseen)(view.depth(), view.mass());
            }
        }
        Ok(())
    }

    fn result(&self, info: &VisitorInfo) -> Result<f64> {
        Ok((info.normalizer)(self.score, self.tree_mass))
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.shadow_box
    }
}
