use crate::boundingbox::BoundingBox;

/// An axis-aligned split of space. Points with `point[dimension] <= value`
/// belong to the left subtree.
pub struct Cut {
    pub dimension: usize,
    pub value: f32,
}

impl Cut {
    pub fn new(dimension: usize, value: f32) -> Self {
        Cut { dimension, value }
    }

    pub fn placeholder() -> Self {
        Cut {
            dimension: usize::MAX,
            value: 0.0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.dimension == usize::MAX
    }

    /// Samples a random cut of `bounding_box` grown to contain `point`,
    /// using `factor` in [0,1) as the uniform draw. The cut dimension is
    /// chosen proportionally to the per-axis extent of the grown box and the
    /// cut value uniformly within that axis. Returns the cut together with
    /// whether it separates `point` from the original box.
    ///
    /// When the point does not extend the box at all there is nothing to
    /// separate and a placeholder cut is returned.
    pub fn random_cut_and_separation(
        bounding_box: &BoundingBox,
        factor: f64,
        point: &[f32],
    ) -> (Cut, bool) {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let mut span: f64 = min_values
            .iter()
            .zip(max_values)
            .zip(point)
            .map(|((&lo, &hi), &v)| {
                if v < lo {
                    (lo - v) as f64
                } else if hi < v {
                    (v - hi) as f64
                } else {
                    0.0
                }
            })
            .sum();
        if span == 0.0 {
            return (Cut::placeholder(), false);
        }
        span += bounding_box.range_sum();
        let mut remainder = span * factor;

        let mut dimension: usize = 0;
        let mut cut_value: f32 = f32::MAX;
        while dimension < point.len() {
            let lo = if point[dimension] < min_values[dimension] {
                point[dimension]
            } else {
                min_values[dimension]
            };
            let hi = if point[dimension] > max_values[dimension] {
                point[dimension]
            } else {
                max_values[dimension]
            };
            let extent = hi - lo;
            let last = dimension == point.len() - 1;
            if extent > remainder as f32 || (extent == remainder as f32 && last) {
                cut_value = lo + remainder as f32;
                // f32 rounding can push the value onto either face of the
                // grown box; snap to the interior endpoint in that case
                if cut_value <= lo || cut_value >= hi {
                    cut_value = lo;
                }
                break;
            }
            remainder -= extent as f64;
            dimension += 1;
        }

        let lo = min_values[dimension];
        let hi = max_values[dimension];
        let separates = (point[dimension] <= cut_value && cut_value < lo)
            || (hi <= cut_value && cut_value < point[dimension]);
        (Cut::new(dimension, cut_value), separates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_point_yields_placeholder() {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        let (cut, separates) = Cut::random_cut_and_separation(&bbox, 0.3, &[1.0, 1.0]);
        assert!(cut.is_placeholder());
        assert!(!separates);
    }

    #[test]
    fn cut_lands_on_extending_axis_when_draw_falls_there() {
        // extents: axis 0 grows by 3 (span 5), axis 1 unchanged (span 2)
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        let point = [5.0, 1.0];
        // factor small enough to land inside axis 0
        let (cut, separates) = Cut::random_cut_and_separation(&bbox, 0.5, &point);
        assert_eq!(cut.dimension, 0);
        assert!(cut.value > 0.0 && cut.value < 5.0);
        assert_eq!(separates, cut.value >= 2.0);
    }

    #[test]
    fn separation_below_the_box() {
        let bbox = BoundingBox::new(&[2.0], &[4.0]).unwrap();
        // grown box is [0,4], extent 4; factor 0.25 cuts at 1.0, separating
        let (cut, separates) = Cut::random_cut_and_separation(&bbox, 0.25, &[0.0]);
        assert_eq!(cut.dimension, 0);
        assert!(separates);
        assert!(cut.value < 2.0);
    }
}
