use crate::errors::{check_argument, Result};

/// Axis-aligned min/max envelope over a set of points.
///
/// The cached `range_sum` is the sum of per-axis extents; it is the
/// normalizing constant in every probability-of-cut computation, so it is
/// kept current on each mutation.
#[derive(Clone)]
pub struct BoundingBox {
    range_sum: f64,
    min_values: Vec<f32>,
    max_values: Vec<f32>,
}

impl BoundingBox {
    pub fn new(first: &[f32], second: &[f32]) -> Result<Self> {
        check_argument(first.len() == second.len(), "mismatched lengths")?;
        let min_values: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x < y { x } else { y })
            .collect();
        let max_values: Vec<f32> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x > y { x } else { y })
            .collect();
        let range_sum = min_values
            .iter()
            .zip(&max_values)
            .map(|(&x, &y)| (y - x) as f64)
            .sum();
        Ok(BoundingBox {
            range_sum,
            min_values,
            max_values,
        })
    }

    pub fn from_point(point: &[f32]) -> Self {
        BoundingBox {
            range_sum: 0.0,
            min_values: point.to_vec(),
            max_values: point.to_vec(),
        }
    }

    /// Grows the box to contain `point`; returns true when the box was
    /// already large enough (the range sum did not move).
    pub fn contains_or_add_point(&mut self, point: &[f32]) -> bool {
        self.merge_arrays(point, point)
    }

    pub fn add_box(&mut self, other: &BoundingBox) {
        self.merge_arrays(&other.min_values, &other.max_values);
    }

    fn merge_arrays(&mut self, min_candidates: &[f32], max_candidates: &[f32]) -> bool {
        let old_sum = self.range_sum;
        for (x, &y) in self.min_values.iter_mut().zip(min_candidates) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.max_values.iter_mut().zip(max_candidates) {
            if y > *x {
                *x = y;
            }
        }
        self.range_sum = self
            .min_values
            .iter()
            .zip(&self.max_values)
            .map(|(&x, &y)| (y - x) as f64)
            .sum();
        old_sum == self.range_sum
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    pub fn min_values(&self) -> &[f32] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[f32] {
        &self.max_values
    }

    pub fn dimensions(&self) -> usize {
        self.min_values.len()
    }

    pub fn contains(&self, point: &[f32]) -> bool {
        self.min_values
            .iter()
            .zip(point)
            .zip(&self.max_values)
            .all(|((&lo, &v), &hi)| lo <= v && v <= hi)
    }

    /// Probability that a uniformly random cut of this box, grown to contain
    /// `point`, lands in the grown region and thereby separates `point` from
    /// the box contents. Zero when the point is inside.
    pub fn probability_of_cut(&self, point: &[f32]) -> f64 {
        let below: f32 = self
            .min_values
            .iter()
            .zip(point)
            .map(|(&lo, &v)| if lo - v > 0.0 { lo - v } else { 0.0 })
            .sum();
        let above: f32 = point
            .iter()
            .zip(&self.max_values)
            .map(|(&v, &hi)| if v - hi > 0.0 { v - hi } else { 0.0 })
            .sum();
        let extension = below + above;
        if extension == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            extension as f64 / (self.range_sum + extension as f64)
        }
    }

    /// Same as [`probability_of_cut`](Self::probability_of_cut) with the
    /// flagged coordinates excluded from the extension.
    pub fn probability_of_cut_with_missing(&self, point: &[f32], missing: &[bool]) -> f64 {
        let below: f32 = self
            .min_values
            .iter()
            .zip(point)
            .zip(missing)
            .map(|((&lo, &v), &skip)| {
                if !skip && lo - v > 0.0 {
                    lo - v
                } else {
                    0.0
                }
            })
            .sum();
        let above: f32 = point
            .iter()
            .zip(&self.max_values)
            .zip(missing)
            .map(|((&v, &hi), &skip)| {
                if !skip && v - hi > 0.0 {
                    v - hi
                } else {
                    0.0
                }
            })
            .sum();
        let extension = below + above;
        if extension == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            extension as f64 / (self.range_sum + extension as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_updates_range_sum() {
        let mut first = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert_eq!(first.range_sum(), 2.0);
        assert!(first.contains_or_add_point(&[0.5, 0.5]));
        assert!(!first.contains_or_add_point(&[2.0, 0.5]));
        assert_eq!(first.range_sum(), 3.0);
        let second = BoundingBox::new(&[-1.0, -1.0], &[0.0, 0.0]).unwrap();
        first.add_box(&second);
        assert_eq!(first.min_values(), &[-1.0, -1.0]);
        assert_eq!(first.max_values(), &[2.0, 1.0]);
    }

    #[test]
    fn probability_is_zero_inside_and_grows_outside() {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        assert_eq!(bbox.probability_of_cut(&[1.0, 1.0]), 0.0);
        let near = bbox.probability_of_cut(&[3.0, 1.0]);
        let far = bbox.probability_of_cut(&[5.0, 1.0]);
        assert!(near > 0.0 && far > near && far < 1.0);
    }

    #[test]
    fn degenerate_box_yields_certain_cut() {
        let bbox = BoundingBox::new(&[1.0], &[1.0]).unwrap();
        assert_eq!(bbox.probability_of_cut(&[2.0]), 1.0);
        assert_eq!(bbox.probability_of_cut(&[1.0]), 0.0);
    }

    #[test]
    fn missing_coordinates_are_excluded() {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let p = [5.0, 0.5];
        assert!(bbox.probability_of_cut(&p) > 0.0);
        assert_eq!(bbox.probability_of_cut_with_missing(&p, &[true, false]), 0.0);
    }

    #[test]
    fn signed_zeros_do_not_extend() {
        let mut bbox = BoundingBox::from_point(&[0.0f32]);
        assert!(bbox.contains_or_add_point(&[-0.0f32]));
        assert_eq!(bbox.range_sum(), 0.0);
    }
}
