//! Return types shared by the query surface: directional vectors, the
//! interpolation measure behind density queries, forecast ranges and
//! near-neighbor records.

use crate::boundingbox::BoundingBox;

/// A directional decomposition of a scalar quantity: one `high` and one
/// `low` component per input dimension, recording whether the quantity is
/// attributed to the coordinate being unusually large or unusually small.
///
/// The sum of all components of an attribution equals the scalar anomaly
/// score up to floating-point summation order.
#[derive(Clone, Debug)]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            high: vec![0.0; dimensions],
            low: vec![0.0; dimensions],
        }
    }

    pub fn new(high: &[f64], low: &[f64]) -> Self {
        assert!(high.len() == low.len(), "mismatched lengths");
        DiVector {
            high: high.to_vec(),
            low: low.to_vec(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    /// Overwrites this vector with the directional probability that a random
    /// cut of `bounding_box`, grown to contain `point`, separates the point.
    /// The total of the result equals the scalar probability of cut.
    pub fn assign_probability_of_cut(&mut self, bounding_box: &BoundingBox, point: &[f32]) {
        let below: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .map(|((slot, &lo), &v)| {
                *slot = if lo - v > 0.0 { (lo - v) as f64 } else { 0.0 };
                *slot
            })
            .sum();
        let above: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .map(|((slot, &v), &hi)| {
                *slot = if v - hi > 0.0 { (v - hi) as f64 } else { 0.0 };
                *slot
            })
            .sum();
        let extension = below + above;
        if extension != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + extension));
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    pub fn add_scaled(&mut self, other: &DiVector, factor: f64) {
        for (x, &y) in self.high.iter_mut().zip(&other.high) {
            *x += y * factor;
        }
        for (x, &y) in self.low.iter_mut().zip(&other.low) {
            *x += y * factor;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
    }

    /// Rescales so the total equals `value`; a zero vector is spread evenly.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let per_slot = value / (2.0 * self.high.len() as f64);
            for x in self.high.iter_mut() {
                *x = per_slot;
            }
            for x in self.low.iter_mut() {
                *x = per_slot;
            }
        } else {
            self.scale(value / current);
        }
    }

    pub fn high_low_sum(&self, dimension: usize) -> f64 {
        self.high[dimension] + self.low[dimension]
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }
}

/// The three directional accumulants behind density and interpolation
/// queries: a count-like measure, a probability mass, and a distance, each
/// split by axis and direction.
#[derive(Clone, Debug)]
pub struct InterpolationMeasure {
    pub measure: DiVector,
    pub distance: DiVector,
    pub probability_mass: DiVector,
    pub sample_size: f32,
}

impl InterpolationMeasure {
    pub fn empty(dimensions: usize, sample_size: f32) -> Self {
        InterpolationMeasure {
            measure: DiVector::empty(dimensions),
            distance: DiVector::empty(dimensions),
            probability_mass: DiVector::empty(dimensions),
            sample_size,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.measure.dimensions()
    }

    pub fn add_to(&self, other: &mut InterpolationMeasure) {
        self.measure.add_to(&mut other.measure);
        self.distance.add_to(&mut other.distance);
        self.probability_mass.add_to(&mut other.probability_mass);
        other.sample_size += self.sample_size;
    }

    pub fn scale(&mut self, factor: f64) {
        self.measure.scale(factor);
        self.distance.scale(factor);
        self.probability_mass.scale(factor);
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
        self.sample_size = (self.sample_size as f64 / count as f64) as f32;
    }

    /// Folds one tree node into the running measure. Returns the scalar
    /// probability that a random cut of `bounding_box` grown by `point`
    /// separates the point; the prior accumulants survive with weight
    /// `1 - probability` and the directional shares of the extension are
    /// credited `weight`, the mass and the extension distances.
    pub fn update(&mut self, point: &[f32], bounding_box: &BoundingBox, weight: f64) -> f64 {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let below: f32 = min_values
            .iter()
            .zip(point)
            .map(|(&lo, &v)| if lo - v > 0.0 { lo - v } else { 0.0 })
            .sum();
        let above: f32 = point
            .iter()
            .zip(max_values)
            .map(|(&v, &hi)| if v - hi > 0.0 { v - hi } else { 0.0 })
            .sum();
        let extension = (below + above) as f64;
        let grown_range = extension + bounding_box.range_sum();
        let probability = if grown_range == 0.0 {
            0.0
        } else {
            extension / grown_range
        };
        if probability > 0.0 {
            self.scale(1.0 - probability);
            for i in 0..point.len() {
                if point[i] > max_values[i] {
                    let share = (point[i] - max_values[i]) as f64 / grown_range;
                    self.distance.high[i] += share * (point[i] - min_values[i]) as f64;
                    self.probability_mass.high[i] += share;
                    self.measure.high[i] += weight * share;
                } else if point[i] < min_values[i] {
                    let share = (min_values[i] - point[i]) as f64 / grown_range;
                    self.distance.low[i] += share * (max_values[i] - point[i]) as f64;
                    self.probability_mass.low[i] += share;
                    self.measure.low[i] += weight * share;
                }
            }
        }
        probability
    }

    /// Density-like directional measure: the accumulated measure divided by
    /// an effective volume factor derived from the per-axis mean distances.
    pub fn directional_measure(&self, threshold: f64, manifold_dimension: f64) -> DiVector {
        assert!(
            self.sample_size >= 0.0 && self.measure.total() >= 0.0,
            "negative samples or measure"
        );
        if self.sample_size == 0.0 || self.measure.total() == 0.0 {
            return DiVector::empty(self.dimensions());
        }
        let mut volume_factor = 0.0;
        for i in 0..self.dimensions() {
            let mass = self.probability_mass.high_low_sum(i);
            let mut t = if mass > 0.0 {
                self.distance.high_low_sum(i) / mass
            } else {
                0.0
            };
            if t > 0.0 {
                t = f64::exp(f64::ln(t) * manifold_dimension) * mass;
            }
            volume_factor += t;
        }
        let mut answer = self.measure.clone();
        answer.scale(1.0 / (threshold + volume_factor));
        answer
    }

    pub fn directional_density(&self) -> DiVector {
        self.directional_measure(1e-3, self.dimensions() as f64)
    }

    pub fn density(&self) -> f64 {
        self.directional_density().total()
    }
}

/// The answer shape of ensemble density queries.
pub type DensityOutput = InterpolationMeasure;

/// A forecast quantity with pointwise upper and lower bounds.
#[derive(Clone, Debug)]
pub struct RangeVector {
    pub values: Vec<f32>,
    pub upper: Vec<f32>,
    pub lower: Vec<f32>,
}

impl RangeVector {
    pub fn new(dimensions: usize) -> Self {
        RangeVector {
            values: vec![0.0; dimensions],
            upper: vec![0.0; dimensions],
            lower: vec![0.0; dimensions],
        }
    }

    pub fn create(values: &[f32], upper: &[f32], lower: &[f32]) -> Self {
        assert!(
            values.len() == upper.len() && values.len() == lower.len(),
            "mismatched lengths"
        );
        RangeVector {
            values: values.to_vec(),
            upper: upper.to_vec(),
            lower: lower.to_vec(),
        }
    }
}

/// A point found within the query threshold of a near-neighbor probe.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub point: Vec<f32>,
    pub distance: f64,
    /// Sequence indexes of the insertions represented by the leaf, present
    /// when the forest stores them.
    pub sequence_indexes: Option<Vec<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directional_probability_matches_scalar() {
        let bbox = BoundingBox::new(&[0.0, 0.0], &[2.0, 2.0]).unwrap();
        let point = [3.0, -1.0];
        let mut divector = DiVector::empty(2);
        divector.assign_probability_of_cut(&bbox, &point);
        let scalar = bbox.probability_of_cut(&point);
        assert!((divector.total() - scalar).abs() < 1e-12);
        assert!(divector.high[0] > 0.0 && divector.low[1] > 0.0);
        assert_eq!(divector.low[0], 0.0);
        assert_eq!(divector.high[1], 0.0);
    }

    #[test]
    fn normalize_spreads_zero_vector() {
        let mut divector = DiVector::empty(2);
        divector.normalize(1.0);
        assert!((divector.total() - 1.0).abs() < 1e-12);
        assert_eq!(divector.high[0], 0.25);
    }

    #[test]
    fn interpolation_update_is_a_probability() {
        let bbox = BoundingBox::new(&[0.0], &[1.0]).unwrap();
        let mut measure = InterpolationMeasure::empty(1, 10.0);
        let p = measure.update(&[2.0], &bbox, 0.5);
        assert!(p > 0.0 && p < 1.0);
        assert!(measure.probability_mass.high[0] > 0.0);
        assert_eq!(measure.probability_mass.low[0], 0.0);
        assert_eq!(measure.update(&[0.5], &bbox, 0.5), 0.0);
    }
}
