//! Reducers for folding per-tree visitor outputs into ensemble answers.
//!
//! Reductions are always performed in tree index order, so parallel and
//! sequential execution produce bit-identical results; the converging
//! variant additionally lets a query stop polling trees once the remaining
//! trees provably cannot move the mean beyond the requested precision.

/// Streaming mean/deviation reducer with an early-stopping test.
pub trait ConvergingAccumulator {
    /// Folds in the statistic of the next tree, in index order.
    fn accept(&mut self, value: f64);
    fn witnessed(&self) -> usize;
    fn is_converged(&self) -> bool;
}

/// One-sided convergence: stops once the standard error of the running
/// mean drops below `precision` relative to the mean's magnitude (with a
/// floor of 1, so small scores near the decision boundary are not polled
/// forever). At least `min_values` trees are always consulted.
///
/// The test is one-sided in the sense that only the upward uncertainty of
/// the mean matters for anomaly decisions; a symmetric band with the same
/// width is used, which is conservative.
pub struct OneSidedConvergingAccumulator {
    precision: f64,
    min_values: usize,
    count: usize,
    sum: f64,
    sum_of_squares: f64,
}

impl OneSidedConvergingAccumulator {
    pub fn new(precision: f64, min_values: usize) -> Self {
        OneSidedConvergingAccumulator {
            precision,
            min_values,
            count: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

impl ConvergingAccumulator for OneSidedConvergingAccumulator {
    fn accept(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    fn witnessed(&self) -> usize {
        self.count
    }

    fn is_converged(&self) -> bool {
        if self.count < self.min_values {
            return false;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let variance = (self.sum_of_squares / n - mean * mean).max(0.0);
        let standard_error = (variance / n).sqrt();
        standard_error <= self.precision * mean.abs().max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honors_the_minimum_number_of_values() {
        let mut accumulator = OneSidedConvergingAccumulator::new(0.5, 5);
        for _ in 0..4 {
            accumulator.accept(1.0);
            assert!(!accumulator.is_converged());
        }
        accumulator.accept(1.0);
        assert!(accumulator.is_converged());
        assert_eq!(accumulator.witnessed(), 5);
    }

    #[test]
    fn identical_values_converge_immediately_after_minimum() {
        let mut accumulator = OneSidedConvergingAccumulator::new(0.1, 3);
        for _ in 0..3 {
            accumulator.accept(2.5);
        }
        assert!(accumulator.is_converged());
        assert!((accumulator.mean() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn high_variance_delays_convergence() {
        let mut accumulator = OneSidedConvergingAccumulator::new(0.01, 3);
        for i in 0..10 {
            accumulator.accept(if i % 2 == 0 { 0.0 } else { 10.0 });
        }
        assert!(!accumulator.is_converged());
        // feeding many more values shrinks the standard error
        for i in 10..12_000 {
            accumulator.accept(if i % 2 == 0 { 0.0 } else { 10.0 });
        }
        assert!(accumulator.is_converged());
    }
}
