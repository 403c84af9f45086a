use crate::errors::{check_config, Result};
use crate::forest::RandomCutForest;

pub const DEFAULT_SAMPLE_SIZE: usize = 256;
pub const DEFAULT_NUMBER_OF_TREES: usize = 50;
pub const DEFAULT_BOUNDING_BOX_CACHE_FRACTION: f64 = 1.0;
pub const DEFAULT_INITIAL_ACCEPT_FRACTION: f64 = 1.0;

/// Validated construction parameters for a [`RandomCutForest`].
///
/// Only the input dimension is required; everything else has a recognized
/// default. `build` performs all validation and returns
/// [`InvalidConfiguration`](crate::ForestError::InvalidConfiguration) on the
/// first violated constraint.
///
/// ```ignore
/// let forest = ForestBuilder::new(4)
///     .number_of_trees(100)
///     .time_decay(1e-4)
///     .random_seed(7)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct ForestBuilder {
    pub(crate) dimensions: usize,
    pub(crate) sample_size: usize,
    pub(crate) number_of_trees: usize,
    pub(crate) output_after: Option<usize>,
    pub(crate) time_decay: Option<f64>,
    pub(crate) store_sequence_indexes: bool,
    pub(crate) center_of_mass: bool,
    pub(crate) parallel_execution: bool,
    pub(crate) thread_pool_size: Option<usize>,
    pub(crate) bounding_box_cache_fraction: f64,
    pub(crate) shingle_size: usize,
    pub(crate) internal_shingling: bool,
    pub(crate) internal_rotation: bool,
    pub(crate) initial_accept_fraction: f64,
    pub(crate) random_seed: Option<u64>,
}

impl ForestBuilder {
    pub fn new(dimensions: usize) -> Self {
        ForestBuilder {
            dimensions,
            sample_size: DEFAULT_SAMPLE_SIZE,
            number_of_trees: DEFAULT_NUMBER_OF_TREES,
            output_after: None,
            time_decay: None,
            store_sequence_indexes: false,
            center_of_mass: false,
            parallel_execution: false,
            thread_pool_size: None,
            bounding_box_cache_fraction: DEFAULT_BOUNDING_BOX_CACHE_FRACTION,
            shingle_size: 1,
            internal_shingling: false,
            internal_rotation: false,
            initial_accept_fraction: DEFAULT_INITIAL_ACCEPT_FRACTION,
            random_seed: None,
        }
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = number_of_trees;
        self
    }

    /// Number of points to observe before scoring output unmutes; defaults
    /// to a quarter of the sample size.
    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    /// Exponential bias toward recent points; defaults to
    /// `1 / (10 * sample_size)`.
    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    pub fn store_sequence_indexes(mut self, enabled: bool) -> Self {
        self.store_sequence_indexes = enabled;
        self
    }

    pub fn center_of_mass(mut self, enabled: bool) -> Self {
        self.center_of_mass = enabled;
        self
    }

    pub fn parallel_execution(mut self, enabled: bool) -> Self {
        self.parallel_execution = enabled;
        self
    }

    /// Worker count for parallel fan-out; defaults to available cores minus
    /// one. Only meaningful (and only permitted) with parallel execution.
    pub fn thread_pool_size(mut self, threads: usize) -> Self {
        self.thread_pool_size = Some(threads);
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = shingle_size;
        self
    }

    /// The forest assembles shingles internally from raw input blocks.
    pub fn internal_shingling(mut self, enabled: bool) -> Self {
        self.internal_shingling = enabled;
        self
    }

    /// Cyclic shingles instead of sliding ones; requires internal
    /// shingling.
    pub fn internal_rotation(mut self, enabled: bool) -> Self {
        self.internal_rotation = enabled;
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.initial_accept_fraction = fraction;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<RandomCutForest> {
        check_config(self.dimensions > 0, "dimensions must be positive")?;
        check_config(self.sample_size > 1, "sample size must exceed one")?;
        check_config(self.number_of_trees > 0, "need at least one tree")?;
        check_config(
            self.shingle_size > 0 && self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_config(
            !self.internal_rotation || self.internal_shingling,
            "internal rotation requires internal shingling",
        )?;
        check_config(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "bounding box cache fraction must lie in [0,1]",
        )?;
        check_config(
            self.initial_accept_fraction > 0.0 && self.initial_accept_fraction <= 1.0,
            "initial accept fraction must lie in (0,1]",
        )?;
        if let Some(output_after) = self.output_after {
            check_config(
                output_after <= self.sample_size,
                "output_after cannot exceed sample size",
            )?;
        }
        if let Some(decay) = self.time_decay {
            check_config(decay >= 0.0, "time decay must be non-negative")?;
        }
        if let Some(threads) = self.thread_pool_size {
            check_config(
                self.parallel_execution == (threads > 0),
                "thread pool size must be positive iff parallel execution is enabled",
            )?;
        }
        RandomCutForest::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ForestError;

    #[test]
    fn defaults_build() {
        let forest = ForestBuilder::new(2).random_seed(1).build().unwrap();
        assert_eq!(forest.dimensions(), 2);
        assert_eq!(forest.sample_size(), DEFAULT_SAMPLE_SIZE);
        assert_eq!(forest.number_of_trees(), DEFAULT_NUMBER_OF_TREES);
        assert_eq!(forest.output_after(), DEFAULT_SAMPLE_SIZE / 4);
        assert!((forest.time_decay() - 1.0 / (10.0 * 256.0)).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(matches!(
            ForestBuilder::new(0).build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(3).shingle_size(2).build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).internal_rotation(true).build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2)
                .sample_size(16)
                .output_after(17)
                .build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).thread_pool_size(2).build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            ForestBuilder::new(2).initial_accept_fraction(0.0).build(),
            Err(ForestError::InvalidConfiguration { .. })
        ));
    }
}
