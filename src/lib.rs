//! Streaming anomaly detection with random cut forests.
//!
//! A random cut forest is an ensemble of randomized binary space-partitioning
//! trees maintained over a time-decayed reservoir sample of a point stream.
//! For every incoming point the forest can answer how anomalous the point is
//! relative to the recent distribution, which coordinate directions account
//! for the score, and what plausible values missing coordinates would have
//! had, which enables one-step imputation and short-horizon forecasting.
//!
//! ```ignore
//! use grove::ForestBuilder;
//!
//! let mut forest = ForestBuilder::new(3)
//!     .number_of_trees(50)
//!     .sample_size(256)
//!     .random_seed(42)
//!     .build()?;
//!
//! for point in stream {
//!     let score = forest.score(&point)?;
//!     forest.update(&point)?;
//! }
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust random
//! cut forest based anomaly detection on streams."* International Conference
//! on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod accumulator;
pub mod boundingbox;
pub mod config;
pub mod cut;
pub mod errors;
pub mod forest;
pub mod indexmanager;
pub mod nodestore;
pub mod nodeview;
pub mod output;
pub mod pointstore;
pub mod sampler;
pub mod samplertree;
pub mod synthetic;
pub mod tree;
pub mod visitor;

pub use config::ForestBuilder;
pub use errors::{ForestError, Result};
pub use forest::RandomCutForest;
pub use output::{DensityOutput, DiVector, InterpolationMeasure, Neighbor, RangeVector};

/// L1 (taxicab) distance between two equal-length vectors.
pub fn l1distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| ((x - y) as f64).abs())
        .sum()
}

/// Euclidean distance between two equal-length vectors.
pub fn l2distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let t = (x - y) as f64;
            t * t
        })
        .sum::<f64>()
        .sqrt()
}

/// L-infinity distance between two equal-length vectors.
pub fn linfinity_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| ((x - y) as f64).abs())
        .fold(0.0, f64::max)
}
