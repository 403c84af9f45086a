use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;
use tracing::debug;

use crate::accumulator::{ConvergingAccumulator, OneSidedConvergingAccumulator};
use crate::config::ForestBuilder;
use crate::errors::{check_argument, check_state, Result};
use crate::output::{DiVector, InterpolationMeasure, Neighbor, RangeVector};
use crate::pointstore::PointStore;
use crate::samplertree::SamplerPlusTree;
use crate::visitor::attribution::AttributionVisitor;
use crate::visitor::impute::ImputeCandidate;
use crate::visitor::interpolation::InterpolationVisitor;
use crate::visitor::nearneighbor::{NearNeighborVisitor, NeighborCandidate};
use crate::visitor::score::ScoreVisitor;
use crate::visitor::{Visitor, VisitorInfo};

/// Precision target of the approximate query variants.
const APPROXIMATE_PRECISION: f64 = 0.1;
/// Minimum number of trees an approximate query always polls.
const APPROXIMATE_MINIMUM_TREES: usize = 5;

/// The ensemble coordinator: one shared point store plus a vector of
/// sampler-and-tree pairs.
///
/// A forest instance has a single logical owner; updates are totally
/// ordered in call order. Queries never mutate state. With parallel
/// execution enabled, per-tree work fans out over an owned thread pool and
/// is reduced in tree index order, so parallel and sequential runs of the
/// same seed and input trace produce identical results.
pub struct RandomCutForest {
    dimensions: usize,
    shingle_size: usize,
    sample_size: usize,
    number_of_trees: usize,
    output_after: usize,
    time_decay: f64,
    internal_shingling: bool,
    internal_rotation: bool,
    bounding_box_cache_fraction: f64,
    random_seed: u64,
    entries_seen: u64,
    total_updates: u64,
    next_sequence_index: i64,
    point_store: PointStore,
    members: Vec<SamplerPlusTree>,
    thread_pool: Option<rayon::ThreadPool>,
}

impl RandomCutForest {
    pub fn builder(dimensions: usize) -> ForestBuilder {
        ForestBuilder::new(dimensions)
    }

    pub(crate) fn from_builder(builder: ForestBuilder) -> Result<Self> {
        let random_seed = builder.random_seed.unwrap_or_else(rand::random);
        let sample_size = builder.sample_size;
        let number_of_trees = builder.number_of_trees;
        let output_after = builder.output_after.unwrap_or(sample_size / 4);
        let time_decay = builder
            .time_decay
            .unwrap_or(1.0 / (10.0 * sample_size as f64));

        let mut point_store_capacity = sample_size * number_of_trees + 1;
        if point_store_capacity < 2 * sample_size {
            point_store_capacity = 2 * sample_size;
        }
        let point_store = PointStore::new(
            builder.dimensions,
            builder.shingle_size,
            point_store_capacity,
            2 * sample_size,
            builder.internal_shingling,
            builder.internal_rotation,
        );

        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let mut members = Vec::with_capacity(number_of_trees);
        for _ in 0..number_of_trees {
            members.push(SamplerPlusTree::new(
                builder.dimensions,
                sample_size,
                time_decay,
                builder.initial_accept_fraction,
                builder.bounding_box_cache_fraction,
                builder.store_sequence_indexes,
                builder.center_of_mass,
                rng.next_u64(),
            )?);
        }

        let thread_pool = if builder.parallel_execution {
            let threads = builder.thread_pool_size.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get().saturating_sub(1))
                    .unwrap_or(1)
                    .max(1)
            });
            debug!(threads, "building forest thread pool");
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|_| crate::errors::ForestError::InvalidConfiguration {
                        msg: "could not build thread pool",
                    })?,
            )
        } else {
            None
        };

        Ok(RandomCutForest {
            dimensions: builder.dimensions,
            shingle_size: builder.shingle_size,
            sample_size,
            number_of_trees,
            output_after,
            time_decay,
            internal_shingling: builder.internal_shingling,
            internal_rotation: builder.internal_rotation,
            bounding_box_cache_fraction: builder.bounding_box_cache_fraction,
            random_seed,
            entries_seen: 0,
            total_updates: 0,
            next_sequence_index: 0,
            point_store,
            members,
            thread_pool,
        })
    }

    // ---- accessors ----

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn number_of_trees(&self) -> usize {
        self.number_of_trees
    }

    pub fn output_after(&self) -> usize {
        self.output_after
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling
    }

    pub fn is_parallel_execution_enabled(&self) -> bool {
        self.thread_pool.is_some()
    }

    pub fn bounding_box_cache_fraction(&self) -> f64 {
        self.bounding_box_cache_fraction
    }

    /// Points the samplers have been offered (after any shingle warm-up).
    pub fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    /// Update calls made, including shingle warm-up blocks.
    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    /// Scoring output is muted (quiet zeros) until enough points have been
    /// observed; the gate is the forest-level count of points offered to
    /// the samplers.
    pub fn is_output_ready(&self) -> bool {
        self.entries_seen >= self.output_after as u64
    }

    pub fn size_in_bytes(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.size_in_bytes())
            .sum::<usize>()
            + self.point_store.size_in_bytes()
            + std::mem::size_of::<RandomCutForest>()
    }

    // ---- updates ----

    /// Feeds one point (or one raw block under internal shingling) into
    /// every ensemble member.
    pub fn update(&mut self, point: &[f32]) -> Result<()> {
        let sequence_index = self.next_sequence_index;
        self.update_at(point, sequence_index)
    }

    /// As [`update`](Self::update) with an explicit sequence index;
    /// indexes must be non-negative and non-decreasing.
    pub fn update_at(&mut self, point: &[f32], sequence_index: i64) -> Result<()> {
        check_argument(sequence_index >= 0, "negative sequence index")?;
        check_argument(
            sequence_index >= self.next_sequence_index - 1,
            "sequence indexes must be non-decreasing",
        )?;
        self.total_updates += 1;
        let handle = match self.point_store.intern(point)? {
            Some(handle) => handle,
            None => {
                // shingle buffer still filling
                self.next_sequence_index = self.next_sequence_index.max(sequence_index + 1);
                return Ok(());
            }
        };

        let point_store = &self.point_store;
        let collected: Vec<Result<(Option<usize>, Option<usize>)>> = match &self.thread_pool {
            Some(pool) => pool.install(|| {
                self.members
                    .par_iter_mut()
                    .map(|m| m.update(handle, sequence_index, point_store))
                    .collect()
            }),
            None => self
                .members
                .iter_mut()
                .map(|m| m.update(handle, sequence_index, point_store))
                .collect(),
        };
        let pairs: Result<Vec<(Option<usize>, Option<usize>)>> = collected.into_iter().collect();
        let pairs = match pairs {
            Ok(pairs) => pairs,
            Err(e) => {
                // leave all reference counts as they were
                self.point_store.release(handle)?;
                return Err(e);
            }
        };
        self.point_store.adjust_counts(&pairs)?;
        self.point_store.release(handle)?;
        self.entries_seen += 1;
        self.next_sequence_index = self.next_sequence_index.max(sequence_index + 1);
        Ok(())
    }

    // ---- mutators ----

    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        check_argument(time_decay >= 0.0, "time decay must be non-negative")?;
        for member in self.members.iter_mut() {
            member.set_time_decay(time_decay)?;
        }
        self.time_decay = time_decay;
        Ok(())
    }

    pub fn set_bounding_box_cache_fraction(&mut self, fraction: f64) -> Result<()> {
        let point_store = &self.point_store;
        for member in self.members.iter_mut() {
            member.set_bounding_box_cache_fraction(fraction, point_store)?;
        }
        self.bounding_box_cache_fraction = fraction;
        Ok(())
    }

    // ---- query plumbing ----

    /// The full-dimension query point for an input that may be a raw block.
    fn shingled_query(&self, point: &[f32]) -> Result<Vec<f32>> {
        check_argument(
            point.len() == self.dimensions
                || point.len() * self.shingle_size == self.dimensions,
            "query length matches neither the dimensions nor a raw block",
        )?;
        self.point_store.shingled_point(point)
    }

    /// Runs one visitor over every tree and returns the per-tree results in
    /// tree index order.
    fn collect_over_trees<R, V, F>(
        &self,
        query: &[f32],
        info: &VisitorInfo,
        factory: F,
        default: R,
    ) -> Result<Vec<R>>
    where
        V: Visitor<R>,
        F: Fn(usize) -> V + Sync,
        R: Clone + Send + Sync,
    {
        match &self.thread_pool {
            Some(pool) => {
                let point_store = &self.point_store;
                let collected: Vec<Result<R>> = pool.install(|| {
                    self.members
                        .par_iter()
                        .map(|m| m.traverse(query, info, &factory, &default, point_store))
                        .collect()
                });
                collected.into_iter().collect()
            }
            None => self
                .members
                .iter()
                .map(|m| m.traverse(query, info, &factory, &default, &self.point_store))
                .collect(),
        }
    }

    // ---- scoring ----

    pub fn score(&self, point: &[f32]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::default())
    }

    /// Density-flavored displacement score; see
    /// [`VisitorInfo::displacement`].
    pub fn displacement_score(&self, point: &[f32]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::displacement())
    }

    /// Scoring with caller-supplied seen/unseen/damp/normalizer functions.
    pub fn generic_score(
        &self,
        point: &[f32],
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Result<f64> {
        self.score_traversal(
            point,
            &VisitorInfo::use_score(ignore_mass, score_seen, score_unseen, damp, normalizer),
        )
    }

    fn score_traversal(&self, point: &[f32], info: &VisitorInfo) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let query = self.shingled_query(point)?;
        let scores =
            self.collect_over_trees(&query, info, |mass| ScoreVisitor::new(mass, info), 0.0)?;
        Ok(scores.iter().sum::<f64>() / self.members.len() as f64)
    }

    /// Anomaly score with early stopping: trees are polled in index order
    /// until the running mean is provably within the default precision.
    pub fn approximate_score(&self, point: &[f32]) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let info = VisitorInfo::default();
        let query = self.shingled_query(point)?;
        let mut accumulator = OneSidedConvergingAccumulator::new(
            APPROXIMATE_PRECISION,
            APPROXIMATE_MINIMUM_TREES.min(self.members.len()),
        );
        for member in self.members.iter() {
            let score = member.traverse(
                &query,
                &info,
                |mass| ScoreVisitor::new(mass, &info),
                &0.0,
                &self.point_store,
            )?;
            accumulator.accept(score);
            if accumulator.is_converged() {
                break;
            }
        }
        Ok(accumulator.mean())
    }

    // ---- attribution ----

    pub fn attribution(&self, point: &[f32]) -> Result<DiVector> {
        self.attribution_traversal(point, &VisitorInfo::default())
    }

    pub fn generic_attribution(
        &self,
        point: &[f32],
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Result<DiVector> {
        self.attribution_traversal(
            point,
            &VisitorInfo::use_score(ignore_mass, score_seen, score_unseen, damp, normalizer),
        )
    }

    fn attribution_traversal(&self, point: &[f32], info: &VisitorInfo) -> Result<DiVector> {
        if !self.is_output_ready() {
            return Ok(DiVector::empty(self.dimensions));
        }
        let query = self.shingled_query(point)?;
        let dimensions = self.dimensions;
        let parts = self.collect_over_trees(
            &query,
            info,
            |mass| AttributionVisitor::new(mass, dimensions),
            DiVector::empty(dimensions),
        )?;
        let mut answer = DiVector::empty(dimensions);
        for part in parts.iter() {
            part.add_to(&mut answer);
        }
        answer.divide(self.members.len());
        Ok(answer)
    }

    /// Attribution with early stopping on the high/low total.
    pub fn approximate_attribution(&self, point: &[f32]) -> Result<DiVector> {
        if !self.is_output_ready() {
            return Ok(DiVector::empty(self.dimensions));
        }
        let info = VisitorInfo::default();
        let query = self.shingled_query(point)?;
        let mut answer = DiVector::empty(self.dimensions);
        let mut accumulator = OneSidedConvergingAccumulator::new(
            APPROXIMATE_PRECISION,
            APPROXIMATE_MINIMUM_TREES.min(self.members.len()),
        );
        for member in self.members.iter() {
            let dimensions = self.dimensions;
            let part = member.traverse(
                &query,
                &info,
                |mass| AttributionVisitor::new(mass, dimensions),
                &DiVector::empty(dimensions),
                &self.point_store,
            )?;
            part.add_to(&mut answer);
            accumulator.accept(part.total());
            if accumulator.is_converged() {
                break;
            }
        }
        answer.divide(accumulator.witnessed().max(1));
        Ok(answer)
    }

    // ---- density ----

    /// The directional interpolation measure behind density queries.
    /// Meaningful only once every sampler is full; a zero measure is
    /// returned before that.
    pub fn density_interpolant(&self, point: &[f32]) -> Result<InterpolationMeasure> {
        if !self.is_output_ready() || !self.members.iter().all(|m| m.is_sample_full()) {
            return Ok(InterpolationMeasure::empty(self.dimensions, 0.0));
        }
        let info = VisitorInfo::default();
        let query = self.shingled_query(point)?;
        let dimensions = self.dimensions;
        let parts = self.collect_over_trees(
            &query,
            &info,
            |mass| InterpolationVisitor::new(mass, dimensions),
            InterpolationMeasure::empty(dimensions, 0.0),
        )?;
        let mut answer = InterpolationMeasure::empty(dimensions, 0.0);
        for part in parts.iter() {
            part.add_to(&mut answer);
        }
        answer.divide(self.members.len());
        Ok(answer)
    }

    pub fn density(&self, point: &[f32]) -> Result<f64> {
        Ok(self.density_interpolant(point)?.density())
    }

    pub fn directional_density(&self, point: &[f32]) -> Result<DiVector> {
        Ok(self.density_interpolant(point)?.directional_density())
    }

    // ---- near neighbors ----

    /// Distinct sampled points within `threshold` Euclidean distance of the
    /// query, nearest first.
    pub fn near_neighbors(&self, point: &[f32], threshold: f64) -> Result<Vec<Neighbor>> {
        check_argument(threshold >= 0.0, "negative distance threshold")?;
        if !self.is_output_ready() {
            return Ok(Vec::new());
        }
        let info = VisitorInfo::default();
        let query = self.shingled_query(point)?;
        let candidates: Vec<NeighborCandidate> = self.collect_over_trees(
            &query,
            &info,
            |_| NearNeighborVisitor::new(threshold),
            None,
        )?;
        let mut seen = std::collections::HashSet::new();
        let mut answer = Vec::new();
        for candidate in candidates.into_iter().flatten() {
            let (handle, distance, sequence_indexes) = candidate;
            if seen.insert(handle) {
                answer.push(Neighbor {
                    point: self.point_store.copy(handle)?,
                    distance,
                    sequence_indexes,
                });
            }
        }
        answer.sort_by(|a, b| a.distance.partial_cmp(&b.distance).expect("finite distances"));
        Ok(answer)
    }

    // ---- imputation and extrapolation ----

    fn conditional_candidates(
        &self,
        query: &[f32],
        positions: &[usize],
        centrality: f64,
        info: &VisitorInfo,
    ) -> Result<Vec<ImputeCandidate>> {
        let mut mask = vec![false; self.dimensions];
        for &p in positions {
            check_argument(p < self.dimensions, "missing index out of range")?;
            mask[p] = true;
        }
        let collected: Vec<Result<ImputeCandidate>> = match &self.thread_pool {
            Some(pool) => {
                let point_store = &self.point_store;
                pool.install(|| {
                    self.members
                        .par_iter()
                        .map(|m| {
                            m.conditional_field(
                                query,
                                positions,
                                &mask,
                                centrality,
                                info,
                                point_store,
                            )
                        })
                        .collect()
                })
            }
            None => self
                .members
                .iter()
                .map(|m| {
                    m.conditional_field(
                        query,
                        positions,
                        &mask,
                        centrality,
                        info,
                        &self.point_store,
                    )
                })
                .collect(),
        };
        let candidates: Result<Vec<ImputeCandidate>> = collected.into_iter().collect();
        Ok(candidates?
            .into_iter()
            .filter(|c| c.1 != usize::MAX)
            .collect())
    }

    /// Per-position `(chosen, lower, upper)` from the ensemble candidates:
    /// the median for a single missing position, the candidate at the 25th
    /// percentile of anomaly score for several, and 10th/90th percentile
    /// bands either way.
    fn conditional_summary(
        &self,
        query: &[f32],
        positions: &[usize],
    ) -> Result<(Vec<f32>, Vec<f32>, Vec<f32>)> {
        let info = VisitorInfo::default();
        let candidates = self.conditional_candidates(query, positions, 1.0, &info)?;
        check_state(!candidates.is_empty(), "no conditional candidates")?;
        let mut chosen = vec![0.0f32; positions.len()];
        let mut lower = vec![0.0f32; positions.len()];
        let mut upper = vec![0.0f32; positions.len()];

        let mut per_position: Vec<Vec<f32>> = vec![Vec::with_capacity(candidates.len()); positions.len()];
        for candidate in candidates.iter() {
            let point = self.point_store.copy(candidate.1)?;
            for (j, &p) in positions.iter().enumerate() {
                per_position[j].push(point[p]);
            }
        }
        for (j, values) in per_position.iter_mut().enumerate() {
            values.sort_by(|a, b| a.partial_cmp(b).expect("finite stored values"));
            lower[j] = values[values.len() / 10];
            upper[j] = values[(9 * values.len()) / 10];
            chosen[j] = values[values.len() / 2];
        }
        if positions.len() > 1 {
            // several missing coordinates: report one coherent candidate at
            // the 25th percentile of anomaly score instead of marginals
            let mut by_score: Vec<&ImputeCandidate> = candidates.iter().collect();
            by_score.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("finite scores"));
            let selected = self.point_store.copy(by_score[by_score.len() / 4].1)?;
            for (j, &p) in positions.iter().enumerate() {
                chosen[j] = selected[p];
            }
        }
        Ok((chosen, lower, upper))
    }

    /// Completes a point with missing coordinates. The returned point is in
    /// full (shingled) dimension; observed coordinates pass through
    /// unchanged. `missing` is given in the same coordinate space as
    /// `point` (raw-block space under internal shingling).
    pub fn impute(&self, point: &[f32], missing: &[usize]) -> Result<Vec<f32>> {
        check_argument(!missing.is_empty(), "nothing to impute")?;
        let query = self.shingled_query(point)?;
        if !self.is_output_ready() {
            return Ok(vec![0.0; query.len()]);
        }
        let positions = if point.len() == self.dimensions {
            let mut positions = missing.to_vec();
            positions.sort_unstable();
            positions.dedup();
            positions
        } else {
            self.point_store.missing_indices(0, missing)?
        };
        let (chosen, _, _) = self.conditional_summary(&query, &positions)?;
        let mut answer = query;
        for (j, &p) in positions.iter().enumerate() {
            answer[p] = chosen[j];
        }
        Ok(answer)
    }

    /// Forecasts `horizon` blocks ahead by iterated imputation over the
    /// internally maintained shingle, sliding (or rotating) one block per
    /// step. Requires internal shingling and a shingle size above one.
    pub fn extrapolate(&self, horizon: usize) -> Result<RangeVector> {
        check_argument(
            self.internal_shingling,
            "extrapolation requires internal shingling",
        )?;
        check_argument(
            self.shingle_size > 1,
            "extrapolation requires shingle size above one",
        )?;
        check_argument(horizon > 0, "empty forecast horizon")?;
        let base = self.dimensions / self.shingle_size;
        if !self.is_output_ready() {
            return Ok(RangeVector::new(horizon * base));
        }

        let mut values = Vec::with_capacity(horizon * base);
        let mut lower = Vec::with_capacity(horizon * base);
        let mut upper = Vec::with_capacity(horizon * base);
        // one zero block shifted in: its slots are the first step's missing
        let mut query = self.point_store.shingled_point(&vec![0.0f32; base])?;
        for step in 0..horizon {
            let positions = if self.internal_rotation {
                self.point_store.next_indices(step)?
            } else {
                (self.dimensions - base..self.dimensions).collect()
            };
            let (chosen, lo, hi) = self.conditional_summary(&query, &positions)?;
            for j in 0..base {
                values.push(chosen[j]);
                lower.push(lo[j]);
                upper.push(hi[j]);
                query[positions[j]] = chosen[j];
            }
            if !self.internal_rotation {
                // slide one block; the vacated tail is next step's missing
                query.copy_within(base.., 0);
            }
        }
        Ok(RangeVector::create(&values, &upper, &lower))
    }
}
