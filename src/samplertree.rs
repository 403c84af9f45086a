use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::Result;
use crate::pointstore::PointStore;
use crate::sampler::{DecaySampler, SamplerDecision};
use crate::tree::RandomCutTree;
use crate::visitor::impute::{ImputeCandidate, ImputeVisitor};
use crate::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// One ensemble member: a time-decayed reservoir paired with the tree that
/// mirrors its contents.
///
/// The pair owns all randomness used on its behalf; the sampler and tree
/// generators are seeded independently from the pair's seed at
/// construction, and a third fixed seed drives query-time tie-breaking so
/// that read-only queries stay deterministic.
pub struct SamplerPlusTree {
    sampler: DecaySampler,
    tree: RandomCutTree,
    query_seed: u64,
}

impl SamplerPlusTree {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dimensions: usize,
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
        random_seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        let query_seed = rng.next_u64();
        Ok(SamplerPlusTree {
            sampler: DecaySampler::new(
                capacity,
                time_decay,
                initial_accept_fraction,
                sampler_seed,
            )?,
            tree: RandomCutTree::new(
                dimensions,
                capacity,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                center_of_mass,
                tree_seed,
            )?,
            query_seed,
        })
    }

    /// Offers `handle` at `sequence_index` to the sampler; on acceptance the
    /// evicted point (if any) leaves the tree before the new one enters.
    /// Returns the `(added, evicted)` handles whose reference counts the
    /// coordinator must adjust.
    pub fn update(
        &mut self,
        handle: usize,
        sequence_index: i64,
        point_store: &PointStore,
    ) -> Result<(Option<usize>, Option<usize>)> {
        match self.sampler.accept(sequence_index) {
            Ok(SamplerDecision::Accepted { evicted, .. }) => {
                let deleted = match evicted {
                    Some(entry) => {
                        match self
                            .tree
                            .delete(entry.handle, entry.sequence_index, point_store)
                        {
                            Ok(removed) => Some(removed),
                            Err(e) => {
                                self.sampler.cancel();
                                return Err(e);
                            }
                        }
                    }
                    None => None,
                };
                // the tree may resolve the point to an existing equal leaf
                let added = match self.tree.add(handle, sequence_index, point_store) {
                    Ok(added) => added,
                    Err(e) => {
                        self.sampler.cancel();
                        return Err(e);
                    }
                };
                self.sampler.commit(added)?;
                Ok((Some(added), deleted))
            }
            Ok(SamplerDecision::Rejected) => Ok((None, None)),
            Err(e) => Err(e),
        }
    }

    pub fn traverse<R, V, F>(
        &self,
        point: &[f32],
        info: &VisitorInfo,
        make_visitor: F,
        default: &R,
        point_store: &PointStore,
    ) -> Result<R>
    where
        V: Visitor<R>,
        F: FnOnce(usize) -> V,
        R: Clone,
    {
        self.tree
            .traverse(point, info, make_visitor, default, point_store)
    }

    pub fn traverse_multi<R, V, F>(
        &self,
        point: &[f32],
        missing: &[bool],
        info: &VisitorInfo,
        make_visitor: F,
        default: &R,
        point_store: &PointStore,
    ) -> Result<R>
    where
        V: MultiVisitor<R>,
        F: FnOnce(usize) -> V,
        R: Clone,
    {
        self.tree
            .traverse_multi(point, missing, info, make_visitor, default, point_store)
    }

    /// This pair's conditional-field candidate for a query with missing
    /// coordinates.
    pub fn conditional_field(
        &self,
        point: &[f32],
        missing_positions: &[usize],
        missing_mask: &[bool],
        centrality: f64,
        info: &VisitorInfo,
        point_store: &PointStore,
    ) -> Result<ImputeCandidate> {
        let seed = self.query_seed;
        self.traverse_multi(
            point,
            missing_mask,
            info,
            |tree_mass| ImputeVisitor::new(missing_positions, centrality, tree_mass, seed),
            &(0.0, usize::MAX, 0.0),
            point_store,
        )
    }

    pub fn sample_size(&self) -> usize {
        self.sampler.size()
    }

    pub fn is_sample_full(&self) -> bool {
        self.sampler.is_full()
    }

    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        self.sampler.set_time_decay(time_decay)
    }

    pub fn set_bounding_box_cache_fraction(
        &mut self,
        fraction: f64,
        point_store: &PointStore,
    ) -> Result<()> {
        self.tree
            .set_bounding_box_cache_fraction(fraction, point_store)
    }

    pub fn tree_center_of_mass(&self) -> Option<Vec<f32>> {
        self.tree.center_of_mass()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.tree.size_in_bytes()
            + self.sampler.size_in_bytes()
            + std::mem::size_of::<SamplerPlusTree>()
    }
}
