use std::collections::HashMap;

use tracing::debug;

use crate::boundingbox::BoundingBox;
use crate::cut::Cut;
use crate::errors::{check_config, check_state, Result};
use crate::indexmanager::IndexManager;
use crate::pointstore::PointStore;

/// Below this cache fraction, traversals maintain their own box along the
/// walked path instead of asking the store per node.
const PATH_BOX_THRESHOLD: f64 = 0.5;

/// Flat-array storage for one tree's nodes.
///
/// `capacity` is the maximum leaf count (the paired sampler's size). Node
/// ids are
/// encoded in one `usize` space: internal nodes occupy slots
/// `0..capacity-1`, the value `capacity - 1` is the null node, and a leaf
/// for point handle `h` is `h + capacity`. A proper binary tree with
/// `capacity` leaves has at most `capacity - 1` internal nodes, so the slot
/// range is exact.
///
/// Bounding boxes are cached for internal slots below
/// `cache_fraction * capacity`; other nodes recompute from their children on
/// demand.
pub struct NodeStore {
    capacity: usize,
    dimensions: usize,
    cache_fraction: f64,
    cache_limit: usize,
    left: Vec<usize>,
    right: Vec<usize>,
    cut_dimension: Vec<u32>,
    cut_value: Vec<f32>,
    mass: Vec<u32>,
    box_data: Vec<f32>,
    range_sum: Vec<f64>,
    // duplicate insertions at a leaf, keyed by point handle; absent means 1
    extra_leaf_mass: HashMap<usize, u32>,
    leaf_sequences: Option<HashMap<usize, Vec<i64>>>,
    point_sum: Option<Vec<f32>>,
    slot_manager: IndexManager,
}

impl NodeStore {
    pub fn new(
        capacity: usize,
        dimensions: usize,
        cache_fraction: f64,
        store_sequence_indexes: bool,
        center_of_mass: bool,
    ) -> Result<Self> {
        check_config(capacity > 1, "tree capacity must exceed one")?;
        check_config(
            (0.0..=1.0).contains(&cache_fraction),
            "cache fraction must lie in [0,1]",
        )?;
        let cache_limit = (cache_fraction * capacity as f64) as usize;
        Ok(NodeStore {
            capacity,
            dimensions,
            cache_fraction,
            cache_limit,
            left: vec![capacity - 1; capacity - 1],
            right: vec![capacity - 1; capacity - 1],
            cut_dimension: vec![u32::MAX; capacity - 1],
            cut_value: vec![0.0; capacity - 1],
            mass: vec![0; capacity - 1],
            box_data: vec![0.0; 2 * dimensions * cache_limit],
            range_sum: vec![0.0; cache_limit],
            extra_leaf_mass: HashMap::new(),
            leaf_sequences: store_sequence_indexes.then(HashMap::new),
            point_sum: center_of_mass.then(|| vec![0.0; dimensions * (capacity - 1)]),
            slot_manager: IndexManager::new(capacity - 1),
        })
    }

    pub fn null_node(&self) -> usize {
        self.capacity - 1
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        node >= self.capacity
    }

    pub fn is_internal(&self, node: usize) -> bool {
        node < self.capacity - 1
    }

    pub fn leaf_node(&self, handle: usize) -> usize {
        handle + self.capacity
    }

    pub fn leaf_handle(&self, node: usize) -> usize {
        debug_assert!(self.is_leaf(node));
        node - self.capacity
    }

    pub fn mass(&self, node: usize) -> usize {
        if self.is_leaf(node) {
            *self
                .extra_leaf_mass
                .get(&self.leaf_handle(node))
                .unwrap_or(&1) as usize
        } else {
            self.mass[node] as usize
        }
    }

    pub fn cut_dimension(&self, node: usize) -> usize {
        self.cut_dimension[node] as usize
    }

    pub fn cut_value(&self, node: usize) -> f32 {
        self.cut_value[node]
    }

    pub fn left(&self, node: usize) -> usize {
        self.left[node]
    }

    pub fn right(&self, node: usize) -> usize {
        self.right[node]
    }

    pub fn is_left_of(&self, node: usize, point: &[f32]) -> bool {
        point[self.cut_dimension[node] as usize] <= self.cut_value[node]
    }

    pub fn sibling_of(&self, node: usize, parent: usize) -> usize {
        if self.left[parent] == node {
            self.right[parent]
        } else {
            self.left[parent]
        }
    }

    /// `(cut_dimension, cut_value, left, right)`; sentinels for leaves.
    pub fn cut_and_children(&self, node: usize) -> (usize, f32, usize, usize) {
        if self.is_internal(node) {
            (
                self.cut_dimension[node] as usize,
                self.cut_value[node],
                self.left[node],
                self.right[node],
            )
        } else {
            (usize::MAX, f32::MAX, usize::MAX, usize::MAX)
        }
    }

    /// Appends `(node, sibling)` pairs from `root` down to the leaf the cuts
    /// route `point` to. The root's recorded sibling is the null node.
    pub fn set_path(&self, path: &mut Vec<(usize, usize)>, root: usize, point: &[f32]) {
        let mut node = root;
        path.push((root, self.null_node()));
        while !self.is_leaf(node) {
            if self.is_left_of(node, point) {
                path.push((self.left[node], self.right[node]));
                node = self.left[node];
            } else {
                path.push((self.right[node], self.left[node]));
                node = self.right[node];
            }
        }
    }

    pub fn use_path_for_box(&self) -> bool {
        self.cache_fraction < PATH_BOX_THRESHOLD
    }

    // ---- construction and removal of internal nodes ----

    /// Installs a new internal node carrying `cut` above `child`, with a
    /// fresh leaf for `point_handle` on the side `point` falls on.
    /// `saved_box` is the box of the displaced subtree; the cached copy is
    /// grown by the point. Returns the new node id.
    pub fn add_node(
        &mut self,
        parent: usize,
        point: &[f32],
        child: usize,
        point_handle: usize,
        cut: Cut,
        saved_box: &BoundingBox,
        point_store: &PointStore,
    ) -> Result<usize> {
        let index = self.slot_manager.take()?;
        self.cut_dimension[index] = cut.dimension as u32;
        self.cut_value[index] = cut.value;
        let leaf = self.leaf_node(point_handle);
        if point[cut.dimension] <= cut.value {
            self.left[index] = leaf;
            self.right[index] = child;
        } else {
            self.left[index] = child;
            self.right[index] = leaf;
        }
        self.mass[index] = (self.mass(child) + 1) as u32;
        if index < self.cache_limit {
            self.write_cached_box(index, saved_box);
            self.grow_cached_box(index, point);
        }
        if self.point_sum.is_some() {
            let mut sum = self.subtree_sum(child, point_store)?;
            for (s, &v) in sum.iter_mut().zip(point) {
                *s += v;
            }
            let base = index * self.dimensions;
            self.point_sum.as_mut().unwrap()[base..base + self.dimensions].copy_from_slice(&sum);
        }
        if parent != self.null_node() {
            self.replace_child(parent, child, index);
        }
        Ok(index)
    }

    pub fn replace_child(&mut self, parent: usize, old_child: usize, new_child: usize) {
        if self.left[parent] == old_child {
            self.left[parent] = new_child;
        } else {
            self.right[parent] = new_child;
        }
    }

    pub fn release_node(&mut self, node: usize) -> Result<()> {
        let null = self.null_node();
        self.left[node] = null;
        self.right[node] = null;
        self.cut_dimension[node] = u32::MAX;
        self.cut_value[node] = 0.0;
        self.mass[node] = 0;
        if let Some(sums) = self.point_sum.as_mut() {
            let base = node * self.dimensions;
            sums[base..base + self.dimensions].fill(0.0);
        }
        self.slot_manager.release(node)
    }

    // ---- leaf mass and sequence indexes ----

    pub fn increase_leaf_mass(&mut self, node: usize) {
        let handle = self.leaf_handle(node);
        *self.extra_leaf_mass.entry(handle).or_insert(1) += 1;
    }

    /// Returns the remaining mass after removal; zero means the leaf itself
    /// must go.
    pub fn decrease_leaf_mass(&mut self, node: usize) -> usize {
        let handle = self.leaf_handle(node);
        match self.extra_leaf_mass.remove(&handle) {
            Some(m) if m > 2 => {
                self.extra_leaf_mass.insert(handle, m - 1);
                (m - 1) as usize
            }
            Some(_) => 1,
            None => 0,
        }
    }

    pub fn append_leaf_sequence(&mut self, handle: usize, sequence_index: i64) {
        if let Some(map) = self.leaf_sequences.as_mut() {
            map.entry(handle).or_default().push(sequence_index);
        }
    }

    pub fn remove_leaf_sequence(&mut self, handle: usize, sequence_index: i64) {
        if let Some(map) = self.leaf_sequences.as_mut() {
            if let Some(list) = map.get_mut(&handle) {
                if let Some(pos) = list.iter().position(|&s| s == sequence_index) {
                    list.swap_remove(pos);
                }
                if list.is_empty() {
                    map.remove(&handle);
                }
            }
        }
    }

    pub fn leaf_sequences(&self, handle: usize) -> Option<Vec<i64>> {
        self.leaf_sequences
            .as_ref()
            .and_then(|map| map.get(&handle).cloned())
    }

    // ---- center of mass ----

    fn subtree_sum(&self, node: usize, point_store: &PointStore) -> Result<Vec<f32>> {
        if self.is_leaf(node) {
            let handle = self.leaf_handle(node);
            let mut point = point_store.copy(handle)?;
            let mass = self.mass(node) as f32;
            for v in point.iter_mut() {
                *v *= mass;
            }
            Ok(point)
        } else {
            let base = node * self.dimensions;
            Ok(
                self.point_sum.as_ref().expect("sums not enabled")[base..base + self.dimensions]
                    .to_vec(),
            )
        }
    }

    /// Center of mass of the subtree under an internal node; `None` when
    /// the feature is disabled.
    pub fn center_of_mass(&self, node: usize) -> Option<Vec<f32>> {
        let sums = self.point_sum.as_ref()?;
        let base = node * self.dimensions;
        let mass = self.mass[node] as f32;
        Some(
            sums[base..base + self.dimensions]
                .iter()
                .map(|&v| v / mass)
                .collect(),
        )
    }

    fn shift_sums(&mut self, node: usize, point: &[f32], sign: f32) {
        if let Some(sums) = self.point_sum.as_mut() {
            let base = node * self.dimensions;
            for (s, &v) in sums[base..base + self.dimensions].iter_mut().zip(point) {
                *s += sign * v;
            }
        }
    }

    // ---- mass and box maintenance along a path ----

    /// Walks the remaining `(node, sibling)` path upward after an insertion,
    /// incrementing masses and growing cached boxes until one already
    /// contains the point. `box_resolved` marks insertions that cannot move
    /// any box (duplicates of an existing leaf).
    pub fn ancestors_after_add(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        box_resolved: bool,
    ) {
        let mut resolved = box_resolved;
        while let Some((node, _)) = path.pop() {
            self.mass[node] += 1;
            self.shift_sums(node, point, 1.0);
            if !resolved {
                resolved = self.grow_cached_box(node, point);
            }
        }
    }

    /// The deletion counterpart: decrements masses and rebuilds cached boxes
    /// that had the removed point on their boundary.
    pub fn ancestors_after_delete(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        point_store: &PointStore,
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((node, _)) = path.pop() {
            check_state(self.mass[node] > 0, "mass underflow on delete")?;
            self.mass[node] -= 1;
            self.shift_sums(node, point, -1.0);
            if !resolved {
                resolved = self.shrink_cached_box(node, point, point_store)?;
            }
        }
        Ok(())
    }

    // ---- bounding boxes ----

    fn cached(&self, node: usize) -> bool {
        node < self.cache_limit
    }

    fn write_cached_box(&mut self, node: usize, bounding_box: &BoundingBox) {
        let base = 2 * node * self.dimensions;
        let mid = base + self.dimensions;
        self.box_data[base..mid].copy_from_slice(bounding_box.min_values());
        self.box_data[mid..mid + self.dimensions].copy_from_slice(bounding_box.max_values());
        self.range_sum[node] = bounding_box.range_sum();
    }

    /// Grows the cached box of `node` by `point`; returns true when the box
    /// already contained the point (so no ancestor needs attention). An
    /// uncached node reports false.
    fn grow_cached_box(&mut self, node: usize, point: &[f32]) -> bool {
        if !self.cached(node) {
            return false;
        }
        let base = 2 * node * self.dimensions;
        let mid = base + self.dimensions;
        for (x, &y) in self.box_data[base..mid].iter_mut().zip(point) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.box_data[mid..mid + self.dimensions]
            .iter_mut()
            .zip(point)
        {
            if y > *x {
                *x = y;
            }
        }
        let new_sum: f64 = self.box_data[base..mid]
            .iter()
            .zip(&self.box_data[mid..mid + self.dimensions])
            .map(|(&lo, &hi)| (hi - lo) as f64)
            .sum();
        let unchanged = self.range_sum[node] == new_sum;
        self.range_sum[node] = new_sum;
        unchanged
    }

    /// After a deletion: when the removed point sat on the cached box
    /// boundary the box is rebuilt from the children. Returns true when the
    /// box strictly contained the point and nothing above can change.
    fn shrink_cached_box(
        &mut self,
        node: usize,
        point: &[f32],
        point_store: &PointStore,
    ) -> Result<bool> {
        if !self.cached(node) {
            return Ok(false);
        }
        let base = 2 * node * self.dimensions;
        let mid = base + self.dimensions;
        let interior = self.box_data[base..mid]
            .iter()
            .zip(point)
            .zip(&self.box_data[mid..mid + self.dimensions])
            .all(|((&lo, &v), &hi)| lo < v && v < hi);
        if interior {
            return Ok(true);
        }
        let rebuilt = self.reconstruct_box(node, point_store)?;
        self.write_cached_box(node, &rebuilt);
        Ok(false)
    }

    fn reconstruct_box(&self, node: usize, point_store: &PointStore) -> Result<BoundingBox> {
        let mut bounding_box = self.bounding_box(self.left[node], point_store)?;
        self.grow_node_box(&mut bounding_box, point_store, self.right[node])?;
        Ok(bounding_box)
    }

    /// The tight box of any node, from the cache when present, otherwise
    /// recomputed from descendants.
    pub fn bounding_box(&self, node: usize, point_store: &PointStore) -> Result<BoundingBox> {
        if self.is_leaf(node) {
            let point = point_store.copy(self.leaf_handle(node))?;
            return Ok(BoundingBox::from_point(&point));
        }
        if self.cached(node) {
            let base = 2 * node * self.dimensions;
            let mid = base + self.dimensions;
            return BoundingBox::new(
                &self.box_data[base..mid],
                &self.box_data[mid..mid + self.dimensions],
            );
        }
        self.reconstruct_box(node, point_store)
    }

    /// Unions the subtree under `node` into `bounding_box`, descending only
    /// where no cached box is available.
    pub fn grow_node_box(
        &self,
        bounding_box: &mut BoundingBox,
        point_store: &PointStore,
        node: usize,
    ) -> Result<()> {
        if self.is_leaf(node) {
            let point = point_store.copy(self.leaf_handle(node))?;
            bounding_box.contains_or_add_point(&point);
            return Ok(());
        }
        if self.cached(node) {
            let base = 2 * node * self.dimensions;
            let mid = base + self.dimensions;
            bounding_box.contains_or_add_point(&self.box_data[base..mid]);
            bounding_box.contains_or_add_point(&self.box_data[mid..mid + self.dimensions]);
            return Ok(());
        }
        self.grow_node_box(bounding_box, point_store, self.left[node])?;
        self.grow_node_box(bounding_box, point_store, self.right[node])
    }

    /// Scalar probability of cut at an internal node, served from the cache
    /// without materializing a box when possible.
    pub fn probability_of_cut(
        &self,
        node: usize,
        point: &[f32],
        point_store: &PointStore,
    ) -> Result<f64> {
        if self.cached(node) {
            let base = 2 * node * self.dimensions;
            let mid = base + self.dimensions;
            let below: f32 = self.box_data[base..mid]
                .iter()
                .zip(point)
                .map(|(&lo, &v)| if lo - v > 0.0 { lo - v } else { 0.0 })
                .sum();
            let above: f32 = point
                .iter()
                .zip(&self.box_data[mid..mid + self.dimensions])
                .map(|(&v, &hi)| if v - hi > 0.0 { v - hi } else { 0.0 })
                .sum();
            let extension = below + above;
            if extension == 0.0 {
                return Ok(0.0);
            }
            return Ok(extension as f64 / (self.range_sum[node] + extension as f64));
        }
        Ok(self
            .bounding_box(node, point_store)?
            .probability_of_cut(point))
    }

    pub fn probability_of_cut_with_missing(
        &self,
        node: usize,
        point: &[f32],
        missing: &[bool],
        point_store: &PointStore,
    ) -> Result<f64> {
        Ok(self
            .bounding_box(node, point_store)?
            .probability_of_cut_with_missing(point, missing))
    }

    // ---- cache reconfiguration ----

    pub fn cache_fraction(&self) -> f64 {
        self.cache_fraction
    }

    /// Re-sizes the box cache; boxes of newly cached in-use slots are
    /// recomputed from the point store.
    pub fn set_cache_fraction(
        &mut self,
        cache_fraction: f64,
        point_store: &PointStore,
    ) -> Result<()> {
        check_config(
            (0.0..=1.0).contains(&cache_fraction),
            "cache fraction must lie in [0,1]",
        )?;
        let old_limit = self.cache_limit;
        let new_limit = (cache_fraction * self.capacity as f64) as usize;
        debug!(old_limit, new_limit, "resizing bounding box cache");
        self.cache_fraction = cache_fraction;
        self.box_data.resize(2 * self.dimensions * new_limit, 0.0);
        self.range_sum.resize(new_limit, 0.0);
        let null = self.null_node();
        self.cache_limit = new_limit;
        for node in old_limit..new_limit.min(self.left.len()) {
            if self.left[node] != null {
                let rebuilt = self.reconstruct_box(node, point_store)?;
                self.write_cached_box(node, &rebuilt);
            }
        }
        Ok(())
    }

    pub fn size_in_bytes(&self) -> usize {
        (self.left.len() + self.right.len()) * std::mem::size_of::<usize>()
            + self.cut_dimension.len() * std::mem::size_of::<u32>()
            + self.cut_value.len() * std::mem::size_of::<f32>()
            + self.mass.len() * std::mem::size_of::<u32>()
            + self.box_data.len() * std::mem::size_of::<f32>()
            + self.range_sum.len() * std::mem::size_of::<f64>()
            + self.point_sum.as_ref().map_or(0, |s| s.len()) * std::mem::size_of::<f32>()
            + self.slot_manager.size_in_bytes()
            + std::mem::size_of::<NodeStore>()
    }
}
