use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tracing::{debug, trace};

use crate::errors::{check_argument, check_state, ForestError, Result};
use crate::indexmanager::IndexManager;

const LOCATION_NONE: u32 = u32::MAX;

/// A reference-counted arena of fixed-dimension points shared by every tree
/// in a forest.
///
/// Handles are stable `usize` slots; the backing storage may compact and
/// grow but a handle never moves for the lifetime of its reference count.
/// Interning an already-stored point returns the existing handle, so a point
/// sampled by many trees is stored once.
///
/// With internal shingling enabled the store also owns the sliding shingle
/// buffer: callers present raw blocks of `dimensions / shingle_size` values
/// and the store interns the assembled shingle, sharing overlapping storage
/// between consecutive shingles. With rotation the stored shingle is the
/// cyclic-canonical form, so identical cyclic contents intern to one handle.
pub struct PointStore {
    dimensions: usize,
    shingle_size: usize,
    capacity: usize,
    internal_shingling: bool,
    internal_rotation: bool,
    store: Vec<f32>,
    location: Vec<u32>,
    reference_count: Vec<u32>,
    point_hash: Vec<u64>,
    dedup: HashMap<u64, Vec<usize>>,
    last_known_shingle: Vec<f32>,
    next_sequence_index: usize,
    start_free_region: usize,
    slot_manager: IndexManager,
}

fn hash_point(point: &[f32]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for &v in point {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

impl PointStore {
    pub fn new(
        dimensions: usize,
        shingle_size: usize,
        capacity: usize,
        initial_capacity: usize,
        internal_shingling: bool,
        internal_rotation: bool,
    ) -> Self {
        let initial = initial_capacity.min(capacity).max(1);
        PointStore {
            dimensions,
            shingle_size,
            capacity,
            internal_shingling,
            internal_rotation,
            store: vec![0.0; initial * dimensions],
            location: vec![LOCATION_NONE; initial],
            reference_count: vec![0; initial],
            point_hash: vec![0; initial],
            dedup: HashMap::new(),
            last_known_shingle: vec![0.0; dimensions],
            next_sequence_index: 0,
            start_free_region: 0,
            slot_manager: IndexManager::new(initial),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    pub fn base_dimension(&self) -> usize {
        self.dimensions / self.shingle_size
    }

    pub fn is_internal_shingling(&self) -> bool {
        self.internal_shingling
    }

    /// Number of raw blocks consumed so far (internal shingling only).
    pub fn blocks_seen(&self) -> usize {
        self.next_sequence_index
    }

    /// The shingled query point that would result from appending `point`,
    /// without mutating the buffer. Accepts either a raw block (internal
    /// shingling) or an already full-dimension point.
    pub fn shingled_point(&self, point: &[f32]) -> Result<Vec<f32>> {
        let base = self.base_dimension();
        if point.len() == base && self.shingle_size > 1 {
            check_argument(
                self.internal_shingling,
                "raw blocks require internal shingling",
            )?;
            let mut answer = self.last_known_shingle.clone();
            if self.internal_rotation {
                let offset = (self.next_sequence_index * base) % self.dimensions;
                answer[offset..offset + base].copy_from_slice(point);
            } else {
                answer.copy_within(base.., 0);
                answer[self.dimensions - base..].copy_from_slice(point);
            }
            return Ok(answer);
        }
        check_argument(point.len() == self.dimensions, "wrong input length")?;
        Ok(point.to_vec())
    }

    /// Translates missing-coordinate indices from raw-block space into
    /// shingle space, `look_ahead` blocks past the current buffer.
    pub fn missing_indices(&self, look_ahead: usize, values: &[usize]) -> Result<Vec<usize>> {
        if !self.internal_shingling {
            for &v in values {
                check_argument(v < self.dimensions, "missing index out of range")?;
            }
            return Ok(values.to_vec());
        }
        let base = self.base_dimension();
        let mut answer = Vec::with_capacity(values.len());
        for &v in values {
            check_argument(v < base, "missing index out of range")?;
            if self.internal_rotation {
                answer.push(((self.next_sequence_index + look_ahead) * base + v) % self.dimensions);
            } else {
                answer.push(self.dimensions - base + v);
            }
        }
        Ok(answer)
    }

    /// The shingle-space positions of the block `look_ahead` steps ahead.
    pub fn next_indices(&self, look_ahead: usize) -> Result<Vec<usize>> {
        let all: Vec<usize> = (0..self.base_dimension()).collect();
        self.missing_indices(look_ahead, &all)
    }

    /// Borrow of the stored values for `handle` together with the rotation
    /// offset needed to reconstruct the logical point.
    pub fn reference_and_offset(&self, handle: usize) -> Result<(&[f32], usize)> {
        check_state(
            handle < self.reference_count.len() && self.reference_count[handle] != 0,
            "handle not in use",
        )?;
        let base = self.base_dimension();
        let start = self.location[handle] as usize * base;
        let offset = if self.internal_rotation {
            start % self.dimensions
        } else {
            0
        };
        Ok((&self.store[start..start + self.dimensions], offset))
    }

    /// The logical point for `handle`, undoing rotation.
    pub fn copy(&self, handle: usize) -> Result<Vec<f32>> {
        let (reference, offset) = self.reference_and_offset(handle)?;
        if offset == 0 {
            return Ok(reference.to_vec());
        }
        let mut answer = vec![0.0; self.dimensions];
        for (i, &v) in reference.iter().enumerate() {
            answer[(i + offset) % self.dimensions] = v;
        }
        Ok(answer)
    }

    /// Bitwise equality between a logical point and a stored handle.
    pub fn is_equal(&self, point: &[f32], handle: usize) -> Result<bool> {
        let (reference, offset) = self.reference_and_offset(handle)?;
        if offset == 0 {
            return Ok(point == reference);
        }
        for (i, &v) in reference.iter().enumerate() {
            if point[(i + offset) % self.dimensions] != v {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn retain(&mut self, handle: usize) -> Result<()> {
        check_state(
            handle < self.reference_count.len() && self.reference_count[handle] != 0,
            "retain of a handle not in use",
        )?;
        self.reference_count[handle] += 1;
        Ok(())
    }

    pub fn release(&mut self, handle: usize) -> Result<()> {
        check_state(
            handle < self.reference_count.len() && self.reference_count[handle] != 0,
            "release of a handle not in use",
        )?;
        self.reference_count[handle] -= 1;
        if self.reference_count[handle] == 0 {
            self.forget(handle)?;
        }
        Ok(())
    }

    /// Applies the per-tree `(added, evicted)` handle pairs produced by one
    /// ensemble update as a single group of count adjustments.
    pub fn adjust_counts(&mut self, result: &[(Option<usize>, Option<usize>)]) -> Result<()> {
        for &(added, evicted) in result {
            if let Some(handle) = added {
                self.retain(handle)?;
                if let Some(old) = evicted {
                    self.release(old)?;
                }
            }
        }
        Ok(())
    }

    /// Interns a point (or raw block under internal shingling) and returns a
    /// handle holding one reference for the caller. Returns `None` until the
    /// shingle buffer first fills.
    pub fn intern(&mut self, point: &[f32]) -> Result<Option<usize>> {
        let base = self.base_dimension();
        self.next_sequence_index += 1;
        let logical: Vec<f32>;
        let new_point: &[f32] = if self.internal_shingling {
            check_state(
                point.len() == base,
                "internal shingling expects raw blocks",
            )?;
            if self.internal_rotation {
                let offset = ((self.next_sequence_index - 1) * base) % self.dimensions;
                self.last_known_shingle[offset..offset + base].copy_from_slice(point);
            } else {
                self.last_known_shingle.copy_within(base.., 0);
                self.last_known_shingle[self.dimensions - base..].copy_from_slice(point);
            }
            if self.next_sequence_index < self.shingle_size {
                return Ok(None);
            }
            logical = self.last_known_shingle.clone();
            &logical
        } else {
            check_argument(point.len() == self.dimensions, "wrong input length")?;
            point
        };

        let hash = hash_point(new_point);
        let mut existing = None;
        if let Some(candidates) = self.dedup.get(&hash) {
            for &handle in candidates {
                if self.is_equal(new_point, handle)? {
                    existing = Some(handle);
                    break;
                }
            }
        }
        if let Some(handle) = existing {
            self.reference_count[handle] += 1;
            return Ok(Some(handle));
        }

        let handle = self.allocate_slot()?;
        self.append_values(handle, new_point);
        self.reference_count[handle] = 1;
        self.point_hash[handle] = hash;
        self.dedup.entry(hash).or_default().push(handle);
        Ok(Some(handle))
    }

    fn forget(&mut self, handle: usize) -> Result<()> {
        self.location[handle] = LOCATION_NONE;
        let hash = self.point_hash[handle];
        let emptied = match self.dedup.get_mut(&hash) {
            Some(candidates) => {
                candidates.retain(|&h| h != handle);
                candidates.is_empty()
            }
            None => false,
        };
        if emptied {
            self.dedup.remove(&hash);
        }
        self.slot_manager.release(handle)
    }

    fn allocate_slot(&mut self) -> Result<usize> {
        if self.slot_manager.is_exhausted() {
            if self.location.len() >= self.capacity {
                return Err(ForestError::CapacityExhausted {
                    msg: "point store is at capacity",
                });
            }
            let new_size = (self.location.len() + self.location.len() / 5 + 1).min(self.capacity);
            debug!(new_size, "growing point store slots");
            self.location.resize(new_size, LOCATION_NONE);
            self.reference_count.resize(new_size, 0);
            self.point_hash.resize(new_size, 0);
            self.slot_manager.extend_capacity(new_size);
        }
        self.slot_manager.take()
    }

    /// True when the tail of the free region already holds the first
    /// `dimensions - base` values of `point`, i.e. the previous shingle
    /// overlaps and only the newest block needs to be written. Rotated
    /// shingles are stored in cyclic-canonical form, which consecutive
    /// shingles do not share, so rotation never overlaps.
    fn overlaps_previous(&self, point: &[f32]) -> bool {
        if self.shingle_size == 1 || self.internal_rotation {
            return false;
        }
        let base = self.base_dimension();
        let overlap = self.dimensions - base;
        if self.start_free_region < overlap {
            return false;
        }
        let tail = self.start_free_region - overlap;
        self.store[tail..self.start_free_region]
            .iter()
            .zip(point)
            .all(|(&stored, &fresh)| stored == fresh)
    }

    fn append_values(&mut self, handle: usize, point: &[f32]) {
        let base = self.base_dimension();
        if self.dimensions + self.start_free_region > self.store.len() {
            self.compact();
            if self.dimensions + self.start_free_region > self.store.len() {
                let new_size = (self.store.len() + self.store.len() / 5 + self.dimensions)
                    .min(self.capacity * self.dimensions);
                debug!(new_size, "growing point store values");
                self.store.resize(new_size, 0.0);
            }
        }
        if self.overlaps_previous(point) {
            let overlap = self.dimensions - base;
            let start = self.start_free_region - overlap;
            self.location[handle] = (start / base) as u32;
            self.store[self.start_free_region..self.start_free_region + base]
                .copy_from_slice(&point[overlap..]);
            self.start_free_region += base;
        } else {
            let start = self.start_free_region;
            self.location[handle] = (start / base) as u32;
            self.store[start..start + self.dimensions].copy_from_slice(point);
            self.start_free_region += self.dimensions;
        }
    }

    /// Slides live blocks to the front of the value array. Handles are
    /// untouched; only their locations move. Under rotation the destination
    /// is padded so every block keeps its cyclic phase.
    fn compact(&mut self) {
        let base = self.base_dimension();
        let mut by_location: Vec<(usize, usize)> = self
            .location
            .iter()
            .enumerate()
            .filter(|(_, &loc)| loc != LOCATION_NONE)
            .map(|(handle, &loc)| (loc as usize, handle))
            .collect();
        by_location.sort_unstable();
        trace!(live = by_location.len(), "compacting point store");

        let mut write = 0;
        let mut next = 0;
        let end = by_location.len();
        while next < end {
            let block_start = by_location[next].0 * base;
            let mut block_end = block_start + self.dimensions;
            // extend over every live point overlapping this stretch
            let mut probe = next + 1;
            while probe < end {
                let candidate = by_location[probe].0 * base;
                if candidate <= block_end {
                    if candidate + self.dimensions > block_end {
                        block_end = candidate + self.dimensions;
                    }
                    probe += 1;
                } else {
                    break;
                }
            }
            if self.internal_rotation {
                // keep the cyclic phase of the stretch intact
                while write % self.dimensions != block_start % self.dimensions {
                    self.store[write] = 0.0;
                    write += 1;
                }
            }
            for i in block_start..block_end {
                self.store[write] = self.store[i];
                if next < end && i == by_location[next].0 * base {
                    let handle = by_location[next].1;
                    self.location[handle] = (write / base) as u32;
                    next += 1;
                }
                write += 1;
            }
        }
        self.start_free_region = write;
    }

    pub fn size_in_bytes(&self) -> usize {
        self.store.len() * std::mem::size_of::<f32>()
            + self.location.len() * std::mem::size_of::<u32>()
            + self.reference_count.len() * std::mem::size_of::<u32>()
            + self.point_hash.len() * std::mem::size_of::<u64>()
            + self.slot_manager.size_in_bytes()
            + std::mem::size_of::<PointStore>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates_equal_points() {
        let mut store = PointStore::new(2, 1, 16, 4, false, false);
        let a = store.intern(&[1.0, 2.0]).unwrap().unwrap();
        let b = store.intern(&[1.0, 2.0]).unwrap().unwrap();
        assert_eq!(a, b);
        let c = store.intern(&[1.0, 3.0]).unwrap().unwrap();
        assert_ne!(a, c);
        // two references on a, one on c
        store.release(a).unwrap();
        assert!(store.copy(a).is_ok());
        store.release(a).unwrap();
        assert!(store.copy(a).is_err());
        assert_eq!(store.copy(c).unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn released_slot_is_reused_without_moving_live_handles() {
        let mut store = PointStore::new(1, 1, 8, 8, false, false);
        let a = store.intern(&[1.0]).unwrap().unwrap();
        let b = store.intern(&[2.0]).unwrap().unwrap();
        store.release(a).unwrap();
        let c = store.intern(&[3.0]).unwrap().unwrap();
        assert_eq!(a, c);
        assert_eq!(store.copy(b).unwrap(), vec![2.0]);
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let mut store = PointStore::new(1, 1, 2, 2, false, false);
        store.intern(&[1.0]).unwrap();
        store.intern(&[2.0]).unwrap();
        assert!(matches!(
            store.intern(&[3.0]),
            Err(ForestError::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn shingle_buffer_fills_before_first_handle() {
        let mut store = PointStore::new(4, 4, 16, 8, true, false);
        assert!(store.intern(&[1.0]).unwrap().is_none());
        assert!(store.intern(&[2.0]).unwrap().is_none());
        assert!(store.intern(&[3.0]).unwrap().is_none());
        let h = store.intern(&[4.0]).unwrap().unwrap();
        assert_eq!(store.copy(h).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        let h2 = store.intern(&[5.0]).unwrap().unwrap();
        assert_eq!(store.copy(h2).unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn rotation_writes_blocks_in_cyclic_position() {
        let mut store = PointStore::new(3, 3, 16, 8, true, true);
        assert!(store.intern(&[1.0]).unwrap().is_none());
        assert!(store.intern(&[2.0]).unwrap().is_none());
        let h = store.intern(&[3.0]).unwrap().unwrap();
        // the fourth block wraps around to cyclic position 0
        let h2 = store.intern(&[4.0]).unwrap().unwrap();
        assert_eq!(store.copy(h).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(store.copy(h2).unwrap(), vec![4.0, 2.0, 3.0]);
        // the next block to arrive would land at cyclic position 1
        assert_eq!(store.missing_indices(0, &[0]).unwrap(), vec![1]);
    }

    #[test]
    fn shingled_query_does_not_mutate() {
        let mut store = PointStore::new(4, 2, 16, 8, true, false);
        store.intern(&[1.0, 2.0]).unwrap();
        store.intern(&[3.0, 4.0]).unwrap();
        let before = store.blocks_seen();
        let q = store.shingled_point(&[9.0, 9.0]).unwrap();
        assert_eq!(q, vec![3.0, 4.0, 9.0, 9.0]);
        assert_eq!(store.blocks_seen(), before);
    }

    #[test]
    fn compaction_preserves_contents() {
        let mut store = PointStore::new(2, 1, 64, 4, false, false);
        let mut handles = Vec::new();
        for i in 0..32 {
            handles.push(store.intern(&[i as f32, 1.0]).unwrap().unwrap());
        }
        for &h in handles.iter().step_by(2) {
            store.release(h).unwrap();
        }
        for i in 32..48 {
            handles.push(store.intern(&[i as f32, 1.0]).unwrap().unwrap());
        }
        for (i, &h) in handles.iter().enumerate().skip(1).step_by(2).take(8) {
            assert_eq!(store.copy(h).unwrap(), vec![i as f32, 1.0]);
        }
    }
}
