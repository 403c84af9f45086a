use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::errors::{check_argument, check_config, check_state, ForestError, Result};

/// Outcome of presenting one candidate to the sampler.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerDecision {
    /// The candidate will enter the sample once committed. When the sampler
    /// is full the entry to make room for it is reported here; the caller
    /// must remove it from the paired tree before committing.
    Accepted {
        weight: f32,
        evicted: Option<SampleEntry>,
    },
    Rejected,
}

/// One reservoir entry: a point-store handle, its time-decayed priority
/// weight (lower keeps longer), and the sequence index at acceptance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleEntry {
    pub handle: usize,
    pub weight: f32,
    pub sequence_index: i64,
}

struct PendingAccept {
    weight: f32,
    sequence_index: i64,
    evict: bool,
}

/// A weighted time-decayed reservoir of fixed capacity.
///
/// Each candidate at sequence index `t` draws `u` in (0,1) and is assigned
/// the weight
///
/// ```text
/// w(t) = -(t - t0) * lambda - lambda_accumulated + ln(-ln u)
/// ```
///
/// where `t0` is the sequence index of the last decay change. Folding
/// `(max_seq - t0) * lambda_old` into `lambda_accumulated` when the decay
/// changes keeps `w` continuous across the change, so entries admitted under
/// different decay rates stay mutually comparable and the heap order never
/// has to be rebuilt.
///
/// The sample is held in a flat-array binary max-heap by weight, so the
/// entry most eligible for eviction is at the top. Acceptance is two-phase:
/// [`accept`](Self::accept) is a pure decision recording pending state, and
/// [`commit`](Self::commit) applies it; the coordinator deletes the evicted
/// point from the paired tree in between.
pub struct DecaySampler {
    capacity: usize,
    size: usize,
    weights: Vec<f32>,
    handles: Vec<usize>,
    sequence_indexes: Vec<i64>,
    time_decay: f64,
    initial_accept_fraction: f64,
    accumulated_decay: f64,
    sequence_of_decay_change: i64,
    max_sequence_index: i64,
    pending: Option<PendingAccept>,
    rng: ChaCha20Rng,
}

impl DecaySampler {
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        check_config(capacity > 0, "sampler capacity must be positive")?;
        check_config(time_decay >= 0.0, "time decay must be non-negative")?;
        check_config(
            initial_accept_fraction > 0.0 && initial_accept_fraction <= 1.0,
            "initial accept fraction must be in (0,1]",
        )?;
        Ok(DecaySampler {
            capacity,
            size: 0,
            weights: vec![0.0; capacity],
            handles: vec![usize::MAX; capacity],
            sequence_indexes: vec![0; capacity],
            time_decay,
            initial_accept_fraction,
            accumulated_decay: 0.0,
            sequence_of_decay_change: 0,
            max_sequence_index: 0,
            pending: None,
            rng: ChaCha20Rng::seed_from_u64(random_seed),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    pub fn accumulated_decay(&self) -> f64 {
        self.accumulated_decay
    }

    pub fn sequence_of_decay_change(&self) -> i64 {
        self.sequence_of_decay_change
    }

    /// Live entries in heap order (top first).
    pub fn entries(&self) -> impl Iterator<Item = SampleEntry> + '_ {
        (0..self.size).map(|i| SampleEntry {
            handle: self.handles[i],
            weight: self.weights[i],
            sequence_index: self.sequence_indexes[i],
        })
    }

    fn weight_of(&mut self, sequence_index: i64) -> f32 {
        let mut gumbel = f64::ln(-f64::ln(self.rng.gen::<f64>()));
        while !gumbel.is_finite() {
            gumbel = f64::ln(-f64::ln(self.rng.gen::<f64>()));
        }
        let elapsed = (sequence_index - self.sequence_of_decay_change) as f64;
        (-elapsed * self.time_decay - self.accumulated_decay + gumbel) as f32
    }

    /// Decides whether the candidate at `sequence_index` enters the sample.
    /// Pure with respect to the reservoir; records pending state consumed by
    /// [`commit`](Self::commit) or [`cancel`](Self::cancel).
    pub fn accept(&mut self, sequence_index: i64) -> Result<SamplerDecision> {
        check_state(self.pending.is_none(), "accept while a commit is pending")?;
        check_argument(
            sequence_index >= self.max_sequence_index,
            "sequence indexes must be non-decreasing",
        )?;
        self.max_sequence_index = sequence_index;
        let weight = self.weight_of(sequence_index);

        if !self.is_full() {
            let fill = self.size as f64 / self.capacity as f64;
            let probability = (self.initial_accept_fraction + 1.0 - fill).min(1.0);
            if self.rng.gen::<f64>() < probability {
                self.pending = Some(PendingAccept {
                    weight,
                    sequence_index,
                    evict: false,
                });
                return Ok(SamplerDecision::Accepted {
                    weight,
                    evicted: None,
                });
            }
            return Ok(SamplerDecision::Rejected);
        }

        if weight < self.weights[0] {
            self.pending = Some(PendingAccept {
                weight,
                sequence_index,
                evict: true,
            });
            return Ok(SamplerDecision::Accepted {
                weight,
                evicted: Some(SampleEntry {
                    handle: self.handles[0],
                    weight: self.weights[0],
                    sequence_index: self.sequence_indexes[0],
                }),
            });
        }
        Ok(SamplerDecision::Rejected)
    }

    /// Inserts `handle` with the weight recorded by the last successful
    /// [`accept`](Self::accept). The handle may differ from the one the
    /// caller interned when the paired tree resolved the point to an
    /// existing equal leaf.
    pub fn commit(&mut self, handle: usize) -> Result<()> {
        let pending = self.pending.take().ok_or(ForestError::PreconditionViolation {
            msg: "commit without a successful accept",
        })?;
        if pending.evict {
            self.evict_top();
        }
        check_state(self.size < self.capacity, "sampler overflow on commit")?;
        let mut current = self.size;
        self.weights[current] = pending.weight;
        self.handles[current] = handle;
        self.sequence_indexes[current] = pending.sequence_index;
        self.size += 1;
        while current > 0 {
            let parent = (current - 1) / 2;
            if self.weights[parent] < self.weights[current] {
                self.swap_entries(parent, current);
                current = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Discards pending acceptance state; used when an update group fails
    /// partway so that no entry is half-applied.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Changes the decay rate, folding the elapsed contribution of the old
    /// rate into the accumulated offset before resetting the change point.
    pub fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        check_argument(time_decay >= 0.0, "time decay must be non-negative")?;
        self.accumulated_decay +=
            (self.max_sequence_index - self.sequence_of_decay_change) as f64 * self.time_decay;
        self.sequence_of_decay_change = self.max_sequence_index;
        self.time_decay = time_decay;
        Ok(())
    }

    fn evict_top(&mut self) -> SampleEntry {
        let top = SampleEntry {
            handle: self.handles[0],
            weight: self.weights[0],
            sequence_index: self.sequence_indexes[0],
        };
        self.size -= 1;
        let last = self.size;
        self.weights[0] = self.weights[last];
        self.handles[0] = self.handles[last];
        self.sequence_indexes[0] = self.sequence_indexes[last];
        self.sift_down(0);
        top
    }

    fn sift_down(&mut self, start: usize) {
        let mut current = start;
        while 2 * current + 1 < self.size {
            let mut largest = 2 * current + 1;
            let right = 2 * current + 2;
            if right < self.size && self.weights[right] > self.weights[largest] {
                largest = right;
            }
            if self.weights[largest] > self.weights[current] {
                self.swap_entries(current, largest);
                current = largest;
            } else {
                break;
            }
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.handles.swap(a, b);
        self.sequence_indexes.swap(a, b);
    }

    pub fn size_in_bytes(&self) -> usize {
        self.weights.len() * std::mem::size_of::<f32>()
            + self.handles.len() * std::mem::size_of::<usize>()
            + self.sequence_indexes.len() * std::mem::size_of::<i64>()
            + std::mem::size_of::<DecaySampler>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(sampler: &mut DecaySampler, count: i64) {
        for seq in 0..count {
            if let SamplerDecision::Accepted { .. } = sampler.accept(seq).unwrap() {
                sampler.commit(seq as usize).unwrap();
            }
        }
    }

    fn assert_heap_order(sampler: &DecaySampler) {
        let entries: Vec<SampleEntry> = sampler.entries().collect();
        for i in 0..entries.len() {
            for child in [2 * i + 1, 2 * i + 2] {
                if child < entries.len() {
                    assert!(entries[i].weight >= entries[child].weight);
                }
            }
        }
    }

    #[test]
    fn fills_to_capacity_with_default_accept_fraction() {
        let mut sampler = DecaySampler::new(32, 0.001, 1.0, 7).unwrap();
        fill(&mut sampler, 32);
        assert!(sampler.is_full());
        assert_heap_order(&sampler);
    }

    #[test]
    fn full_sampler_evicts_the_heaviest_entry() {
        let mut sampler = DecaySampler::new(16, 0.01, 1.0, 11).unwrap();
        fill(&mut sampler, 16);
        let mut evictions = 0;
        for seq in 16..2000 {
            match sampler.accept(seq).unwrap() {
                SamplerDecision::Accepted { weight, evicted } => {
                    let evicted = evicted.expect("full sampler must evict");
                    assert!(weight < evicted.weight);
                    let heaviest = sampler
                        .entries()
                        .map(|e| e.weight)
                        .fold(f32::MIN, f32::max);
                    assert_eq!(evicted.weight, heaviest);
                    sampler.commit(seq as usize).unwrap();
                    evictions += 1;
                }
                SamplerDecision::Rejected => {}
            }
            assert_eq!(sampler.size(), 16);
            assert_heap_order(&sampler);
        }
        // with positive decay, recent points keep displacing old ones
        assert!(evictions > 100);
    }

    #[test]
    fn commit_without_accept_is_a_precondition_violation() {
        let mut sampler = DecaySampler::new(4, 0.0, 1.0, 3).unwrap();
        assert!(matches!(
            sampler.commit(0),
            Err(ForestError::PreconditionViolation { .. })
        ));
    }

    #[test]
    fn sequence_regression_is_rejected() {
        let mut sampler = DecaySampler::new(4, 0.0, 1.0, 3).unwrap();
        assert!(matches!(
            sampler.accept(10).unwrap(),
            SamplerDecision::Accepted { .. }
        ));
        sampler.commit(0).unwrap();
        assert!(matches!(
            sampler.accept(5),
            Err(ForestError::InvalidInput { .. })
        ));
    }

    #[test]
    fn decay_change_folds_elapsed_contribution() {
        let mut sampler = DecaySampler::new(8, 0.2, 1.0, 5).unwrap();
        fill(&mut sampler, 11);
        assert_eq!(sampler.sequence_of_decay_change(), 0);
        sampler.set_time_decay(0.5).unwrap();
        assert!((sampler.accumulated_decay() - 10.0 * 0.2).abs() < 1e-12);
        assert_eq!(sampler.sequence_of_decay_change(), 10);
        assert_eq!(sampler.time_decay(), 0.5);
        // a second change folds the new rate from the new origin
        fill_from(&mut sampler, 11, 20);
        sampler.set_time_decay(0.1).unwrap();
        assert!((sampler.accumulated_decay() - (2.0 + 9.0 * 0.5)).abs() < 1e-12);
        assert_eq!(sampler.sequence_of_decay_change(), 19);
    }

    fn fill_from(sampler: &mut DecaySampler, from: i64, to: i64) {
        for seq in from..to {
            match sampler.accept(seq).unwrap() {
                SamplerDecision::Accepted { .. } => sampler.commit(seq as usize).unwrap(),
                SamplerDecision::Rejected => {}
            }
        }
    }

    #[test]
    fn decay_change_matches_a_fresh_sampler_started_at_the_change() {
        // a sampler whose decay is changed at its start behaves exactly like
        // a fresh sampler constructed with the new decay, given the same
        // random draws
        let mut changed = DecaySampler::new(8, 0.3, 1.0, 99).unwrap();
        changed.set_time_decay(0.05).unwrap();
        let mut fresh = DecaySampler::new(8, 0.05, 1.0, 99).unwrap();
        for seq in 0..500 {
            let a = changed.accept(seq).unwrap();
            let b = fresh.accept(seq).unwrap();
            assert_eq!(a, b);
            if let SamplerDecision::Accepted { .. } = a {
                changed.commit(seq as usize).unwrap();
                fresh.commit(seq as usize).unwrap();
            }
        }
    }

    #[test]
    fn zero_decay_keeps_a_uniform_style_reservoir() {
        let mut sampler = DecaySampler::new(64, 0.0, 1.0, 13).unwrap();
        fill(&mut sampler, 10_000);
        assert!(sampler.is_full());
        // with no decay, early sequence indexes survive with fair probability
        let early = sampler
            .entries()
            .filter(|e| e.sequence_index < 5000)
            .count();
        assert!(early > 10);
    }
}
