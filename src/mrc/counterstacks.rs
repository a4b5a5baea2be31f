// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! CounterStacks-style approximate MRC over a bank of TTL-HLL counters.
//!
//! Counter `j` estimates the cardinality of the union of all accesses since
//! epoch `j`. At every processing trigger the epoch's fresh counter is
//! merged into each live counter (data-disjoint, optionally fanned out
//! over a rayon pool), the per-column deltas between this trigger and the
//! previous one yield per-row hit counts, and near-duplicate counters are
//! pruned so the bank stays bounded.

use rayon::prelude::*;

use crate::common::CurveConfig;
use crate::common::Fidelity;
use crate::common::RunningMean;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::mrc::MissRatioCurve;
use crate::mrc::MrcGenerator;
use crate::stackdist::EpochIndex;
use crate::stackdist::Histogram;
use crate::trace::Request;
use crate::trace::RequestKind;
use crate::ttlhll::TtlHllSketch;

/// Floor of the request-count trigger interval.
const DOWNSAMPLE_MIN: u64 = 10_000;
/// Ceiling of the request-count trigger interval.
const DOWNSAMPLE_MAX: u64 = 1_000_000;

#[derive(Debug)]
struct Counter {
    sketch: TtlHllSketch,
    /// Column value at the previous trigger.
    prev: f64,
    /// Column value at the current trigger.
    cur: f64,
}

/// Approximate miss-ratio-curve generator.
#[derive(Debug)]
pub struct CounterStacksMrc {
    config: CurveConfig,
    fidelity: Fidelity,
    precision: u8,
    capacity: usize,
    /// Live counters, oldest first.
    counters: Vec<Counter>,
    /// The always-accumulating counter for the current epoch.
    fresh: TtlHllSketch,
    /// Recycled sketches from pruned slots.
    spares: Vec<TtlHllSketch>,
    pool: Option<rayon::ThreadPool>,
    epochs: EpochIndex,
    hist_fixed: Histogram,
    hist_avg: Histogram,
    mean_block: RunningMean,
    downsample: u64,
    requests_since_trigger: u64,
    last_trigger_time: u32,
    started: bool,
    last_timestamp: u32,
    trigger_sn: u64,
    total_requests: u64,
    poisoned: bool,
}

impl CounterStacksMrc {
    pub fn builder() -> CounterStacksMrcBuilder {
        CounterStacksMrcBuilder::default()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Number of live counters in the bank.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Current per-counter column values, oldest first.
    pub fn counter_columns(&self) -> Vec<f64> {
        self.counters.iter().map(|c| c.cur).collect()
    }

    /// How many processing triggers have fired.
    pub fn triggers(&self) -> u64 {
        self.trigger_sn
    }

    /// Current request-count trigger interval.
    pub fn downsample(&self) -> u64 {
        self.downsample
    }

    /// Serialize every TTL-HLL in the bank (live counters oldest first,
    /// then the fresh counter), for checkpointing.
    pub fn snapshot_counters(&self) -> Vec<Vec<u8>> {
        let mut snapshots: Vec<Vec<u8>> = self
            .counters
            .iter()
            .map(|c| c.sketch.serialize_dynamic())
            .collect();
        snapshots.push(self.fresh.serialize_dynamic());
        snapshots
    }

    /// Replace the bank's sketches with deserialized snapshots, in the
    /// order [`snapshot_counters`](Self::snapshot_counters) produced them.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the snapshot count or a precision differs;
    /// `MalformedDeserializeData` if any payload is corrupt.
    pub fn restore_counters(&mut self, snapshots: &[Vec<u8>]) -> Result<(), Error> {
        if snapshots.len() != self.counters.len() + 1 {
            return Err(Error::invalid_argument(format!(
                "expected {} snapshots, got {}",
                self.counters.len() + 1,
                snapshots.len()
            )));
        }
        let mut restored = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let sketch = TtlHllSketch::deserialize(snapshot)?;
            if sketch.precision() != self.precision {
                return Err(Error::invalid_argument(format!(
                    "snapshot precision {} does not match bank precision {}",
                    sketch.precision(),
                    self.precision
                )));
            }
            restored.push(sketch);
        }
        let fresh = restored.pop().expect("snapshot list is non-empty");
        for (counter, sketch) in self.counters.iter_mut().zip(restored) {
            counter.sketch = sketch;
        }
        self.fresh = fresh;
        Ok(())
    }

    fn check_not_poisoned(&self) -> Result<(), Error> {
        if self.poisoned {
            Err(Error::contract(
                "estimator reported a contract violation earlier; results are invalid",
            ))
        } else {
            Ok(())
        }
    }

    /// Run one stack-processing pass at trace time `now`.
    pub fn process_stack(&mut self, now: u32) -> Result<(), Error> {
        self.check_not_poisoned()?;
        self.epochs.clear_due(now);

        let count_before = self.fresh.count();
        let count_after = self.fresh.evict_expired_and_count(now);
        tracing::trace!(
            count_before,
            count_after,
            counters = self.counters.len(),
            "processing counter stack"
        );

        self.trigger_sn += 1;
        let merge_sn = self.trigger_sn;

        // Fan the fresh counter into every live counter. Sinks are
        // disjoint, the shared source is read-only.
        {
            let fresh = &self.fresh;
            let merge = |counter: &mut Counter| -> Result<(), Error> {
                let _ = counter.sketch.evict_expired_and_count(now);
                counter.cur = counter.sketch.merge_count(fresh, merge_sn, false)?;
                Ok(())
            };
            let outcome = match &self.pool {
                Some(pool) => {
                    pool.install(|| self.counters.par_iter_mut().try_for_each(merge))
                }
                None => self.counters.iter_mut().try_for_each(merge),
            };
            if let Err(error) = outcome {
                self.poisoned = true;
                return Err(error);
            }
        }

        // Column deltas against the previous trigger give per-row hits;
        // row j is bounded above by the cardinality of window j.
        let fixed = self.config.get_fixed_block_bytes() as f64;
        let mean = self.mean_block.mean();
        for j in 0..self.counters.len() {
            let (next_cur, next_prev) = if j + 1 < self.counters.len() {
                (self.counters[j + 1].cur, self.counters[j + 1].prev)
            } else {
                (count_after, 0.0)
            };
            let hits =
                (next_cur - next_prev) - (self.counters[j].cur - self.counters[j].prev);
            if hits != 0.0 {
                let max_distance = self.counters[j].cur;
                let bucket = self.hist_fixed.bucket_for_scaled(max_distance, fixed);
                self.hist_fixed.record(bucket, hits);
                let bucket = self.hist_avg.bucket_for_scaled(max_distance, mean);
                self.hist_avg.record(bucket, hits);
            }
        }

        // Promote the fresh counter; a recycled sketch takes its place.
        let replacement = self
            .spares
            .pop()
            .unwrap_or_else(|| TtlHllSketch::new(self.precision));
        let promoted = std::mem::replace(&mut self.fresh, replacement);
        self.counters.push(Counter {
            sketch: promoted,
            prev: 0.0,
            cur: count_after,
        });

        // Regular pruning, then closest-pair pruning if the bank is full.
        self.prune(self.fidelity.delta());
        if self.counters.len() >= self.capacity {
            let mut min_gap = f64::INFINITY;
            for k in 1..self.counters.len() {
                let previous = self.counters[k - 1].cur;
                let gap = if previous > 0.0 {
                    1.0 - self.counters[k].cur / previous
                } else {
                    0.0
                };
                min_gap = min_gap.min(gap.max(0.0));
            }
            let removed = self.prune(min_gap + 1e-9);
            if removed == 0 && self.counters.len() >= self.capacity {
                self.poisoned = true;
                return Err(Error::new(
                    ErrorKind::CapacityExceeded,
                    format!(
                        "counter bank is full at {} and closest-pair pruning freed nothing",
                        self.capacity
                    ),
                ));
            }
        }

        for counter in &mut self.counters {
            counter.prev = counter.cur;
        }

        if let Some(oldest) = self.counters.first() {
            self.downsample =
                (oldest.cur as u64).clamp(DOWNSAMPLE_MIN, DOWNSAMPLE_MAX);
        }
        self.requests_since_trigger = 0;
        self.last_trigger_time = now;
        Ok(())
    }

    /// Drop counters whose column is within `delta` of the last kept one.
    fn prune(&mut self, delta: f64) -> usize {
        let mut kept: Vec<Counter> = Vec::with_capacity(self.counters.len());
        let mut removed = 0usize;
        for counter in self.counters.drain(..) {
            let redundant = match kept.last() {
                Some(last) => counter.cur >= (1.0 - delta) * last.cur,
                None => false,
            };
            if redundant {
                let mut sketch = counter.sketch;
                sketch.reset();
                self.spares.push(sketch);
                removed += 1;
            } else {
                kept.push(counter);
            }
        }
        if removed > 0 {
            tracing::debug!(removed, kept = kept.len(), delta, "pruned counter bank");
        }
        self.counters = kept;
        removed
    }

    fn trigger_due(&self, now: u32) -> bool {
        self.requests_since_trigger >= self.downsample
            || now.saturating_sub(self.last_trigger_time) >= self.fidelity.period_seconds()
            || self.epochs.has_due(now)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.check_not_poisoned()?;
        if self.requests_since_trigger > 0 {
            self.process_stack(self.last_timestamp)?;
        }
        Ok(())
    }
}

impl MrcGenerator for CounterStacksMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        self.check_not_poisoned()?;
        if request.kind != RequestKind::Get {
            return Ok(());
        }
        self.total_requests += 1;
        self.mean_block.observe(request.block_size(&self.config) as f64);
        self.last_timestamp = request.timestamp;
        if !self.started {
            self.started = true;
            self.last_trigger_time = request.timestamp;
        }

        self.fresh.add(request.key_hash, request.eviction_time);
        self.epochs.register(request.eviction_time);
        self.requests_since_trigger += 1;

        if self.trigger_due(request.timestamp) {
            self.process_stack(request.timestamp)?;
        }
        Ok(())
    }

    fn curve_fixed_block(&mut self) -> Result<MissRatioCurve, Error> {
        self.flush()?;
        Ok(MissRatioCurve::from_counts(
            self.hist_fixed.counts(),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0,
        ))
    }

    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error> {
        self.flush()?;
        Ok(MissRatioCurve::from_counts(
            self.hist_avg.counts(),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0,
        ))
    }
}

/// Builder for [`CounterStacksMrc`].
#[derive(Debug)]
pub struct CounterStacksMrcBuilder {
    config: CurveConfig,
    fidelity: Fidelity,
    precision: u8,
    capacity: usize,
    parallelism: usize,
    epoch_cap: usize,
}

impl Default for CounterStacksMrcBuilder {
    fn default() -> Self {
        Self {
            config: CurveConfig::default(),
            fidelity: Fidelity::HiFi,
            precision: 12,
            capacity: 64,
            parallelism: 1,
            epoch_cap: EpochIndex::DEFAULT_CAP,
        }
    }
}

impl CounterStacksMrcBuilder {
    pub fn config(mut self, config: CurveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fidelity(mut self, fidelity: Fidelity) -> Self {
        self.fidelity = fidelity;
        self
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    /// Maximum number of live counters.
    ///
    /// # Panics
    ///
    /// If the capacity is below 2.
    pub fn counter_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity >= 2, "counter_capacity must be at least 2");
        self.capacity = capacity;
        self
    }

    /// Worker threads for the merge fan-out; 0 or 1 runs inline.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Cap on distinct pending expiry epochs.
    pub fn epoch_cap(mut self, epoch_cap: usize) -> Self {
        assert!(epoch_cap > 0, "epoch_cap must be positive");
        self.epoch_cap = epoch_cap;
        self
    }

    pub fn build(self) -> CounterStacksMrc {
        let pool = if self.parallelism > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.parallelism)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(error) => {
                    tracing::warn!(%error, "merge pool unavailable, merging inline");
                    None
                }
            }
        } else {
            None
        };
        CounterStacksMrc {
            hist_fixed: Histogram::new(&self.config),
            hist_avg: Histogram::new(&self.config),
            epochs: EpochIndex::new(
                self.fidelity.eviction_rounding_seconds(),
                self.epoch_cap,
            ),
            fresh: TtlHllSketch::new(self.precision),
            config: self.config,
            fidelity: self.fidelity,
            precision: self.precision,
            capacity: self.capacity,
            counters: Vec::new(),
            spares: Vec::new(),
            pool,
            mean_block: RunningMean::default(),
            downsample: DOWNSAMPLE_MIN,
            requests_since_trigger: 0,
            last_trigger_time: 0,
            started: false,
            last_timestamp: 0,
            trigger_sn: 0,
            total_requests: 0,
            poisoned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::scramble_u64;

    fn config() -> CurveConfig {
        CurveConfig::default()
            .bucket_width_bytes(4096)
            .max_cache_bytes(1 << 24)
            .fixed_block_bytes(4096)
    }

    fn builder() -> CounterStacksMrcBuilder {
        CounterStacksMrc::builder()
            .config(config())
            .precision(10)
            .counter_capacity(16)
    }

    #[test]
    fn test_columns_are_ordered() {
        let mut stacks = builder().build();
        for i in 0u64..5000 {
            let request =
                Request::get(i as u32 / 10, scramble_u64(i % 800, 0), 4096, u32::MAX);
            stacks.add_request(&request).unwrap();
        }
        stacks.process_stack(1000).unwrap();
        let columns = stacks.counter_columns();
        assert!(!columns.is_empty());
        // Wider (older) windows dominate narrower ones.
        for pair in columns.windows(2) {
            assert!(pair[0] >= pair[1] - 1e-9, "columns out of order: {columns:?}");
        }
    }

    #[test]
    fn test_ttl_expiry_fires_trigger() {
        // LoFi: the period trigger is an hour away, so only the expiry
        // epoch can fire.
        let mut stacks = builder().fidelity(Fidelity::LoFi).build();
        // Keys expiring at t=40 (rounded up to 60 by LoFi's quantum).
        for key in 0u64..50 {
            stacks
                .add_request(&Request::get(0, scramble_u64(key, 0), 4096, 40))
                .unwrap();
        }
        assert_eq!(stacks.triggers(), 0);
        stacks
            .add_request(&Request::get(70, scramble_u64(999, 0), 4096, u32::MAX))
            .unwrap();
        assert_eq!(stacks.triggers(), 1);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut stacks = builder().counter_capacity(4).build();
        // Distinct keys in every epoch force growth; pruning must keep the
        // bank under its cap.
        for epoch in 0u32..40 {
            for key in 0u64..200 {
                let request = Request::get(
                    epoch * 100,
                    scramble_u64(epoch as u64 * 1_000_003 + key, 0),
                    4096,
                    u32::MAX,
                );
                stacks.add_request(&request).unwrap();
            }
            stacks.process_stack(epoch * 100).unwrap();
            assert!(stacks.counter_count() <= 4);
        }
    }

    #[test]
    fn test_downsample_clamps_on_small_traces() {
        let mut stacks = builder().build();
        for key in 0u64..100 {
            stacks
                .add_request(&Request::get(0, scramble_u64(key, 0), 4096, u32::MAX))
                .unwrap();
        }
        stacks.process_stack(10).unwrap();
        assert_eq!(stacks.downsample(), DOWNSAMPLE_MIN);
    }

    #[test]
    fn test_snapshot_restore_preserves_curve() {
        let feed = |s: &mut CounterStacksMrc, epochs: std::ops::Range<u32>| {
            for epoch in epochs {
                for key in 0u64..500 {
                    let request = Request::get(
                        epoch * 100,
                        scramble_u64(key % (300 + epoch as u64 * 100), 0),
                        4096,
                        u32::MAX,
                    );
                    s.add_request(&request).unwrap();
                }
                s.process_stack(epoch * 100).unwrap();
            }
        };
        let mut stacks = builder().build();
        let mut reference = builder().build();
        feed(&mut stacks, 0..3);
        feed(&mut reference, 0..3);

        // Round-trip every counter, then keep streaming: the restored
        // sketches must merge and count exactly like the originals.
        let snapshots = stacks.snapshot_counters();
        stacks.restore_counters(&snapshots).unwrap();
        feed(&mut stacks, 3..5);
        feed(&mut reference, 3..5);

        let restored_curve = stacks.curve_fixed_block().unwrap();
        let reference_curve = reference.curve_fixed_block().unwrap();
        assert_eq!(restored_curve.to_csv(), reference_curve.to_csv());
    }

    #[test]
    fn test_parallel_and_inline_merges_agree() {
        let mut inline = builder().parallelism(1).build();
        let mut parallel = builder().parallelism(4).build();
        for s in [&mut inline, &mut parallel] {
            for i in 0u64..20_000 {
                let request =
                    Request::get(i as u32 / 100, scramble_u64(i % 3000, 0), 4096, u32::MAX);
                s.add_request(&request).unwrap();
            }
        }
        assert_eq!(
            inline.curve_fixed_block().unwrap(),
            parallel.curve_fixed_block().unwrap()
        );
    }
}
