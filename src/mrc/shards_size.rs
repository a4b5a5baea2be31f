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

//! Fixed-size SHARDS: bounded-sample reuse-distance estimation.
//!
//! The sample never exceeds `S_max` keys. When admission would overflow,
//! the key occupying the least promising spatial position (largest
//! `hash mod P`) is shed and the sampling threshold `T` shrinks to that
//! position, which retroactively re-weights everything credited under the
//! old threshold. Sample entries live in a slab addressed by stable
//! integer handles; both priority queues hold handles plus a generation
//! stamp, so stale queue entries are skipped instead of chased through
//! back-references.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use crate::common::CurveConfig;
use crate::common::RunningMean;
use crate::error::Error;
use crate::mrc::MissRatioCurve;
use crate::mrc::MrcGenerator;
use crate::mrc::SAMPLING_MODULUS;
use crate::stackdist::OrderStatTree;
use crate::stackdist::ScaledHistogram;
use crate::trace::Request;
use crate::trace::RequestKind;

#[derive(Debug, Clone)]
struct SampleSlot {
    key_hash: u64,
    generation: u32,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
struct LiveKey {
    sequence: u64,
    slot: u32,
}

/// Bounded-sample SHARDS generator.
#[derive(Debug)]
pub struct ShardsFixedSizeMrc {
    config: CurveConfig,
    ttl_aware: bool,
    sample_cap: usize,
    threshold: u32,
    tree: OrderStatTree,
    live: HashMap<u64, LiveKey>,
    slots: Vec<SampleSlot>,
    free: Vec<u32>,
    /// Min-heap on `P - spatial`: the top is the least promising sample.
    sample_pq: BinaryHeap<Reverse<(u32, u32, u32)>>,
    /// Min-heap on expiry, paired to the same slots.
    evict_pq: BinaryHeap<Reverse<(u32, u32, u32)>>,
    hist_fixed: ScaledHistogram,
    hist_avg: ScaledHistogram,
    mean_block: RunningMean,
    next_sequence: u64,
    total_requests: u64,
    threshold_shrinks: u64,
    poisoned: bool,
}

impl ShardsFixedSizeMrc {
    pub fn builder() -> ShardsFixedSizeMrcBuilder {
        ShardsFixedSizeMrcBuilder::default()
    }

    /// Current effective sampling rate `T / P`.
    pub fn sampling_rate(&self) -> f64 {
        self.threshold as f64 / SAMPLING_MODULUS as f64
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn sample_size(&self) -> usize {
        self.live.len()
    }

    /// How many times the threshold has been tightened.
    pub fn threshold_shrinks(&self) -> u64 {
        self.threshold_shrinks
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

    fn slot_is_current(&self, slot: u32, generation: u32) -> bool {
        let s = &self.slots[slot as usize];
        s.alive && s.generation == generation
    }

    fn alloc_slot(&mut self, key_hash: u64) -> (u32, u32) {
        if let Some(slot) = self.free.pop() {
            let s = &mut self.slots[slot as usize];
            s.key_hash = key_hash;
            s.generation = s.generation.wrapping_add(1);
            s.alive = true;
            (slot, s.generation)
        } else {
            self.slots.push(SampleSlot {
                key_hash,
                generation: 0,
                alive: true,
            });
            ((self.slots.len() - 1) as u32, 0)
        }
    }

    fn teardown_slot(&mut self, slot: u32) {
        let (key_hash, was_alive) = {
            let s = &mut self.slots[slot as usize];
            let alive = s.alive;
            s.alive = false;
            (s.key_hash, alive)
        };
        if !was_alive {
            return;
        }
        self.free.push(slot);
        if let Some(entry) = self.live.remove(&key_hash) {
            self.tree.remove(entry.sequence);
        }
    }

    fn evict_due(&mut self, now: u32) {
        while let Some(&Reverse((expiry, slot, generation))) = self.evict_pq.peek() {
            if expiry > now {
                break;
            }
            self.evict_pq.pop();
            if self.slot_is_current(slot, generation) {
                self.teardown_slot(slot);
            }
        }
    }

    /// Shed the least promising sample entries and tighten the threshold.
    fn shrink_threshold(&mut self) {
        // Find the worst live entry, discarding stale queue records.
        let worst_priority = loop {
            match self.sample_pq.pop() {
                Some(Reverse((priority, slot, generation))) => {
                    if self.slot_is_current(slot, generation) {
                        self.teardown_slot(slot);
                        break priority;
                    }
                }
                None => return,
            }
        };
        // Discharge every tie in the same pass.
        while let Some(&Reverse((priority, slot, generation))) = self.sample_pq.peek() {
            if priority != worst_priority {
                break;
            }
            self.sample_pq.pop();
            if self.slot_is_current(slot, generation) {
                self.teardown_slot(slot);
            }
        }
        let new_threshold = SAMPLING_MODULUS - worst_priority;
        tracing::debug!(
            old = self.threshold,
            new = new_threshold,
            sample = self.live.len(),
            "tightening fixed-size sampling threshold"
        );
        self.threshold = new_threshold;
        self.threshold_shrinks += 1;
    }
}

impl MrcGenerator for ShardsFixedSizeMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        self.check_not_poisoned()?;
        if request.kind != RequestKind::Get {
            return Ok(());
        }
        self.total_requests += 1;
        self.mean_block.observe(request.block_size(&self.config) as f64);

        if self.ttl_aware {
            self.evict_due(request.timestamp);
        }

        let spatial = (request.key_hash & (SAMPLING_MODULUS as u64 - 1)) as u32;
        if spatial >= self.threshold {
            return Ok(());
        }

        if let Some(&LiveKey { sequence, slot }) = self.live.get(&request.key_hash) {
            let distance = match self.tree.rank_from(sequence) {
                Some(distance) if distance >= 1 => distance,
                _ => {
                    self.poisoned = true;
                    return Err(Error::contract(format!(
                        "zero stack distance for live key {:#x}",
                        request.key_hash
                    )));
                }
            };
            self.tree.remove(sequence);
            self.next_sequence += 1;
            let sequence = self.next_sequence;
            self.tree.insert(sequence, request.key_hash);
            self.live.insert(request.key_hash, LiveKey { sequence, slot });

            let scaled = distance as f64 / self.sampling_rate();
            let fixed = self.config.get_fixed_block_bytes() as f64;
            let bucket = self.hist_fixed.bucket_for_scaled(scaled, fixed);
            self.hist_fixed.credit(bucket, 1.0, self.threshold);
            let bucket = self
                .hist_avg
                .bucket_for_scaled(scaled, self.mean_block.mean());
            self.hist_avg.credit(bucket, 1.0, self.threshold);
        } else {
            let (slot, generation) = self.alloc_slot(request.key_hash);
            self.sample_pq
                .push(Reverse((SAMPLING_MODULUS - spatial, slot, generation)));
            if self.ttl_aware {
                self.evict_pq
                    .push(Reverse((request.eviction_time, slot, generation)));
            }
            self.next_sequence += 1;
            let sequence = self.next_sequence;
            self.tree.insert(sequence, request.key_hash);
            self.live.insert(request.key_hash, LiveKey { sequence, slot });

            if self.live.len() > self.sample_cap {
                self.shrink_threshold();
            }
        }
        Ok(())
    }

    fn curve_fixed_block(&mut self) -> Result<MissRatioCurve, Error> {
        self.check_not_poisoned()?;
        Ok(MissRatioCurve::from_counts(
            &self.hist_fixed.finalize(self.threshold),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0 / self.sampling_rate(),
        ))
    }

    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error> {
        self.check_not_poisoned()?;
        Ok(MissRatioCurve::from_counts(
            &self.hist_avg.finalize(self.threshold),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0 / self.sampling_rate(),
        ))
    }
}

/// Builder for [`ShardsFixedSizeMrc`].
#[derive(Debug)]
pub struct ShardsFixedSizeMrcBuilder {
    config: CurveConfig,
    ttl_aware: bool,
    sample_cap: usize,
    initial_rate: f64,
}

impl Default for ShardsFixedSizeMrcBuilder {
    fn default() -> Self {
        Self {
            config: CurveConfig::default(),
            ttl_aware: true,
            sample_cap: 8192,
            initial_rate: 1.0,
        }
    }
}

impl ShardsFixedSizeMrcBuilder {
    pub fn config(mut self, config: CurveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ttl_aware(mut self, ttl_aware: bool) -> Self {
        self.ttl_aware = ttl_aware;
        self
    }

    /// Maximum number of simultaneously sampled keys `S_max`.
    ///
    /// # Panics
    ///
    /// If the cap is zero.
    pub fn sample_cap(mut self, sample_cap: usize) -> Self {
        assert!(sample_cap > 0, "sample_cap must be positive");
        self.sample_cap = sample_cap;
        self
    }

    /// Starting sampling rate; the threshold only shrinks from here.
    ///
    /// # Panics
    ///
    /// If the rate is outside `(0, 1]` or rounds to an empty spatial slice.
    pub fn initial_rate(mut self, rate: f64) -> Self {
        assert!(
            rate > 0.0 && rate <= 1.0,
            "initial_rate must be in (0, 1], got {rate}"
        );
        assert!(
            (rate * SAMPLING_MODULUS as f64).round() >= 1.0,
            "initial_rate {rate} rounds to an empty sample"
        );
        self.initial_rate = rate;
        self
    }

    pub fn build(self) -> ShardsFixedSizeMrc {
        let threshold = (self.initial_rate * SAMPLING_MODULUS as f64).round() as u32;
        ShardsFixedSizeMrc {
            hist_fixed: ScaledHistogram::new(&self.config, threshold),
            hist_avg: ScaledHistogram::new(&self.config, threshold),
            config: self.config,
            ttl_aware: self.ttl_aware,
            sample_cap: self.sample_cap,
            threshold,
            tree: OrderStatTree::new(),
            live: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            sample_pq: BinaryHeap::new(),
            evict_pq: BinaryHeap::new(),
            mean_block: RunningMean::default(),
            next_sequence: 0,
            total_requests: 0,
            threshold_shrinks: 0,
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

    #[test]
    fn test_under_cap_matches_exact() {
        // Small key space, generous cap: no shrink happens and the curve
        // equals the exact generator's.
        let mut shards = ShardsFixedSizeMrc::builder()
            .config(config())
            .sample_cap(1000)
            .build();
        let mut olken = crate::mrc::OlkenMrc::builder().config(config()).build();
        for i in 0u64..5000 {
            let request =
                Request::get(i as u32, scramble_u64(i % 300, 0), 4096, u32::MAX);
            shards.add_request(&request).unwrap();
            olken.add_request(&request).unwrap();
        }
        assert_eq!(shards.threshold_shrinks(), 0);
        assert_eq!(shards.sampling_rate(), 1.0);
        assert_eq!(
            shards.curve_fixed_block().unwrap(),
            olken.curve_fixed_block().unwrap()
        );
    }

    #[test]
    fn test_cap_is_enforced() {
        let cap = 64;
        let mut shards = ShardsFixedSizeMrc::builder()
            .config(config())
            .sample_cap(cap)
            .build();
        for i in 0u64..50_000 {
            let request = Request::get(i as u32, scramble_u64(i, 0), 4096, u32::MAX);
            shards.add_request(&request).unwrap();
            assert!(shards.sample_size() <= cap);
        }
        assert!(shards.threshold_shrinks() > 0);
        assert!(shards.sampling_rate() < 1.0);
    }

    #[test]
    fn test_shrunk_threshold_rejects_new_tail_keys() {
        let cap = 32;
        let mut shards = ShardsFixedSizeMrc::builder()
            .config(config())
            .sample_cap(cap)
            .build();
        for i in 0u64..10_000 {
            let request = Request::get(i as u32, scramble_u64(i, 0), 4096, u32::MAX);
            shards.add_request(&request).unwrap();
        }
        let threshold = shards.threshold;
        // Every tracked key sits strictly inside the tightened slice.
        for slot in shards.slots.iter().filter(|s| s.alive) {
            let spatial = (slot.key_hash & (SAMPLING_MODULUS as u64 - 1)) as u32;
            assert!(spatial < threshold);
        }
    }

    #[test]
    fn test_ttl_eviction_frees_sample_space() {
        let mut shards = ShardsFixedSizeMrc::builder()
            .config(config())
            .sample_cap(1000)
            .build();
        for key in 0u64..100 {
            shards
                .add_request(&Request::get(0, scramble_u64(key, 0), 4096, 10))
                .unwrap();
        }
        assert_eq!(shards.sample_size(), 100);
        // All expire at t=10; the next access tears them down.
        shards
            .add_request(&Request::get(20, scramble_u64(500, 0), 4096, u32::MAX))
            .unwrap();
        assert_eq!(shards.sample_size(), 1);
        assert_eq!(shards.threshold_shrinks(), 0);
    }
}
