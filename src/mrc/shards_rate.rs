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

//! Fixed-rate spatially hashed reuse-distance sampling.

use std::collections::HashMap;

use crate::common::CurveConfig;
use crate::common::MAX_DISTINCT_OBJECTS;
use crate::common::RunningMean;
use crate::error::Error;
use crate::mrc::MissRatioCurve;
use crate::mrc::MrcGenerator;
use crate::mrc::SAMPLING_MODULUS;
use crate::stackdist::EvictionIndex;
use crate::stackdist::Histogram;
use crate::stackdist::OrderStatTree;
use crate::trace::Request;
use crate::trace::RequestKind;

/// Fixed-rate SHARDS generator.
///
/// A key participates when `hash mod P < T` with `T = round(R * P)`, so the
/// sampled key space is a fixed spatial slice: every access to a sampled
/// key is seen, and a sampled hit at reuse distance `d` stands for a hit at
/// distance `d / R` in the full stream. Histogram counts stay in sampled
/// units; the curve builder divides them back out by `R`.
#[derive(Debug)]
pub struct ShardsFixedRateMrc {
    config: CurveConfig,
    ttl_aware: bool,
    adjusted: bool,
    rate: f64,
    threshold: u32,
    max_objects: usize,
    tree: OrderStatTree,
    live: HashMap<u64, u64>,
    evictions: EvictionIndex,
    hist_fixed: Histogram,
    hist_avg: Histogram,
    mean_block: RunningMean,
    next_sequence: u64,
    total_requests: u64,
    sampled_requests: u64,
    sampled_hits: u64,
    poisoned: bool,
}

impl ShardsFixedRateMrc {
    pub fn builder() -> ShardsFixedRateMrcBuilder {
        ShardsFixedRateMrcBuilder::default()
    }

    pub fn sampling_rate(&self) -> f64 {
        self.rate
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn sampled_requests(&self) -> u64 {
        self.sampled_requests
    }

    /// Hits observed within the sampled key space.
    pub fn sampled_hits(&self) -> u64 {
        self.sampled_hits
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

    fn evict_due(&mut self, now: u32) -> Result<(), Error> {
        while let Some((expiry, keys)) = self.evictions.pop_due(now) {
            for key in keys {
                if let Some(sequence) = self.live.remove(&key) {
                    if self.tree.remove(sequence).is_none() {
                        self.poisoned = true;
                        return Err(Error::contract(format!(
                            "key map and tree disagree on sequence {sequence}"
                        ))
                        .with_context("expiry", expiry));
                    }
                }
            }
        }
        Ok(())
    }

    /// Histogram counts with the adjusted-mode correction applied.
    fn corrected_counts(&self, counts: &[f64]) -> Vec<f64> {
        let mut counts = counts.to_vec();
        if self.adjusted && counts.len() > 1 {
            // Redistribute the drift between the expected and the observed
            // sampled volume into the first bucket.
            let expected = self.rate * self.total_requests as f64;
            counts[1] += expected - self.sampled_requests as f64;
        }
        counts
    }
}

impl MrcGenerator for ShardsFixedRateMrc {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        self.check_not_poisoned()?;
        if request.kind != RequestKind::Get {
            return Ok(());
        }
        self.total_requests += 1;
        self.mean_block.observe(request.block_size(&self.config) as f64);

        if self.ttl_aware {
            self.evict_due(request.timestamp)?;
        }

        let spatial = (request.key_hash & (SAMPLING_MODULUS as u64 - 1)) as u32;
        if spatial >= self.threshold {
            return Ok(());
        }
        self.sampled_requests += 1;

        if let Some(&old_sequence) = self.live.get(&request.key_hash) {
            let distance = match self.tree.rank_from(old_sequence) {
                Some(distance) if distance >= 1 => distance,
                _ => {
                    self.poisoned = true;
                    return Err(Error::contract(format!(
                        "zero stack distance for live key {:#x}",
                        request.key_hash
                    )));
                }
            };
            self.tree.remove(old_sequence);
            self.next_sequence += 1;
            let sequence = self.next_sequence;
            self.tree.insert(sequence, request.key_hash);
            self.live.insert(request.key_hash, sequence);

            // Scale the distance up to full-stream units.
            let scaled = distance as f64 / self.rate;
            let fixed = self.config.get_fixed_block_bytes() as f64;
            let bucket = self.hist_fixed.bucket_for_scaled(scaled, fixed);
            self.hist_fixed.record(bucket, 1.0);
            let bucket = self.hist_avg.bucket_for_scaled(scaled, self.mean_block.mean());
            self.hist_avg.record(bucket, 1.0);
            self.sampled_hits += 1;
        } else {
            if self.live.len() >= self.max_objects {
                if let Some((_, lru_key)) = self.tree.pop_min() {
                    self.live.remove(&lru_key);
                }
            }
            self.next_sequence += 1;
            let sequence = self.next_sequence;
            self.tree.insert(sequence, request.key_hash);
            self.live.insert(request.key_hash, sequence);
            if self.ttl_aware {
                self.evictions.register(request.key_hash, request.eviction_time);
            }
        }
        Ok(())
    }

    fn curve_fixed_block(&mut self) -> Result<MissRatioCurve, Error> {
        self.check_not_poisoned()?;
        Ok(MissRatioCurve::from_counts(
            &self.corrected_counts(self.hist_fixed.counts()),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0 / self.rate,
        ))
    }

    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error> {
        self.check_not_poisoned()?;
        Ok(MissRatioCurve::from_counts(
            &self.corrected_counts(self.hist_avg.counts()),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0 / self.rate,
        ))
    }
}

/// Builder for [`ShardsFixedRateMrc`].
#[derive(Debug)]
pub struct ShardsFixedRateMrcBuilder {
    config: CurveConfig,
    ttl_aware: bool,
    adjusted: bool,
    rate: f64,
    max_objects: usize,
}

impl Default for ShardsFixedRateMrcBuilder {
    fn default() -> Self {
        Self {
            config: CurveConfig::default(),
            ttl_aware: true,
            adjusted: true,
            rate: 0.01,
            max_objects: MAX_DISTINCT_OBJECTS,
        }
    }
}

impl ShardsFixedRateMrcBuilder {
    pub fn config(mut self, config: CurveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ttl_aware(mut self, ttl_aware: bool) -> Self {
        self.ttl_aware = ttl_aware;
        self
    }

    /// Redistribute sampled-volume drift into the first bucket when the
    /// curve is read out.
    pub fn adjusted(mut self, adjusted: bool) -> Self {
        self.adjusted = adjusted;
        self
    }

    /// Spatial sampling rate `R`.
    ///
    /// # Panics
    ///
    /// If the rate is outside `(0, 1]` or rounds to an empty spatial slice.
    pub fn sampling_rate(mut self, rate: f64) -> Self {
        assert!(
            rate > 0.0 && rate <= 1.0,
            "sampling_rate must be in (0, 1], got {rate}"
        );
        assert!(
            (rate * SAMPLING_MODULUS as f64).round() >= 1.0,
            "sampling_rate {rate} rounds to an empty sample"
        );
        self.rate = rate;
        self
    }

    pub fn max_objects(mut self, max_objects: usize) -> Self {
        assert!(max_objects > 0, "max_objects must be positive");
        self.max_objects = max_objects;
        self
    }

    pub fn build(self) -> ShardsFixedRateMrc {
        let threshold = (self.rate * SAMPLING_MODULUS as f64).round() as u32;
        ShardsFixedRateMrc {
            hist_fixed: Histogram::new(&self.config),
            hist_avg: Histogram::new(&self.config),
            config: self.config,
            ttl_aware: self.ttl_aware,
            adjusted: self.adjusted,
            rate: self.rate,
            threshold,
            max_objects: self.max_objects,
            tree: OrderStatTree::new(),
            live: HashMap::new(),
            evictions: EvictionIndex::new(),
            mean_block: RunningMean::default(),
            next_sequence: 0,
            total_requests: 0,
            sampled_requests: 0,
            sampled_hits: 0,
            poisoned: false,
        }
    }
}
