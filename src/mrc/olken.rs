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

//! Exact stack-distance generator (Olken's algorithm with TTL eviction).

use std::collections::HashMap;

use crate::common::CurveConfig;
use crate::common::MAX_DISTINCT_OBJECTS;
use crate::common::RunningMean;
use crate::error::Error;
use crate::mrc::MissRatioCurve;
use crate::mrc::MrcGenerator;
use crate::stackdist::EvictionIndex;
use crate::stackdist::Histogram;
use crate::stackdist::OrderStatTree;
use crate::trace::Request;
use crate::trace::RequestKind;

/// Exact miss-ratio-curve generator.
///
/// Every get is located in an order-statistic tree over access sequence
/// numbers; the reuse distance of a hit is the number of live keys accessed
/// since the key's previous access (the tree node itself plus everything to
/// its right). TTL-expired keys are removed before each access, so a
/// re-access after expiry counts as a miss.
#[derive(Debug)]
pub struct OlkenMrc {
    config: CurveConfig,
    ttl_aware: bool,
    max_objects: usize,
    tree: OrderStatTree,
    live: HashMap<u64, u64>,
    evictions: EvictionIndex,
    hist_fixed: Histogram,
    hist_avg: Histogram,
    mean_block: RunningMean,
    next_sequence: u64,
    total_requests: u64,
    hits: u64,
    poisoned: bool,
}

impl OlkenMrc {
    pub fn builder() -> OlkenMrcBuilder {
        OlkenMrcBuilder::default()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.total_requests - self.hits
    }

    /// Live keys currently tracked.
    pub fn live_objects(&self) -> usize {
        self.live.len()
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
                // A key may have been LRU-evicted since registration; only
                // keys still in the tree are torn down.
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

    fn record_hit(&mut self, distance: u64) {
        let fixed = self.config.get_fixed_block_bytes() as u64;
        let bucket = self.hist_fixed.bucket_for(distance, fixed);
        self.hist_fixed.record(bucket, 1.0);
        let bucket = self
            .hist_avg
            .bucket_for_scaled(distance as f64, self.mean_block.mean());
        self.hist_avg.record(bucket, 1.0);
        self.hits += 1;
    }
}

impl MrcGenerator for OlkenMrc {
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

        if let Some(&old_sequence) = self.live.get(&request.key_hash) {
            // Hit: distance is the previous node plus everything newer.
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
            self.record_hit(distance);
        } else {
            // Miss: bound memory by shedding the least-recently-used key.
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
            self.hist_fixed.counts(),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0,
        ))
    }

    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error> {
        self.check_not_poisoned()?;
        Ok(MissRatioCurve::from_counts(
            self.hist_avg.counts(),
            self.config.get_bucket_width_bytes(),
            self.total_requests,
            1.0,
        ))
    }
}

/// Builder for [`OlkenMrc`].
#[derive(Debug)]
pub struct OlkenMrcBuilder {
    config: CurveConfig,
    ttl_aware: bool,
    max_objects: usize,
}

impl Default for OlkenMrcBuilder {
    fn default() -> Self {
        Self {
            config: CurveConfig::default(),
            ttl_aware: true,
            max_objects: MAX_DISTINCT_OBJECTS,
        }
    }
}

impl OlkenMrcBuilder {
    pub fn config(mut self, config: CurveConfig) -> Self {
        self.config = config;
        self
    }

    /// Honor per-request expiries; off replays the trace as TTL-free.
    pub fn ttl_aware(mut self, ttl_aware: bool) -> Self {
        self.ttl_aware = ttl_aware;
        self
    }

    /// Cap on simultaneously tracked keys.
    ///
    /// # Panics
    ///
    /// If `max_objects` is zero.
    pub fn max_objects(mut self, max_objects: usize) -> Self {
        assert!(max_objects > 0, "max_objects must be positive");
        self.max_objects = max_objects;
        self
    }

    pub fn build(self) -> OlkenMrc {
        OlkenMrc {
            hist_fixed: Histogram::new(&self.config),
            hist_avg: Histogram::new(&self.config),
            config: self.config,
            ttl_aware: self.ttl_aware,
            max_objects: self.max_objects,
            tree: OrderStatTree::new(),
            live: HashMap::new(),
            evictions: EvictionIndex::new(),
            mean_block: RunningMean::default(),
            next_sequence: 0,
            total_requests: 0,
            hits: 0,
            poisoned: false,
        }
    }
}
