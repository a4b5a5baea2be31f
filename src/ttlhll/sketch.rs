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

use std::collections::HashMap;
use std::hash::Hash;

use crate::common::MAX_PRECISION;
use crate::common::MIN_PRECISION;
use crate::error::Error;
use crate::hash::hash_item;
use crate::hll::estimate;
use crate::hll::max_rank;
use crate::hll::rank_of;
use crate::hll::register_index;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Store {
    /// `hash -> expiry`, exact while small.
    Sparse(HashMap<u64, u32>),
    /// `m x Z` expiry matrix in row-major order plus the per-register
    /// highest live rank.
    Dense {
        buckets: Box<[u32]>,
        top: Box<[u8]>,
    },
}

/// TTL-aware HyperLogLog sketch.
///
/// # Examples
///
/// ```
/// use cachesketches::ttlhll::TtlHllSketch;
///
/// let mut sketch = TtlHllSketch::new(12);
/// sketch.add(0x0001, 100);
/// sketch.add(0x0002, 100);
/// sketch.add(0x0003, 200);
/// assert_eq!(sketch.count_at(50), 3.0);
/// assert_eq!(sketch.count_at(100), 1.0);
/// assert_eq!(sketch.count_at(200), 0.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TtlHllSketch {
    precision: u8,
    block_size: u32,
    last_merge_sn: u64,
    cached_count: f64,
    pub(crate) store: Store,
}

impl TtlHllSketch {
    /// Create a sketch with `2^precision` registers.
    ///
    /// # Panics
    ///
    /// If `precision` is not in `[4, 16]`.
    pub fn new(precision: u8) -> Self {
        Self::with_block_size(precision, 0)
    }

    /// Create a sketch labeled with the block-size class it counts for.
    ///
    /// # Panics
    ///
    /// If `precision` is not in `[4, 16]`.
    pub fn with_block_size(precision: u8, block_size: u32) -> Self {
        assert!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            "precision must be in [{MIN_PRECISION}, {MAX_PRECISION}], got {precision}"
        );
        Self {
            precision,
            block_size,
            last_merge_sn: 0,
            cached_count: 0.0,
            store: Store::Sparse(HashMap::new()),
        }
    }

    pub(crate) fn from_parts(precision: u8, block_size: u32, store: Store) -> Self {
        Self {
            precision,
            block_size,
            last_merge_sn: 0,
            cached_count: 0.0,
            store,
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.store, Store::Sparse(_))
    }

    pub(crate) fn registers(&self) -> usize {
        1usize << self.precision
    }

    pub(crate) fn rank_limit(&self) -> u8 {
        max_rank(self.precision)
    }

    /// Pairs the sparse map may hold before promotion: a third of the
    /// dense matrix footprint (12 bytes per map pair vs 4 per cell).
    fn sparse_capacity(&self) -> usize {
        (self.registers() * self.rank_limit() as usize / 3).max(1)
    }

    /// Record an observation of `hash` that stays live until `expiry`.
    ///
    /// Re-observing a hash keeps the later expiry.
    pub fn add(&mut self, hash: u64, expiry: u32) {
        let capacity = self.sparse_capacity();
        if let Store::Sparse(pairs) = &mut self.store {
            if let Some(slot) = pairs.get_mut(&hash) {
                *slot = (*slot).max(expiry);
                return;
            }
            if pairs.len() < capacity {
                pairs.insert(hash, expiry);
                return;
            }
            // Promote first, insert into the matrix after; running the
            // insert back through the capacity check would recurse.
            self.promote();
        }
        self.dense_add(hash, expiry);
    }

    /// Scramble and add an arbitrary hashable item.
    pub fn add_item<H: Hash>(&mut self, item: H, expiry: u32) {
        self.add(hash_item(item), expiry);
    }

    fn dense_add(&mut self, hash: u64, expiry: u32) {
        let z = self.rank_limit() as usize;
        let slot = register_index(hash, self.precision);
        let rank = rank_of(hash, self.rank_limit());
        if let Store::Dense { buckets, top } = &mut self.store {
            let cell = &mut buckets[slot * z + rank as usize];
            if expiry > *cell {
                *cell = expiry;
            }
            if top[slot] < rank {
                top[slot] = rank;
            }
        }
    }

    fn promote(&mut self) {
        let z = self.rank_limit() as usize;
        let m = self.registers();
        let dense = Store::Dense {
            buckets: vec![0u32; m * z].into_boxed_slice(),
            top: vec![0u8; m].into_boxed_slice(),
        };
        let pairs = match std::mem::replace(&mut self.store, dense) {
            Store::Sparse(pairs) => pairs,
            Store::Dense { .. } => return,
        };
        tracing::debug!(
            precision = self.precision,
            retained = pairs.len(),
            "promoting sparse TTL-HLL to dense matrix"
        );
        for (hash, expiry) in pairs {
            self.dense_add(hash, expiry);
        }
    }

    /// Current estimate, ignoring expiry.
    pub fn count(&self) -> f64 {
        match &self.store {
            Store::Sparse(pairs) => pairs.len() as f64,
            Store::Dense { top, .. } => {
                estimate::from_registers(top.iter().copied(), self.registers())
            }
        }
    }

    /// Estimate of keys still live strictly after `now`, without mutating
    /// the sketch.
    pub fn count_at(&self, now: u32) -> f64 {
        match &self.store {
            Store::Sparse(pairs) => pairs.values().filter(|&&e| e > now).count() as f64,
            Store::Dense { buckets, .. } => {
                let z = self.rank_limit() as usize;
                let registers = (0..self.registers()).map(|slot| {
                    let row = &buckets[slot * z..(slot + 1) * z];
                    let mut live_top = 0u8;
                    for (rank, &expiry) in row.iter().enumerate().skip(1) {
                        if expiry > now {
                            live_top = rank as u8;
                        }
                    }
                    live_top
                });
                estimate::from_registers(registers, self.registers())
            }
        }
    }

    /// Drop every cell whose expiry is at or before `now`, then estimate.
    ///
    /// Idempotent and time-monotone: for `now1 <= now2` the counts satisfy
    /// `count(now2) <= count(now1)` regardless of call order.
    pub fn evict_expired_and_count(&mut self, now: u32) -> f64 {
        match &mut self.store {
            Store::Sparse(pairs) => {
                pairs.retain(|_, expiry| *expiry > now);
                pairs.len() as f64
            }
            Store::Dense { buckets, top } => {
                let z = max_rank(self.precision) as usize;
                for (slot, top_slot) in top.iter_mut().enumerate() {
                    let row = &mut buckets[slot * z..(slot + 1) * z];
                    let mut live_top = 0u8;
                    for (rank, cell) in row.iter_mut().enumerate().skip(1) {
                        if *cell != 0 && *cell <= now {
                            *cell = 0;
                        } else if *cell != 0 {
                            live_top = rank as u8;
                        }
                    }
                    *top_slot = live_top;
                }
                estimate::from_registers(top.iter().copied(), 1usize << self.precision)
            }
        }
    }

    /// Merge `other` into `self` by per-cell expiry maximum and return the
    /// resulting count.
    ///
    /// `merge_sn` is a monotone identifier: a call whose `merge_sn` is not
    /// greater than the last applied one is a no-op returning the cached
    /// count, unless `force` is set. This makes fan-out merges idempotent
    /// when the same source is offered to a sink more than once per epoch.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the precisions differ.
    pub fn merge_count(
        &mut self,
        other: &TtlHllSketch,
        merge_sn: u64,
        force: bool,
    ) -> Result<f64, Error> {
        if self.precision != other.precision {
            return Err(Error::invalid_argument(format!(
                "cannot merge precision {} into precision {}",
                other.precision, self.precision
            )));
        }
        if !force && merge_sn <= self.last_merge_sn {
            return Ok(self.cached_count);
        }

        match &other.store {
            Store::Sparse(pairs) => {
                for (&hash, &expiry) in pairs {
                    self.add(hash, expiry);
                }
            }
            Store::Dense {
                buckets: other_buckets,
                top: other_top,
            } => {
                if self.is_sparse() {
                    self.promote();
                }
                if let Store::Dense { buckets, top } = &mut self.store {
                    for (mine, theirs) in buckets.iter_mut().zip(other_buckets.iter()) {
                        if *mine < *theirs {
                            *mine = *theirs;
                        }
                    }
                    for (mine, theirs) in top.iter_mut().zip(other_top.iter()) {
                        if *mine < *theirs {
                            *mine = *theirs;
                        }
                    }
                }
            }
        }

        self.last_merge_sn = merge_sn;
        self.cached_count = self.count();
        Ok(self.cached_count)
    }

    /// Return the sketch to the empty sparse state, forgetting merge
    /// history. Used when a counter slot is recycled.
    pub fn reset(&mut self) {
        self.store = Store::Sparse(HashMap::new());
        self.last_merge_sn = 0;
        self.cached_count = 0.0;
    }
}
