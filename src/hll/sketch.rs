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

use std::hash::Hash;

use crate::common::MAX_PRECISION;
use crate::common::MIN_PRECISION;
use crate::error::Error;
use crate::hash::hash_item;
use crate::hll::estimate;
use crate::hll::max_rank;
use crate::hll::rank_of;
use crate::hll::register_index;

/// Storage mode. The sparse list keeps the raw hashes sorted for exact
/// counting; the dense vector keeps one max-rank byte per register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Store {
    Sparse(Vec<u64>),
    Dense(Box<[u8]>),
}

/// Plain HyperLogLog sketch.
///
/// # Examples
///
/// ```
/// use cachesketches::hll::HllSketch;
///
/// let mut sketch = HllSketch::new(12);
/// for key in 0u64..1000 {
///     sketch.add_item(key);
/// }
/// let estimate = sketch.count();
/// assert!((900.0..1100.0).contains(&estimate));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch {
    precision: u8,
    block_size: u32,
    total_insertions: u32,
    pub(crate) store: Store,
}

impl HllSketch {
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
    /// The label travels with the serialized form so a working-set bank can
    /// be reassembled without external bookkeeping.
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
            total_insertions: 0,
            store: Store::Sparse(Vec::new()),
        }
    }

    pub(crate) fn from_parts(
        precision: u8,
        block_size: u32,
        total_insertions: u32,
        store: Store,
    ) -> Self {
        Self {
            precision,
            block_size,
            total_insertions,
            store,
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of `add` calls this sketch has absorbed.
    pub fn total_insertions(&self) -> u32 {
        self.total_insertions
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.store, Store::Sparse(_))
    }

    fn registers(&self) -> usize {
        1usize << self.precision
    }

    /// Entries the sparse list may hold before promotion: memory parity
    /// with the dense register vector (8 bytes per hash vs 1 per register).
    fn sparse_capacity(&self) -> usize {
        (self.registers() / 8).max(1)
    }

    /// Add a pre-scrambled 64-bit key hash.
    pub fn add_hash(&mut self, hash: u64) {
        self.total_insertions = self.total_insertions.wrapping_add(1);
        let capacity = self.sparse_capacity();
        if let Store::Sparse(hashes) = &mut self.store {
            match hashes.binary_search(&hash) {
                Ok(_) => return,
                Err(slot) => {
                    if hashes.len() < capacity {
                        hashes.insert(slot, hash);
                        return;
                    }
                    // Promote first, then insert into the dense store
                    // directly; the capacity check must not re-enter.
                    self.promote();
                }
            }
        }
        self.set_register(hash);
    }

    /// Scramble and add an arbitrary hashable item.
    pub fn add_item<H: Hash>(&mut self, item: H) {
        self.add_hash(hash_item(item));
    }

    fn set_register(&mut self, hash: u64) {
        let slot = register_index(hash, self.precision);
        let rank = rank_of(hash, max_rank(self.precision));
        if let Store::Dense(registers) = &mut self.store {
            if registers[slot] < rank {
                registers[slot] = rank;
            }
        }
    }

    fn promote(&mut self) {
        let dense = Store::Dense(vec![0u8; self.registers()].into_boxed_slice());
        let hashes = match std::mem::replace(&mut self.store, dense) {
            Store::Sparse(hashes) => hashes,
            Store::Dense(_) => return,
        };
        tracing::debug!(
            precision = self.precision,
            retained = hashes.len(),
            "promoting sparse HLL to dense registers"
        );
        for hash in hashes {
            self.set_register(hash);
        }
    }

    /// Cardinality estimate. Exact while the sketch is sparse.
    pub fn count(&self) -> f64 {
        match &self.store {
            Store::Sparse(hashes) => hashes.len() as f64,
            Store::Dense(registers) => {
                estimate::from_registers(registers.iter().copied(), self.registers())
            }
        }
    }

    /// Merge another sketch into this one by per-register maximum.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the precisions differ.
    pub fn merge(&mut self, other: &HllSketch) -> Result<(), Error> {
        if self.precision != other.precision {
            return Err(Error::invalid_argument(format!(
                "cannot merge precision {} into precision {}",
                other.precision, self.precision
            )));
        }
        let insertions_before = self.total_insertions;
        match &other.store {
            Store::Sparse(hashes) => {
                // Replays through add_hash so a sparse sink can stay sparse
                // when the union still fits.
                for &hash in hashes {
                    self.add_hash(hash);
                }
            }
            Store::Dense(other_registers) => {
                if self.is_sparse() {
                    self.promote();
                }
                if let Store::Dense(registers) = &mut self.store {
                    for (mine, theirs) in registers.iter_mut().zip(other_registers.iter()) {
                        if *mine < *theirs {
                            *mine = *theirs;
                        }
                    }
                }
            }
        }
        self.total_insertions = insertions_before.wrapping_add(other.total_insertions);
        Ok(())
    }
}
