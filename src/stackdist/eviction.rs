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

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;

/// Expiry-keyed index over live keys.
///
/// A min-heap over the distinct expiry timestamps plus a bucket per expiry
/// holding the keys registered under it, so a firing expiry evicts its
/// whole bucket in one step.
#[derive(Debug, Default)]
pub struct EvictionIndex {
    heap: BinaryHeap<Reverse<u32>>,
    buckets: HashMap<u32, HashSet<u64>>,
}

impl EvictionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key_hash` expires at `expiry`.
    pub fn register(&mut self, key_hash: u64, expiry: u32) {
        match self.buckets.entry(expiry) {
            std::collections::hash_map::Entry::Occupied(mut bucket) => {
                bucket.get_mut().insert(key_hash);
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(HashSet::from([key_hash]));
                self.heap.push(Reverse(expiry));
            }
        }
    }

    /// Pop the next bucket whose expiry is at or before `now`.
    pub fn pop_due(&mut self, now: u32) -> Option<(u32, HashSet<u64>)> {
        let &Reverse(expiry) = self.heap.peek()?;
        if expiry > now {
            return None;
        }
        self.heap.pop();
        let keys = self.buckets.remove(&expiry).unwrap_or_default();
        Some((expiry, keys))
    }

    /// Earliest registered expiry, if any.
    pub fn next_expiry(&self) -> Option<u32> {
        self.heap.peek().map(|&Reverse(expiry)| expiry)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Coarsened expiry-epoch index used by the counter-stack generator.
///
/// Only distinct rounded expiries are kept; the index exists to fire
/// processing triggers, not to enumerate keys. A high-water cap bounds the
/// number of pending epochs: on overflow the furthest-out 10 % are dropped,
/// since nearer epochs carry the trigger information that matters.
#[derive(Debug)]
pub struct EpochIndex {
    heap: BinaryHeap<Reverse<u32>>,
    pending: HashSet<u32>,
    rounding: u32,
    cap: usize,
}

impl EpochIndex {
    /// Default high-water mark for distinct pending epochs.
    pub const DEFAULT_CAP: usize = 8000;

    pub fn new(rounding_seconds: u32, cap: usize) -> Self {
        assert!(rounding_seconds > 0, "rounding must be positive");
        assert!(cap > 0, "cap must be positive");
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            rounding: rounding_seconds,
            cap,
        }
    }

    /// Round an expiry up to the next epoch boundary.
    pub fn round_up(&self, expiry: u32) -> u32 {
        match expiry % self.rounding {
            0 => expiry,
            rem => expiry.saturating_add(self.rounding - rem),
        }
    }

    /// Register an expiry; returns the epoch it was rounded to.
    pub fn register(&mut self, expiry: u32) -> u32 {
        let epoch = self.round_up(expiry);
        if self.pending.insert(epoch) {
            self.heap.push(Reverse(epoch));
            if self.pending.len() > self.cap {
                self.shed();
            }
        }
        epoch
    }

    /// True when an epoch at or before `now` is pending.
    pub fn has_due(&self, now: u32) -> bool {
        matches!(self.heap.peek(), Some(&Reverse(epoch)) if epoch <= now)
    }

    /// Drop every epoch at or before `now`, returning how many fired.
    pub fn clear_due(&mut self, now: u32) -> usize {
        let mut fired = 0;
        while let Some(&Reverse(epoch)) = self.heap.peek() {
            if epoch > now {
                break;
            }
            self.heap.pop();
            self.pending.remove(&epoch);
            fired += 1;
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Keep the smallest 90 % of pending epochs.
    fn shed(&mut self) {
        let keep = self.pending.len() * 9 / 10;
        let mut epochs: Vec<u32> = self.pending.iter().copied().collect();
        epochs.sort_unstable();
        epochs.truncate(keep);
        tracing::warn!(
            kept = keep,
            cap = self.cap,
            "epoch index overflow, dropping furthest-out expiries"
        );
        self.pending = epochs.iter().copied().collect();
        self.heap = epochs.into_iter().map(Reverse).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_in_expiry_order() {
        let mut index = EvictionIndex::new();
        index.register(1, 100);
        index.register(2, 50);
        index.register(3, 100);
        assert_eq!(index.next_expiry(), Some(50));

        let (expiry, keys) = index.pop_due(60).unwrap();
        assert_eq!(expiry, 50);
        assert_eq!(keys, HashSet::from([2]));
        assert!(index.pop_due(60).is_none());

        let (expiry, keys) = index.pop_due(100).unwrap();
        assert_eq!(expiry, 100);
        assert_eq!(keys, HashSet::from([1, 3]));
        assert!(index.is_empty());
    }

    #[test]
    fn test_same_expiry_shares_bucket() {
        let mut index = EvictionIndex::new();
        for key in 0u64..10 {
            index.register(key, 42);
        }
        let (_, keys) = index.pop_due(42).unwrap();
        assert_eq!(keys.len(), 10);
    }

    #[test]
    fn test_epoch_rounding() {
        let index = EpochIndex::new(30, 100);
        assert_eq!(index.round_up(0), 0);
        assert_eq!(index.round_up(29), 30);
        assert_eq!(index.round_up(30), 30);
        assert_eq!(index.round_up(31), 60);
    }

    #[test]
    fn test_epoch_dedup_and_fire() {
        let mut index = EpochIndex::new(30, 100);
        index.register(10);
        index.register(20);
        index.register(29);
        assert_eq!(index.len(), 1);
        assert!(index.has_due(30));
        assert!(!index.has_due(29));
        assert_eq!(index.clear_due(30), 1);
        assert!(index.is_empty());
    }

    #[test]
    fn test_epoch_overflow_keeps_nearest() {
        let mut index = EpochIndex::new(1, 10);
        for expiry in 1u32..=11 {
            index.register(expiry);
        }
        assert_eq!(index.len(), 9);
        assert!(index.has_due(1));
        // The furthest-out epochs went away.
        index.clear_due(9);
        assert!(index.is_empty());
    }
}
