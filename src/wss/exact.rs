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

use std::collections::BTreeMap;

use crate::common::MAX_DISTINCT_OBJECTS;
use crate::common::RunningMean;

#[derive(Debug, Clone, Copy)]
struct LiveObject {
    expiry: u32,
    block: u32,
}

/// Exact working-set calculator.
///
/// Keeps one entry per distinct live key. Memory is bounded: once
/// `max_objects` keys are live, new keys are silently dropped — the
/// estimate degrades instead of the process address space. Existing keys
/// continue to take expiry upgrades while the map is full.
#[derive(Debug)]
pub struct ExactWss {
    entries: BTreeMap<u64, LiveObject>,
    total_bytes: u64,
    mean_block: RunningMean,
    last_evict: u32,
    max_objects: usize,
}

impl Default for ExactWss {
    fn default() -> Self {
        Self::with_max_objects(MAX_DISTINCT_OBJECTS)
    }
}

impl ExactWss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_objects(max_objects: usize) -> Self {
        assert!(max_objects > 0, "max_objects must be positive");
        Self {
            entries: BTreeMap::new(),
            total_bytes: 0,
            mean_block: RunningMean::default(),
            last_evict: 0,
            max_objects,
        }
    }

    /// Insert a key or upgrade the expiry of a live one.
    pub fn add(&mut self, key_hash: u64, block: u32, expiry: u32) {
        if let Some(object) = self.entries.get_mut(&key_hash) {
            object.expiry = object.expiry.max(expiry);
            return;
        }
        if self.entries.len() >= self.max_objects {
            return;
        }
        self.entries.insert(key_hash, LiveObject { expiry, block });
        self.total_bytes += block as u64;
        self.mean_block.observe(block as f64);
    }

    /// Drop every entry whose expiry is at or before `now`.
    ///
    /// Guarded by the last eviction time so replays and out-of-order calls
    /// are no-ops; eviction only ever moves forward.
    pub fn evict(&mut self, now: u32) {
        if now <= self.last_evict {
            return;
        }
        self.last_evict = now;
        let total_bytes = &mut self.total_bytes;
        self.entries.retain(|_, object| {
            if object.expiry > now {
                true
            } else {
                *total_bytes -= object.block as u64;
                false
            }
        });
    }

    /// Number of distinct live keys.
    pub fn cardinality(&self) -> usize {
        self.entries.len()
    }

    /// Exact working-set size: sum of live block sizes.
    pub fn wss_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Approximation the sketched running-average mode converges to:
    /// cardinality times the mean admitted block size.
    pub fn wss_running_mean(&self) -> f64 {
        self.entries.len() as f64 * self.mean_block.mean()
    }
}
