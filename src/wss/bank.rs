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

use crate::common::CurveConfig;
use crate::common::RunningMean;
use crate::hll::HllSketch;
use crate::trace::Request;
use crate::trace::RequestKind;
use crate::ttlhll::TtlHllSketch;

/// How observed block sizes enter the working-set total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WssMode {
    /// One sketch; WSS is `cardinality * fixed_block`.
    FixedBlock,
    /// One sketch per power-of-two size class; WSS sums class totals.
    VariableBlock,
    /// One sketch; WSS is `cardinality * running_mean_block`.
    RunningAverage,
}

#[derive(Debug)]
enum Bank {
    Plain(Vec<HllSketch>),
    Ttl(Vec<TtlHllSketch>),
}

/// Sketched working-set-size estimator.
///
/// # Examples
///
/// ```
/// use cachesketches::common::CurveConfig;
/// use cachesketches::wss::{WssEstimator, WssMode};
///
/// let mut wss = WssEstimator::builder()
///     .mode(WssMode::FixedBlock)
///     .precision(12)
///     .config(CurveConfig::default().fixed_block_bytes(4096))
///     .build();
/// for key in 0u64..100 {
///     wss.add(key, 4096, u32::MAX);
/// }
/// let bytes = wss.wss(0);
/// assert!((bytes - 100.0 * 4096.0).abs() / (100.0 * 4096.0) < 0.05);
/// ```
#[derive(Debug)]
pub struct WssEstimator {
    mode: WssMode,
    config: CurveConfig,
    bank: Bank,
    mean_block: RunningMean,
    /// log2 of the smallest size class in the bank.
    base_class: u32,
}

impl WssEstimator {
    pub fn builder() -> WssEstimatorBuilder {
        WssEstimatorBuilder::default()
    }

    pub fn mode(&self) -> WssMode {
        self.mode
    }

    /// Route one observation into the bank.
    pub fn add(&mut self, key_hash: u64, block: u32, expiry: u32) {
        let block = self.config.clamp_block(block);
        self.mean_block.observe(block as f64);
        let slot = match self.mode {
            WssMode::FixedBlock | WssMode::RunningAverage => 0,
            WssMode::VariableBlock => self.class_of(block) - self.base_class,
        } as usize;
        match &mut self.bank {
            Bank::Plain(sketches) => sketches[slot].add_hash(key_hash),
            Bank::Ttl(sketches) => sketches[slot].add(key_hash, expiry),
        }
    }

    /// Feed a trace request; non-get requests are ignored.
    pub fn add_request(&mut self, request: &Request) {
        if request.kind != RequestKind::Get {
            return;
        }
        self.add(
            request.key_hash,
            request.value_size,
            request.eviction_time,
        );
    }

    /// Estimated number of distinct live keys at `now`.
    ///
    /// TTL banks evict expired cells first, so this call is `O(m * Z)` per
    /// sketch; plain banks ignore `now`.
    pub fn cardinality(&mut self, now: u32) -> f64 {
        self.class_counts(now).into_iter().sum()
    }

    /// Estimated working-set size in bytes at `now`.
    pub fn wss(&mut self, now: u32) -> f64 {
        let counts = self.class_counts(now);
        match self.mode {
            WssMode::FixedBlock => {
                counts[0] * self.config.get_fixed_block_bytes() as f64
            }
            WssMode::RunningAverage => counts[0] * self.mean_block.mean(),
            WssMode::VariableBlock => counts
                .iter()
                .enumerate()
                .map(|(i, count)| count * f64::exp2((self.base_class + i as u32) as f64))
                .sum(),
        }
    }

    fn class_counts(&mut self, now: u32) -> Vec<f64> {
        match &mut self.bank {
            Bank::Plain(sketches) => sketches.iter().map(HllSketch::count).collect(),
            Bank::Ttl(sketches) => sketches
                .iter_mut()
                .map(|sketch| sketch.evict_expired_and_count(now))
                .collect(),
        }
    }

    /// Size class of a block: log2 of the next power of two.
    fn class_of(&self, block: u32) -> u32 {
        block.next_power_of_two().trailing_zeros()
    }
}

/// Builder in the usual fluent style.
#[derive(Debug)]
pub struct WssEstimatorBuilder {
    mode: WssMode,
    ttl_aware: bool,
    precision: u8,
    config: CurveConfig,
}

impl Default for WssEstimatorBuilder {
    fn default() -> Self {
        Self {
            mode: WssMode::FixedBlock,
            ttl_aware: true,
            precision: 12,
            config: CurveConfig::default(),
        }
    }
}

impl WssEstimatorBuilder {
    pub fn mode(mut self, mode: WssMode) -> Self {
        self.mode = mode;
        self
    }

    /// Track expiries (TTL-HLL bank) or plain cardinality.
    pub fn ttl_aware(mut self, ttl_aware: bool) -> Self {
        self.ttl_aware = ttl_aware;
        self
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn config(mut self, config: CurveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> WssEstimator {
        let base_class = self.config.get_min_block().next_power_of_two().trailing_zeros();
        let top_class = self.config.get_max_block().next_power_of_two().trailing_zeros();
        let classes = match self.mode {
            WssMode::FixedBlock | WssMode::RunningAverage => 1,
            WssMode::VariableBlock => (top_class - base_class + 1) as usize,
        };
        let class_bytes = |i: usize| match self.mode {
            WssMode::VariableBlock => 1u32 << (base_class + i as u32),
            _ => self.config.get_fixed_block_bytes(),
        };
        let bank = if self.ttl_aware {
            Bank::Ttl(
                (0..classes)
                    .map(|i| TtlHllSketch::with_block_size(self.precision, class_bytes(i)))
                    .collect(),
            )
        } else {
            Bank::Plain(
                (0..classes)
                    .map(|i| HllSketch::with_block_size(self.precision, class_bytes(i)))
                    .collect(),
            )
        };
        WssEstimator {
            mode: self.mode,
            config: self.config,
            bank,
            mean_block: RunningMean::default(),
            base_class,
        }
    }
}
