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

/// Geometry of the miss-ratio curves produced by every generator.
///
/// # Examples
///
/// ```
/// use cachesketches::common::CurveConfig;
///
/// let config = CurveConfig::default()
///     .max_cache_bytes(64 << 30)
///     .fixed_block_bytes(4096);
/// assert_eq!(config.last_bucket(), (64u64 << 30) / (32 << 20));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CurveConfig {
    max_cache_bytes: u64,
    bucket_width_bytes: u64,
    fixed_block_bytes: u32,
    min_block: u32,
    max_block: u32,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 2 << 40,      // 2 TiB
            bucket_width_bytes: 32 << 20,  // 32 MiB
            fixed_block_bytes: 4096,
            min_block: 1,
            max_block: 16 << 20,
        }
    }
}

impl CurveConfig {
    /// Set the largest cache size the curve covers.
    ///
    /// # Panics
    ///
    /// If `bytes` is smaller than the bucket width.
    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        assert!(
            bytes >= self.bucket_width_bytes,
            "max_cache_bytes {bytes} is smaller than the bucket width {}",
            self.bucket_width_bytes
        );
        self.max_cache_bytes = bytes;
        self
    }

    /// Set the histogram bucket width in bytes.
    ///
    /// # Panics
    ///
    /// If `bytes` is zero or exceeds `max_cache_bytes`.
    pub fn bucket_width_bytes(mut self, bytes: u64) -> Self {
        assert!(
            bytes > 0 && bytes <= self.max_cache_bytes,
            "bucket_width_bytes {bytes} must be in [1, {}]",
            self.max_cache_bytes
        );
        self.bucket_width_bytes = bytes;
        self
    }

    /// Set the block size assumed by the fixed-block curves.
    ///
    /// # Panics
    ///
    /// If `bytes` is zero.
    pub fn fixed_block_bytes(mut self, bytes: u32) -> Self {
        assert!(bytes > 0, "fixed_block_bytes must be positive");
        self.fixed_block_bytes = bytes;
        self
    }

    /// Set the object-size clamp applied at ingestion.
    ///
    /// # Panics
    ///
    /// If `min` is zero or exceeds `max`.
    pub fn block_clamp(mut self, min: u32, max: u32) -> Self {
        assert!(min > 0 && min <= max, "invalid block clamp [{min}, {max}]");
        self.min_block = min;
        self.max_block = max;
        self
    }

    pub fn get_max_cache_bytes(&self) -> u64 {
        self.max_cache_bytes
    }

    pub fn get_bucket_width_bytes(&self) -> u64 {
        self.bucket_width_bytes
    }

    pub fn get_fixed_block_bytes(&self) -> u32 {
        self.fixed_block_bytes
    }

    pub fn get_min_block(&self) -> u32 {
        self.min_block
    }

    pub fn get_max_block(&self) -> u32 {
        self.max_block
    }

    /// Index of the last histogram bucket.
    pub fn last_bucket(&self) -> u64 {
        self.max_cache_bytes / self.bucket_width_bytes
    }

    /// Clamp an observed object size into `[min_block, max_block]`.
    pub fn clamp_block(&self, size: u32) -> u32 {
        size.clamp(self.min_block, self.max_block)
    }
}

/// CounterStacks++ fidelity preset.
///
/// HiFi trades memory and CPU for curve resolution; LoFi is the preset used
/// for week-long traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fidelity {
    HiFi,
    LoFi,
}

impl Fidelity {
    /// Trace-time interval that forces a stack processing pass.
    pub fn period_seconds(&self) -> u32 {
        match self {
            Fidelity::HiFi => 60,
            Fidelity::LoFi => 3600,
        }
    }

    /// Pruning threshold: a counter survives only while its cardinality is
    /// below `(1 - delta)` of the previous kept counter.
    pub fn delta(&self) -> f64 {
        match self {
            Fidelity::HiFi => 0.02,
            Fidelity::LoFi => 0.1,
        }
    }

    /// Quantum used to coarsen expiry timestamps in the eviction index.
    pub fn eviction_rounding_seconds(&self) -> u32 {
        match self {
            Fidelity::HiFi => 30,
            Fidelity::LoFi => 60,
        }
    }
}
