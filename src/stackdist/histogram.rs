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

/// Bucketed stack-distance histogram.
///
/// Bucket `i` covers cache sizes up to `i * bucket_width` bytes. A hit at
/// stack distance `d` with block size `b` lands in bucket
/// `ceil(d * b / bucket_width)`. Distances beyond the configured maximum
/// cache size fold into bucket 0; the resulting small spike at the origin
/// is a long-standing property of the produced curves and is kept as-is.
#[derive(Debug, Clone)]
pub struct Histogram {
    counts: Vec<f64>,
    bucket_width: u64,
}

impl Histogram {
    pub fn new(config: &CurveConfig) -> Self {
        Self {
            counts: vec![0.0; config.last_bucket() as usize + 1],
            bucket_width: config.get_bucket_width_bytes(),
        }
    }

    /// Bucket index for an exact distance.
    pub fn bucket_for(&self, distance: u64, block: u64) -> usize {
        let weighted = distance * block;
        let bucket = weighted.div_ceil(self.bucket_width) as usize;
        if bucket >= self.counts.len() { 0 } else { bucket }
    }

    /// Bucket index for a fractional distance or block size (sampling
    /// scaling and running-mean blocks are both non-integral).
    pub fn bucket_for_scaled(&self, distance: f64, block: f64) -> usize {
        let bucket = (distance * block / self.bucket_width as f64).ceil();
        if bucket < 1.0 || bucket >= self.counts.len() as f64 {
            0
        } else {
            bucket as usize
        }
    }

    pub fn record(&mut self, bucket: usize, amount: f64) {
        self.counts[bucket] += amount;
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }
}

/// Histogram whose buckets remember the sampling threshold in force when
/// they were last credited.
///
/// The fixed-size spatial sampler shrinks its threshold `T` over time;
/// counts credited under an older, larger threshold overstate their weight
/// by `T_old / T_new`. Each bucket is rescaled lazily on its next touch
/// and once more against the final threshold when the histogram is read
/// out.
#[derive(Debug, Clone)]
pub struct ScaledHistogram {
    buckets: Vec<(f64, u32)>,
    bucket_width: u64,
}

impl ScaledHistogram {
    pub fn new(config: &CurveConfig, initial_threshold: u32) -> Self {
        Self {
            buckets: vec![(0.0, initial_threshold); config.last_bucket() as usize + 1],
            bucket_width: config.get_bucket_width_bytes(),
        }
    }

    pub fn bucket_for_scaled(&self, distance: f64, block: f64) -> usize {
        let bucket = (distance * block / self.bucket_width as f64).ceil();
        if bucket < 1.0 || bucket >= self.buckets.len() as f64 {
            0
        } else {
            bucket as usize
        }
    }

    /// Credit a bucket under the threshold currently in force.
    pub fn credit(&mut self, bucket: usize, amount: f64, threshold: u32) {
        let (count, stamp) = &mut self.buckets[bucket];
        if *stamp != threshold {
            *count *= threshold as f64 / *stamp as f64;
            *stamp = threshold;
        }
        *count += amount;
    }

    /// Rescale every bucket to the final threshold and return the counts.
    pub fn finalize(&self, final_threshold: u32) -> Vec<f64> {
        self.buckets
            .iter()
            .map(|&(count, stamp)| {
                if stamp == final_threshold {
                    count
                } else {
                    count * final_threshold as f64 / stamp as f64
                }
            })
            .collect()
    }
}
