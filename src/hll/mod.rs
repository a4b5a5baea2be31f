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

//! Plain HyperLogLog sketch for cardinality estimation (no TTL).
//!
//! This is the baseline register-vector HLL used by the working-set
//! estimator when expiry tracking is off. Small cardinalities are held in a
//! sparse hash list and promoted to the dense register vector on overflow;
//! there is no reverse transition.
//!
//! # Register convention
//!
//! The register index is the top `b` bits of the 64-bit key hash; the rank
//! is `min(trailing_zeros(hash) + 1, Z - 1)` with `Z = 64 - b`. The rank is
//! taken from the trailing-zero side so that the same convention can be
//! shared with the TTL-aware matrix sketch, and it must not be changed:
//! persisted sketches are only readable bit-for-bit under it.

mod serialization;
mod sketch;

pub use sketch::HllSketch;

pub(crate) mod estimate {
    /// Bias-corrected register estimate with the standard linear-counting
    /// switch for mostly-empty register files.
    pub fn from_registers<I>(registers: I, m: usize) -> f64
    where
        I: IntoIterator<Item = u8>,
    {
        let mut inverse_sum = 0.0f64;
        let mut zero_registers = 0usize;
        for value in registers {
            inverse_sum += f64::exp2(-(value as f64));
            if value == 0 {
                zero_registers += 1;
            }
        }

        let m_f = m as f64;
        let alpha = match m {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m_f),
        };

        let raw = alpha * m_f * m_f / inverse_sum;
        if raw <= 2.5 * m_f && zero_registers > 0 {
            // Linear counting over the empty-register fraction.
            m_f * (m_f / zero_registers as f64).ln()
        } else {
            raw
        }
    }
}

/// Register index: top `b` bits of the hash.
#[inline]
pub(crate) fn register_index(hash: u64, precision: u8) -> usize {
    (hash >> (64 - precision)) as usize
}

/// Rank: trailing-zero count plus one, capped below the rank limit.
#[inline]
pub(crate) fn rank_of(hash: u64, max_rank: u8) -> u8 {
    let raw = hash.trailing_zeros() + 1;
    raw.min(max_rank as u32 - 1) as u8
}

/// Rank limit `Z` for a given precision.
#[inline]
pub(crate) fn max_rank(precision: u8) -> u8 {
    64 - precision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_index_uses_top_bits() {
        assert_eq!(register_index(u64::MAX, 12), (1 << 12) - 1);
        assert_eq!(register_index(0, 12), 0);
        assert_eq!(register_index(1 << 63, 4), 1 << 3);
    }

    #[test]
    fn test_rank_is_capped() {
        let z = max_rank(12);
        assert_eq!(rank_of(0b1, z), 1);
        assert_eq!(rank_of(0b1000, z), 4);
        // All-zero low bits would give 65; the cap wins.
        assert_eq!(rank_of(1 << 63, z), z - 1);
        assert_eq!(rank_of(0, z), z - 1);
    }

    #[test]
    fn test_linear_counting_regime() {
        // One occupied register out of 16: estimate must be near 1.
        let mut registers = vec![0u8; 16];
        registers[3] = 5;
        let estimate = estimate::from_registers(registers, 16);
        assert!((0.5..2.0).contains(&estimate), "estimate {estimate}");
    }
}
