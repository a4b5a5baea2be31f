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

// Multiplication constant and shift from the 64-bit MurmurHash2 family.
const M: u64 = 0xC6A4_A793_5BD1_E995;
const R: u32 = 47;

/// The 64-bit MurmurHash2A variant.
///
/// This is the scrambling hash applied to cache keys before they reach any
/// sketch. The exact bit convention matters: register selection reads the
/// top bits of the result and rank extraction reads the trailing-zero side,
/// so a different hash (or a different fold order) would make persisted
/// sketches unreadable.
pub fn murmur2a_64(data: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = super::read_u64_le(chunk);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u64;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u64) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^ (h >> R)
}

/// Scramble a raw 64-bit key.
///
/// Single-block fast path of [`murmur2a_64`] over the key's little-endian
/// bytes, bit-identical to hashing the 8-byte encoding.
pub fn scramble_u64(key: u64, seed: u64) -> u64 {
    let mut h = seed ^ 8u64.wrapping_mul(M);

    let mut k = key;
    k = k.wrapping_mul(M);
    k ^= k >> R;
    k = k.wrapping_mul(M);
    h ^= k;
    h = h.wrapping_mul(M);

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^ (h >> R)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_seed_zero() {
        assert_eq!(murmur2a_64(b"", 0), 0x0000000000000000);
        assert_eq!(murmur2a_64(b"a", 0), 0x071717D2D36B6B11);
        assert_eq!(
            murmur2a_64(b"The quick brown fox jumps over the lazy dog", 0),
            0x5589CA33042A861B
        );
        let sixteen: Vec<u8> = (0u8..16).collect();
        assert_eq!(murmur2a_64(&sixteen, 0), 0xE6709E192441A2F3);
    }

    #[test]
    fn test_vectors_nonzero_seed() {
        assert_eq!(
            murmur2a_64(b"The quick brown fox jumps over the lazy dog", 0x9747B28C),
            0x029A7747A564BD84
        );
        assert_eq!(
            murmur2a_64(&0xDEAD_BEEFu64.to_le_bytes(), 9001),
            0x47D93F739774D94C
        );
    }

    #[test]
    fn test_scramble_matches_slice_path() {
        for key in [0u64, 1, 123, u64::MAX, 0xDEAD_BEEF] {
            for seed in [0u64, 9001] {
                assert_eq!(
                    scramble_u64(key, seed),
                    murmur2a_64(&key.to_le_bytes(), seed),
                    "key={key:#x} seed={seed}"
                );
            }
        }
        assert_eq!(scramble_u64(123, 0), 0xEEDD7AA18C90CEC3);
    }

    #[test]
    fn test_single_bit_avalanche() {
        let base = scramble_u64(0x0123_4567_89AB_CDEF, 0);
        for bit in 0..64 {
            let flipped = scramble_u64(0x0123_4567_89AB_CDEF ^ (1 << bit), 0);
            let differing = (base ^ flipped).count_ones();
            assert!(
                differing >= 16,
                "bit {bit} flipped only {differing} output bits"
            );
        }
    }
}
