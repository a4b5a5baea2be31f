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

//! Binary format for the plain HLL sketch.
//!
//! Layout: `length:u32` prefix covering everything after itself, a 15-byte
//! header `[block_size:u32][precision:u8][is_sparse:u8][is_static:u8]
//! [total_insertions:u32][n:u32]`, then either `n` raw `u64` hashes
//! (sparse) or `m` register bytes (dense, `n == m`). Dense registers are
//! always written in full, so `is_static` is fixed at 1; the flag exists to
//! keep the header shape shared with the TTL sketch format.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::MAX_PRECISION;
use crate::common::MIN_PRECISION;
use crate::error::Error;
use crate::hll::sketch::Store;
use crate::hll::HllSketch;

const HEADER_SIZE_BYTES: usize = 15;

impl HllSketch {
    /// Serialize to the length-prefixed binary form.
    pub fn serialize(&self) -> Vec<u8> {
        let (n, payload_len) = match &self.store {
            Store::Sparse(hashes) => (hashes.len(), hashes.len() * 8),
            Store::Dense(registers) => (registers.len(), registers.len()),
        };

        let mut bytes = SketchBytes::with_capacity(4 + HEADER_SIZE_BYTES + payload_len);
        bytes.write_u32_le((HEADER_SIZE_BYTES + payload_len) as u32);
        bytes.write_u32_le(self.block_size());
        bytes.write_u8(self.precision());
        bytes.write_u8(self.is_sparse() as u8);
        bytes.write_u8(1); // is_static
        bytes.write_u32_le(self.total_insertions());
        bytes.write_u32_le(n as u32);

        match &self.store {
            Store::Sparse(hashes) => {
                for &hash in hashes {
                    bytes.write_u64_le(hash);
                }
            }
            Store::Dense(registers) => bytes.write(registers),
        }

        bytes.into_bytes()
    }

    /// Deserialize from bytes produced by [`HllSketch::serialize`].
    ///
    /// # Errors
    ///
    /// `MalformedDeserializeData` if the prefix, header, or payload length
    /// does not match.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let declared = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("length prefix").set_source(e))?
            as usize;
        if declared != bytes.len() - 4 {
            return Err(Error::length_mismatch(declared, bytes.len() - 4));
        }

        let block_size = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("block_size").set_source(e))?;
        let precision = cursor
            .read_u8()
            .map_err(|e| Error::insufficient_data("precision").set_source(e))?;
        let is_sparse = cursor
            .read_u8()
            .map_err(|e| Error::insufficient_data("is_sparse").set_source(e))?;
        let _is_static = cursor
            .read_u8()
            .map_err(|e| Error::insufficient_data("is_static").set_source(e))?;
        let total_insertions = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("total_insertions").set_source(e))?;
        let n = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("entry count").set_source(e))?
            as usize;

        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(Error::deserial(format!(
                "precision {precision} is out of range [{MIN_PRECISION}, {MAX_PRECISION}]"
            )));
        }

        let store = if is_sparse != 0 {
            let mut hashes = Vec::with_capacity(n);
            for _ in 0..n {
                let hash = cursor
                    .read_u64_le()
                    .map_err(|e| Error::insufficient_data("sparse hash").set_source(e))?;
                hashes.push(hash);
            }
            if !hashes.is_sorted() {
                return Err(Error::deserial("sparse hash list is not sorted"));
            }
            Store::Sparse(hashes)
        } else {
            let m = 1usize << precision;
            if n != m {
                return Err(Error::deserial(format!(
                    "dense register count {n} does not match precision {precision} (m = {m})"
                )));
            }
            let mut registers = vec![0u8; m];
            cursor
                .read_exact(&mut registers)
                .map_err(|e| Error::insufficient_data("dense registers").set_source(e))?;
            Store::Dense(registers.into_boxed_slice())
        };

        if cursor.remaining() != 0 {
            return Err(Error::deserial(format!(
                "{} trailing bytes after payload",
                cursor.remaining()
            )));
        }

        Ok(HllSketch::from_parts(
            precision,
            block_size,
            total_insertions,
            store,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_round_trip() {
        let mut sketch = HllSketch::with_block_size(12, 4096);
        for key in 0u64..50 {
            sketch.add_item(key);
        }
        assert!(sketch.is_sparse());
        let bytes = sketch.serialize();
        let restored = HllSketch::deserialize(&bytes).unwrap();
        assert_eq!(restored, sketch);
        assert_eq!(restored.block_size(), 4096);
        assert_eq!(restored.count(), 50.0);
    }

    #[test]
    fn test_dense_round_trip() {
        let mut sketch = HllSketch::new(8);
        for key in 0u64..5000 {
            sketch.add_item(key);
        }
        assert!(!sketch.is_sparse());
        let bytes = sketch.serialize();
        let restored = HllSketch::deserialize(&bytes).unwrap();
        assert_eq!(restored, sketch);
        assert_eq!(restored.count(), sketch.count());
        assert_eq!(restored.total_insertions(), 5000);
    }

    #[test]
    fn test_bad_length_prefix() {
        let mut bytes = HllSketch::new(8).serialize();
        bytes.push(0);
        assert!(HllSketch::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let sketch = {
            let mut s = HllSketch::new(8);
            for key in 0u64..5000 {
                s.add_item(key);
            }
            s
        };
        let bytes = sketch.serialize();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(HllSketch::deserialize(truncated).is_err());
    }
}
