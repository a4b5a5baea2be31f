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

//! Binary formats for the TTL-aware HLL sketch.
//!
//! All three payloads share a `length:u32` prefix (covering everything
//! after itself) and a 7-byte header
//! `[block_size:u32][precision:u8][is_sparse:u8][is_static:u8]`:
//!
//! - *Sparse*: `n:u32` followed by `n` records of `hash:u64, expiry:u32`.
//! - *Static dense*: the full `m x Z` expiry matrix in row-major order.
//! - *Dynamic dense*: a stream of `(row:u32, n_nonzero:u32,
//!   (rank:u8, expiry:u32)*)` covering only rows with live cells. The
//!   `top[]` invariant guarantees no cell above `top[row]` is set, so the
//!   stream never encodes empty tails.

use std::collections::HashMap;

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::common::MAX_PRECISION;
use crate::common::MIN_PRECISION;
use crate::error::Error;
use crate::hll::max_rank;
use crate::ttlhll::TtlHllSketch;
use crate::ttlhll::sketch::Store;

const HEADER_SIZE_BYTES: usize = 7;

/// Dense encoding choice. Sparse sketches serialize as the sparse pair
/// list under either form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialForm {
    /// Full matrix; fixed size, fastest to decode.
    Static,
    /// Non-zero cells only; compact for sketches with short rows.
    Dynamic,
}

impl TtlHllSketch {
    /// Serialize with the full-matrix dense encoding.
    pub fn serialize_static(&self) -> Vec<u8> {
        self.serialize(SerialForm::Static)
    }

    /// Serialize with the pruned per-row dense encoding.
    pub fn serialize_dynamic(&self) -> Vec<u8> {
        self.serialize(SerialForm::Dynamic)
    }

    /// Serialize in the requested form.
    pub fn serialize(&self, form: SerialForm) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(4 + HEADER_SIZE_BYTES);
        bytes.write_u32_le(0); // patched below
        bytes.write_u32_le(self.block_size());
        bytes.write_u8(self.precision());
        bytes.write_u8(self.is_sparse() as u8);
        bytes.write_u8(matches!(form, SerialForm::Static) as u8);

        match &self.store {
            Store::Sparse(pairs) => {
                bytes.write_u32_le(pairs.len() as u32);
                // Sorted for a canonical byte stream; HashMap order is not.
                let mut sorted: Vec<_> = pairs.iter().collect();
                sorted.sort_unstable_by_key(|(hash, _)| **hash);
                for (&hash, &expiry) in sorted {
                    bytes.write_u64_le(hash);
                    bytes.write_u32_le(expiry);
                }
            }
            Store::Dense { buckets, top } => match form {
                SerialForm::Static => {
                    for &cell in buckets.iter() {
                        bytes.write_u32_le(cell);
                    }
                }
                SerialForm::Dynamic => {
                    let z = self.rank_limit() as usize;
                    for (row, &top_rank) in top.iter().enumerate() {
                        if top_rank == 0 {
                            continue;
                        }
                        let cells = &buckets[row * z..row * z + top_rank as usize + 1];
                        let live = cells.iter().filter(|&&c| c != 0).count();
                        bytes.write_u32_le(row as u32);
                        bytes.write_u32_le(live as u32);
                        for (rank, &cell) in cells.iter().enumerate() {
                            if cell != 0 {
                                bytes.write_u8(rank as u8);
                                bytes.write_u32_le(cell);
                            }
                        }
                    }
                }
            },
        }

        let total = bytes.len();
        bytes.patch_u32_le(0, (total - 4) as u32);
        bytes.into_bytes()
    }

    /// Deserialize any of the three payload forms.
    ///
    /// # Errors
    ///
    /// `MalformedDeserializeData` on length, header, or payload mismatch.
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
        let is_static = cursor
            .read_u8()
            .map_err(|e| Error::insufficient_data("is_static").set_source(e))?;

        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(Error::deserial(format!(
                "precision {precision} is out of range [{MIN_PRECISION}, {MAX_PRECISION}]"
            )));
        }

        let m = 1usize << precision;
        let z = max_rank(precision) as usize;

        let store = if is_sparse != 0 {
            let n = cursor
                .read_u32_le()
                .map_err(|e| Error::insufficient_data("pair count").set_source(e))?;
            let mut pairs = HashMap::with_capacity(n as usize);
            for _ in 0..n {
                let hash = cursor
                    .read_u64_le()
                    .map_err(|e| Error::insufficient_data("pair hash").set_source(e))?;
                let expiry = cursor
                    .read_u32_le()
                    .map_err(|e| Error::insufficient_data("pair expiry").set_source(e))?;
                pairs.insert(hash, expiry);
            }
            Store::Sparse(pairs)
        } else if is_static != 0 {
            let mut buckets = vec![0u32; m * z].into_boxed_slice();
            for cell in buckets.iter_mut() {
                *cell = cursor
                    .read_u32_le()
                    .map_err(|e| Error::insufficient_data("matrix cell").set_source(e))?;
            }
            let top = rebuild_top(&buckets, m, z);
            Store::Dense { buckets, top }
        } else {
            let mut buckets = vec![0u32; m * z].into_boxed_slice();
            while cursor.remaining() > 0 {
                let row = cursor
                    .read_u32_le()
                    .map_err(|e| Error::insufficient_data("row index").set_source(e))?
                    as usize;
                if row >= m {
                    return Err(Error::deserial(format!(
                        "row {row} is out of range for {m} registers"
                    )));
                }
                let live = cursor
                    .read_u32_le()
                    .map_err(|e| Error::insufficient_data("row cell count").set_source(e))?;
                for _ in 0..live {
                    let rank = cursor
                        .read_u8()
                        .map_err(|e| Error::insufficient_data("cell rank").set_source(e))?
                        as usize;
                    let expiry = cursor
                        .read_u32_le()
                        .map_err(|e| Error::insufficient_data("cell expiry").set_source(e))?;
                    if rank == 0 || rank >= z {
                        return Err(Error::deserial(format!(
                            "rank {rank} is out of range (1, {z})"
                        )));
                    }
                    if expiry == 0 {
                        return Err(Error::deserial("dynamic stream encodes an empty cell"));
                    }
                    buckets[row * z + rank] = expiry;
                }
            }
            let top = rebuild_top(&buckets, m, z);
            Store::Dense { buckets, top }
        };

        if cursor.remaining() != 0 {
            return Err(Error::deserial(format!(
                "{} trailing bytes after payload",
                cursor.remaining()
            )));
        }

        Ok(TtlHllSketch::from_parts(precision, block_size, store))
    }
}

fn rebuild_top(buckets: &[u32], m: usize, z: usize) -> Box<[u8]> {
    let mut top = vec![0u8; m].into_boxed_slice();
    for (row, top_slot) in top.iter_mut().enumerate() {
        for rank in (1..z).rev() {
            if buckets[row * z + rank] != 0 {
                *top_slot = rank as u8;
                break;
            }
        }
    }
    top
}
