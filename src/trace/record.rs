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

use crate::codec::SketchSlice;
use crate::common::CurveConfig;
use crate::error::Error;

/// Size of one binary trace record: `[timestamp:u32][key_hash:u64]
/// [value_size:u32][eviction_time:u32]`, little-endian.
pub const RECORD_SIZE_BYTES: usize = 20;

/// Request kind. Only `Get` participates in the analytics; the filtered
/// binary format carries gets exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Set,
    Delete,
}

/// One cache access, immutable once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Seconds; non-decreasing within a batch.
    pub timestamp: u32,
    /// Key already passed through the scrambling hash.
    pub key_hash: u64,
    /// Object size in bytes, clamped into the configured block range.
    pub value_size: u32,
    /// Absolute expiry in seconds (`timestamp + TTL`).
    pub eviction_time: u32,
    pub kind: RequestKind,
}

impl Request {
    /// Build a `Get` request, repairing an expiry that precedes its own
    /// timestamp. Size clamping happens at batch decode, against the
    /// configured block range.
    pub fn get(timestamp: u32, key_hash: u64, value_size: u32, eviction_time: u32) -> Self {
        Self {
            timestamp,
            key_hash,
            value_size,
            eviction_time: eviction_time.max(timestamp),
            kind: RequestKind::Get,
        }
    }

    /// Effective block size for this request.
    pub fn block_size(&self, config: &CurveConfig) -> u32 {
        config.clamp_block(self.value_size)
    }
}

/// Decode a batch of fixed-size records.
///
/// The byte length must be a whole number of records
/// ([`ErrorKind::TruncatedTrace`](crate::error::ErrorKind::TruncatedTrace)
/// otherwise — a short read means the trace file is cut off), and a batch
/// larger than `i32::MAX` bytes is a contract violation on the reader side.
/// Sizes are clamped into the configured block range here, at ingestion.
pub fn decode_batch(bytes: &[u8], config: &CurveConfig) -> Result<Vec<Request>, Error> {
    if bytes.len() > i32::MAX as usize {
        return Err(Error::contract(format!(
            "batch of {} bytes exceeds the {} byte reader limit",
            bytes.len(),
            i32::MAX
        )));
    }
    if bytes.len() % RECORD_SIZE_BYTES != 0 {
        return Err(Error::new(
            crate::error::ErrorKind::TruncatedTrace,
            format!(
                "{} bytes is not a multiple of the {RECORD_SIZE_BYTES}-byte record",
                bytes.len()
            ),
        ));
    }

    let mut cursor = SketchSlice::new(bytes);
    let mut batch = Vec::with_capacity(bytes.len() / RECORD_SIZE_BYTES);
    while cursor.remaining() > 0 {
        let timestamp = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("timestamp").set_source(e))?;
        let key_hash = cursor
            .read_u64_le()
            .map_err(|e| Error::insufficient_data("key_hash").set_source(e))?;
        let value_size = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("value_size").set_source(e))?;
        let eviction_time = cursor
            .read_u32_le()
            .map_err(|e| Error::insufficient_data("eviction_time").set_source(e))?;
        batch.push(Request::get(
            timestamp,
            key_hash,
            config.clamp_block(value_size),
            eviction_time,
        ));
    }
    Ok(batch)
}

/// Boundary to the external trace reader.
///
/// Implementations deliver decoded batches in timestamp order; `None` marks
/// end of trace. Disk access and retry policy live entirely on the
/// implementor's side.
pub trait RequestSource {
    fn next_batch(&mut self) -> Result<Option<Vec<Request>>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn encode(records: &[(u32, u64, u32, u32)]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(records.len() * RECORD_SIZE_BYTES);
        for (ts, key, size, evict) in records {
            bytes.extend_from_slice(&ts.to_le_bytes());
            bytes.extend_from_slice(&key.to_le_bytes());
            bytes.extend_from_slice(&size.to_le_bytes());
            bytes.extend_from_slice(&evict.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_batch() {
        let config = CurveConfig::default().block_clamp(64, 1 << 20);
        let bytes = encode(&[(10, 0xAAAA, 100, 40), (11, 0xBBBB, 7, 99)]);
        let batch = decode_batch(&bytes, &config).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].timestamp, 10);
        assert_eq!(batch[0].key_hash, 0xAAAA);
        assert_eq!(batch[0].value_size, 100);
        assert_eq!(batch[0].eviction_time, 40);
        assert_eq!(batch[0].kind, RequestKind::Get);
        // Undersized object clamps up to min_block.
        assert_eq!(batch[1].value_size, 64);
    }

    #[test]
    fn test_expiry_before_timestamp_is_repaired() {
        let config = CurveConfig::default();
        let bytes = encode(&[(50, 1, 10, 20)]);
        let batch = decode_batch(&bytes, &config).unwrap();
        assert_eq!(batch[0].eviction_time, 50);
    }

    #[test]
    fn test_truncated_batch() {
        let config = CurveConfig::default();
        let mut bytes = encode(&[(10, 1, 10, 20)]);
        bytes.pop();
        let err = decode_batch(&bytes, &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedTrace);
    }

    #[test]
    fn test_empty_batch() {
        let config = CurveConfig::default();
        assert!(decode_batch(&[], &config).unwrap().is_empty());
    }
}
