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

//! Key-scrambling hash functions.
//!
//! Every key entering a sketch must be scrambled first so that register
//! selection and rank extraction see uniformly distributed bits. Trace
//! records arrive with the scrambling already applied (the `key_hash`
//! field); the functions here cover keys that have not been through it yet.

use std::hash::Hash;

mod murmur2a;

pub use murmur2a::murmur2a_64;
pub use murmur2a::scramble_u64;

/// Seed shared by every sketch in this crate.
pub const DEFAULT_HASH_SEED: u64 = 9001;

/// Scramble an arbitrary hashable item into the 64-bit key-hash domain.
pub fn hash_item<H: Hash>(item: H) -> u64 {
    let mut hasher = mur3::Hasher128::with_seed(DEFAULT_HASH_SEED as u32);
    item.hash(&mut hasher);
    let (lo, _hi) = hasher.finish128();
    lo
}

/// Read a u64 from the first eight bytes of a slice.
pub(crate) fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
