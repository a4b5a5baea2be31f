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

//! TTL-aware HyperLogLog sketch.
//!
//! Estimates `|{ k : k observed and expiry(k) > now }|`: a key stops
//! contributing once its absolute eviction timestamp passes. Instead of one
//! max-rank byte per register, the dense form keeps an `m x Z` matrix of
//! expiry timestamps — cell `(i, r)` holds the latest expiry among keys
//! that landed in register `i` with rank `r` — plus a `top[i]` byte vector
//! remembering the highest live rank per register. Evicting a timestamp
//! zeroes dead cells and lowers `top`, and the plain register estimate is
//! then applied to `top` as the register file.
//!
//! Small sketches start as a `hash -> expiry` map and are promoted to the
//! matrix when the map outgrows a third of the matrix footprint; there is
//! no reverse transition.
//!
//! # Invariants
//!
//! For each register `i` of a dense sketch: `buckets[i][top[i]] != 0` when
//! `top[i] > 0`, and `buckets[i][j] == 0` for every `j > top[i]`. Dynamic
//! serialization relies on this to prune empty tails.

mod serialization;
mod sketch;

pub use serialization::SerialForm;
pub use sketch::TtlHllSketch;
