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

//! Streaming cache-sizing analytics with per-object expiry.
//!
//! This crate estimates two families of statistics from a stream of cache
//! accesses whose objects carry a TTL: the **working-set size** (bytes
//! needed to hold every distinct live object) and the **miss-ratio curve**
//! (miss ratio as a function of cache size). Each family comes in an exact
//! variant and several sketched ones, and every variant stops counting an
//! object once its absolute eviction timestamp passes.
//!
//! # Modules
//!
//! - [`hll`] / [`ttlhll`]: the cardinality sketches everything else builds
//!   on, the latter holding an expiry per (register, rank) cell.
//! - [`wss`]: exact and sketched working-set-size estimation.
//! - [`stackdist`]: order-statistic tree, eviction index, and histograms
//!   shared by the curve generators.
//! - [`mrc`]: the four miss-ratio-curve generators (exact stack distances,
//!   two spatial-sampling variants, and a counter-stack approximation)
//!   behind one [`mrc::MrcGenerator`] trait.
//! - [`trace`]: the immutable request record, its fixed binary codec, and
//!   the boundary trait the external trace reader implements.
//! - [`hash`]: the key-scrambling hashes.
//!
//! # Example
//!
//! ```
//! use cachesketches::common::CurveConfig;
//! use cachesketches::mrc::{MrcGenerator, OlkenMrc};
//! use cachesketches::trace::Request;
//!
//! let config = CurveConfig::default()
//!     .bucket_width_bytes(4096)
//!     .max_cache_bytes(1 << 20);
//! let mut olken = OlkenMrc::builder().config(config).build();
//! olken.add_request(&Request::get(0, 0xABCD, 4096, 100))?;
//! let curve = olken.curve_fixed_block()?;
//! println!("{}", curve.to_csv());
//! # Ok::<(), cachesketches::error::Error>(())
//! ```

pub mod common;
pub mod error;
pub mod hash;
pub mod hll;
pub mod mrc;
pub mod stackdist;
pub mod trace;
pub mod ttlhll;
pub mod wss;

pub(crate) mod codec;
