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

//! Miss-ratio-curve generators.
//!
//! Four generators share one capability surface: feed requests in, read a
//! curve out. [`OlkenMrc`] tracks exact stack distances;
//! [`ShardsFixedRateMrc`] and [`ShardsFixedSizeMrc`] sample the key space
//! spatially; [`CounterStacksMrc`] approximates the distance matrix with a
//! bank of TTL-HLL counters. All four evict expired keys before they are
//! counted again, so TTL churn shows up as misses the way it would in a
//! real cache.
//!
//! # Usage
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
//! for (ts, key) in [(0, 1u64), (1, 2), (2, 1), (3, 2)] {
//!     olken.add_request(&Request::get(ts, key, 4096, u32::MAX))?;
//! }
//! let curve = olken.curve_fixed_block()?;
//! assert_eq!(curve.points()[0], (0, 1.0));
//! # Ok::<(), cachesketches::error::Error>(())
//! ```

mod counterstacks;
mod curve;
mod olken;
mod shards_rate;
mod shards_size;

pub use counterstacks::CounterStacksMrc;
pub use counterstacks::CounterStacksMrcBuilder;
pub use curve::MissRatioCurve;
pub use olken::OlkenMrc;
pub use olken::OlkenMrcBuilder;
pub use shards_rate::ShardsFixedRateMrc;
pub use shards_rate::ShardsFixedRateMrcBuilder;
pub use shards_size::ShardsFixedSizeMrc;
pub use shards_size::ShardsFixedSizeMrcBuilder;

use crate::error::Error;
use crate::trace::RECORD_SIZE_BYTES;
use crate::trace::Request;

/// Modulus of the spatial sampling hash space: `P = 2^24`.
pub(crate) const SAMPLING_MODULUS: u32 = 1 << 24;

/// Capability surface shared by every generator.
pub trait MrcGenerator {
    /// Consume one request. Non-get requests are ignored.
    fn add_request(&mut self, request: &Request) -> Result<(), Error>;

    /// Consume a batch.
    ///
    /// # Errors
    ///
    /// `ContractViolation` when the batch exceeds the reader's byte limit,
    /// plus anything `add_request` reports.
    fn add_requests(&mut self, batch: &[Request]) -> Result<(), Error> {
        if batch.len() > i32::MAX as usize / RECORD_SIZE_BYTES {
            return Err(Error::contract(format!(
                "batch of {} requests exceeds the reader record limit",
                batch.len()
            )));
        }
        for request in batch {
            self.add_request(request)?;
        }
        Ok(())
    }

    /// Curve under the configured fixed block size.
    fn curve_fixed_block(&mut self) -> Result<MissRatioCurve, Error>;

    /// Curve under the running-mean block size observed so far.
    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error>;
}

/// Sum type over the four generators, for callers that pick the algorithm
/// at run time.
#[derive(Debug)]
pub enum MrcAlgorithm {
    Olken(OlkenMrc),
    ShardsFixedRate(ShardsFixedRateMrc),
    ShardsFixedSize(ShardsFixedSizeMrc),
    CounterStacks(CounterStacksMrc),
}

impl MrcGenerator for MrcAlgorithm {
    fn add_request(&mut self, request: &Request) -> Result<(), Error> {
        match self {
            MrcAlgorithm::Olken(inner) => inner.add_request(request),
            MrcAlgorithm::ShardsFixedRate(inner) => inner.add_request(request),
            MrcAlgorithm::ShardsFixedSize(inner) => inner.add_request(request),
            MrcAlgorithm::CounterStacks(inner) => inner.add_request(request),
        }
    }

    fn curve_fixed_block(&mut self) -> Result<MissRatioCurve, Error> {
        match self {
            MrcAlgorithm::Olken(inner) => inner.curve_fixed_block(),
            MrcAlgorithm::ShardsFixedRate(inner) => inner.curve_fixed_block(),
            MrcAlgorithm::ShardsFixedSize(inner) => inner.curve_fixed_block(),
            MrcAlgorithm::CounterStacks(inner) => inner.curve_fixed_block(),
        }
    }

    fn curve_running_avg(&mut self) -> Result<MissRatioCurve, Error> {
        match self {
            MrcAlgorithm::Olken(inner) => inner.curve_running_avg(),
            MrcAlgorithm::ShardsFixedRate(inner) => inner.curve_running_avg(),
            MrcAlgorithm::ShardsFixedSize(inner) => inner.curve_running_avg(),
            MrcAlgorithm::CounterStacks(inner) => inner.curve_running_avg(),
        }
    }
}
