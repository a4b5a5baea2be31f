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

//! Working-set-size estimation.
//!
//! The sketched estimator keeps a geometric bank of HLL (or TTL-HLL)
//! sketches, one per power-of-two block-size class, and reports the sum of
//! per-class cardinality times class size. The exact calculator keeps every
//! live key in a map and is memory-bounded by
//! [`MAX_DISTINCT_OBJECTS`](crate::common::MAX_DISTINCT_OBJECTS).

mod bank;
mod exact;

pub use bank::WssEstimator;
pub use bank::WssEstimatorBuilder;
pub use bank::WssMode;
pub use exact::ExactWss;
