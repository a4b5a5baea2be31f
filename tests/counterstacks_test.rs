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

use cachesketches::common::CurveConfig;
use cachesketches::common::Fidelity;
use cachesketches::hash::scramble_u64;
use cachesketches::mrc::CounterStacksMrc;
use cachesketches::mrc::MrcGenerator;
use cachesketches::mrc::OlkenMrc;
use cachesketches::trace::Request;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

const BLOCK: u32 = 4096;

/// Route pruning/promotion logs through the test harness capture.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> CurveConfig {
    CurveConfig::default()
        .bucket_width_bytes(16 * BLOCK as u64)
        .max_cache_bytes(1 << 28)
        .fixed_block_bytes(BLOCK)
}

fn builder() -> cachesketches::mrc::CounterStacksMrcBuilder {
    init_tracing();
    CounterStacksMrc::builder()
        .config(config())
        .precision(11)
        .counter_capacity(32)
}

#[test]
fn test_serialization_round_trip_keeps_curve_bytes() {
    // Three processing passes, a full counter round-trip, then the curve
    // must come out byte-identical.
    let feed = |stacks: &mut CounterStacksMrc| {
        let mut rng = StdRng::seed_from_u64(0xCAFE);
        for epoch in 0u32..3 {
            for _ in 0..3000 {
                let key = scramble_u64(rng.gen_range(0u64..2000), 0);
                stacks
                    .add_request(&Request::get(epoch, key, BLOCK, u32::MAX))
                    .unwrap();
            }
            stacks.process_stack(epoch).unwrap();
        }
    };
    let mut original = builder().build();
    feed(&mut original);
    let before = original.curve_fixed_block().unwrap().to_csv();

    let snapshots = original.snapshot_counters();
    original.restore_counters(&snapshots).unwrap();
    let after = original.curve_fixed_block().unwrap().to_csv();
    assert_eq!(before, after);
    assert_eq!(original.triggers(), 3);
}

#[test]
fn test_oldest_column_is_union_monotone() {
    // With infinite TTLs the oldest counter only ever grows.
    let mut stacks = builder().build();
    let mut rng = StdRng::seed_from_u64(1);
    let mut last_oldest = 0.0f64;
    for epoch in 0u32..10 {
        for _ in 0..2000 {
            let key = scramble_u64(rng.gen_range(0u64..30_000), 0);
            stacks
                .add_request(&Request::get(epoch * 10, key, BLOCK, u32::MAX))
                .unwrap();
        }
        stacks.process_stack(epoch * 10).unwrap();
        let columns = stacks.counter_columns();
        // Strictly growing union; the tolerance absorbs estimator wobble
        // at the linear-counting crossover.
        assert!(
            columns[0] >= last_oldest * 0.98,
            "oldest column shrank: {} -> {}",
            last_oldest,
            columns[0]
        );
        last_oldest = columns[0];
        // Wider windows dominate narrower ones.
        for pair in columns.windows(2) {
            assert!(pair[0] >= pair[1] - 1e-9, "columns out of order: {columns:?}");
        }
    }
}

#[test]
fn test_curve_is_conservative_against_exact() {
    // Column differences only see one reuse per key per epoch, so the
    // counter-stack hit mass is a lower bound on the exact one: its curve
    // sits at or above Olken's, and below 1.0 once any reuse spans an
    // epoch boundary.
    let mut stacks = builder().build();
    let mut olken = OlkenMrc::builder().config(config()).build();
    let mut rng = StdRng::seed_from_u64(0xABCD);
    for ts in 0u32..100_000 {
        let key = scramble_u64(rng.gen_range(0u64..3_000), 0);
        let request = Request::get(ts / 1000, key, BLOCK, u32::MAX);
        stacks.add_request(&request).unwrap();
        olken.add_request(&request).unwrap();
    }
    let approx = stacks.curve_fixed_block().unwrap();
    let exact = olken.curve_fixed_block().unwrap();
    let big_cache = 3_000u64 * BLOCK as u64 * 2;
    let approx_ratio = approx.miss_ratio_at(big_cache);
    let exact_ratio = exact.miss_ratio_at(big_cache);
    assert!(
        approx_ratio >= exact_ratio - 0.05,
        "approximate ratio {approx_ratio} undercuts exact {exact_ratio}"
    );
    assert!(approx_ratio < 1.0, "no reuse was attributed at all");
}

#[test]
fn test_ttl_expiry_raises_miss_ratio() {
    let run = |ttl_seconds: Option<u32>| {
        let mut stacks = builder().fidelity(Fidelity::HiFi).build();
        let mut rng = StdRng::seed_from_u64(5);
        for ts in 0u32..100_000 {
            let now = ts / 200;
            let key = scramble_u64(rng.gen_range(0u64..2_000), 0);
            let expiry = match ttl_seconds {
                Some(ttl) => now + ttl,
                None => u32::MAX,
            };
            stacks
                .add_request(&Request::get(now, key, BLOCK, expiry))
                .unwrap();
        }
        let curve = stacks.curve_fixed_block().unwrap();
        curve.miss_ratio_at(1 << 27)
    };
    let with_ttl = run(Some(2));
    let without_ttl = run(None);
    assert!(
        with_ttl >= without_ttl,
        "short TTLs must not lower the asymptotic miss ratio \
         (ttl={with_ttl}, free={without_ttl})"
    );
}

#[test]
fn test_bank_stays_within_capacity_on_long_streams() {
    let capacity = 8;
    let mut stacks = builder().counter_capacity(capacity).build();
    let mut rng = StdRng::seed_from_u64(77);
    for epoch in 0u32..100 {
        for _ in 0..500 {
            // Fresh keys every epoch keep the columns spread apart.
            let key = scramble_u64(epoch as u64 * 1_000_003 + rng.gen_range(0u64..400), 0);
            stacks
                .add_request(&Request::get(epoch, key, BLOCK, u32::MAX))
                .unwrap();
        }
        stacks.process_stack(epoch).unwrap();
        assert!(stacks.counter_count() <= capacity);
    }
}
