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

use cachesketches::hash::scramble_u64;
use cachesketches::ttlhll::TtlHllSketch;

fn relative_error(actual: f64, expected: f64) -> f64 {
    (actual - expected).abs() / expected
}

#[test]
fn test_basic_expiry_counts() {
    let mut sketch = TtlHllSketch::new(12);
    sketch.add(0x0001, 100);
    sketch.add(0x0002, 100);
    sketch.add(0x0003, 200);
    // b=12 tolerates 5% error; the sparse path happens to be exact.
    assert!(relative_error(sketch.count_at(50), 3.0) <= 0.05);
    assert!(relative_error(sketch.count_at(100), 1.0) <= 0.05);
    assert_eq!(sketch.count_at(200), 0.0);
}

#[test]
fn test_eviction_monotone_over_time() {
    let mut sketch = TtlHllSketch::new(12);
    for key in 0u64..100_000 {
        // Expiries spread uniformly over [1, 100_000].
        let expiry = (key % 100_000 + 1) as u32;
        sketch.add(scramble_u64(key, 0), expiry);
    }
    assert!(!sketch.is_sparse());
    let mut previous = f64::INFINITY;
    for now in (0u32..=100_000).step_by(10_000) {
        let count = sketch.evict_expired_and_count(now);
        assert!(
            count <= previous,
            "count increased from {previous} to {count} at now={now}"
        );
        previous = count;
    }
    assert_eq!(previous, 0.0);
}

#[test]
fn test_eviction_against_exact_population() {
    let mut sketch = TtlHllSketch::new(12);
    let total = 50_000u64;
    for key in 0..total {
        let expiry = if key % 2 == 0 { 100 } else { 200 };
        sketch.add(scramble_u64(key, 0), expiry);
    }
    let live_at_150 = sketch.evict_expired_and_count(150);
    assert!(
        relative_error(live_at_150, total as f64 / 2.0) <= 0.05,
        "estimate {live_at_150} too far from {}",
        total / 2
    );
}

#[test]
fn test_merge_idempotent_under_same_sn() {
    let mut sink = TtlHllSketch::new(10);
    let mut source = TtlHllSketch::new(10);
    for key in 0u64..30_000 {
        sink.add(scramble_u64(key, 0), 1000);
    }
    for key in 20_000u64..60_000 {
        source.add(scramble_u64(key, 0), 2000);
    }
    let once = sink.merge_count(&source, 7, false).unwrap();
    let twice = sink.merge_count(&source, 7, false).unwrap();
    let thrice = sink.merge_count(&source, 3, false).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, thrice);
    // A forced re-merge of the same source is a union no-op.
    let forced = sink.merge_count(&source, 7, true).unwrap();
    assert_eq!(once, forced);
}

#[test]
fn test_merge_union_accuracy() {
    let mut sink = TtlHllSketch::new(12);
    let mut source = TtlHllSketch::new(12);
    for key in 0u64..40_000 {
        sink.add(scramble_u64(key, 0), u32::MAX);
    }
    for key in 40_000u64..80_000 {
        source.add(scramble_u64(key, 0), u32::MAX);
    }
    let union = sink.merge_count(&source, 1, false).unwrap();
    assert!(relative_error(union, 80_000.0) <= 0.05, "union {union}");
}

#[test]
fn test_sparse_dense_equivalence() {
    // Below the sparse capacity, a sketch forced dense by a merge must
    // agree with the exact sparse count.
    let mut sparse = TtlHllSketch::new(12);
    for key in 0u64..500 {
        sparse.add(scramble_u64(key, 0), 1000);
    }
    assert!(sparse.is_sparse());
    let exact = sparse.count_at(0);
    assert_eq!(exact, 500.0);

    let mut forced_dense = TtlHllSketch::new(12);
    // Promotion via volume: insert a large disjoint population, evict it,
    // then merge the small one in.
    for key in 1_000_000u64..1_200_000 {
        forced_dense.add(scramble_u64(key, 0), 10);
    }
    assert!(!forced_dense.is_sparse());
    let _ = forced_dense.evict_expired_and_count(10);
    let merged = forced_dense.merge_count(&sparse, 1, false).unwrap();
    assert!(
        relative_error(merged, exact) <= 0.05,
        "dense count {merged} vs sparse exact {exact}"
    );
}

#[test]
fn test_count_at_matches_destructive_eviction() {
    let mut sketch = TtlHllSketch::new(10);
    for key in 0u64..50_000 {
        sketch.add(scramble_u64(key, 0), (key % 5000) as u32 + 1);
    }
    for now in [0u32, 1000, 2500, 4999] {
        let peeked = sketch.count_at(now);
        let mut scratch = sketch.clone();
        let evicted = scratch.evict_expired_and_count(now);
        assert_eq!(peeked, evicted, "peek and evict disagree at now={now}");
    }
}
