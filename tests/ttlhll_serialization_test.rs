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

use cachesketches::error::ErrorKind;
use cachesketches::hash::scramble_u64;
use cachesketches::hll::HllSketch;
use cachesketches::ttlhll::SerialForm;
use cachesketches::ttlhll::TtlHllSketch;
use googletest::assert_that;
use googletest::prelude::eq;

fn ttl_fixture(keys: u64, precision: u8) -> TtlHllSketch {
    let mut sketch = TtlHllSketch::with_block_size(precision, 4096);
    for key in 0..keys {
        sketch.add(scramble_u64(key, 0), (key % 10_000) as u32 + 1);
    }
    sketch
}

#[test]
fn test_static_and_dynamic_agree_at_every_time() {
    let sketch = ttl_fixture(80_000, 8);
    assert!(!sketch.is_sparse());

    let from_static = TtlHllSketch::deserialize(&sketch.serialize_static()).unwrap();
    let from_dynamic = TtlHllSketch::deserialize(&sketch.serialize_dynamic()).unwrap();
    for now in (0u32..=10_000).step_by(500) {
        let expected = sketch.count_at(now);
        assert_that!(from_static.count_at(now), eq(expected));
        assert_that!(from_dynamic.count_at(now), eq(expected));
    }
}

#[test]
fn test_sparse_round_trip_is_lossless() {
    let sketch = ttl_fixture(200, 12);
    assert!(sketch.is_sparse());
    for form in [SerialForm::Static, SerialForm::Dynamic] {
        let restored = TtlHllSketch::deserialize(&sketch.serialize(form)).unwrap();
        assert_eq!(restored, sketch);
        assert_eq!(restored.block_size(), 4096);
    }
}

#[test]
fn test_serialized_forms_round_trip_byte_identically() {
    let sketch = ttl_fixture(80_000, 8);
    let bytes = sketch.serialize_static();
    let reserialized = TtlHllSketch::deserialize(&bytes).unwrap().serialize_static();
    assert_eq!(reserialized, bytes);

    let bytes = sketch.serialize_dynamic();
    let reserialized = TtlHllSketch::deserialize(&bytes).unwrap().serialize_dynamic();
    assert_eq!(reserialized, bytes);
}

#[test]
fn test_corrupted_payloads_are_rejected() {
    let sketch = ttl_fixture(80_000, 8);
    let bytes = sketch.serialize_static();

    let truncated = &bytes[..bytes.len() - 1];
    let error = TtlHllSketch::deserialize(truncated).unwrap_err();
    assert_that!(error.kind(), eq(ErrorKind::MalformedDeserializeData));

    let mut padded = bytes.clone();
    padded.extend_from_slice(&[0, 0, 0]);
    let error = TtlHllSketch::deserialize(&padded).unwrap_err();
    assert_that!(error.kind(), eq(ErrorKind::MalformedDeserializeData));

    let mut bad_precision = bytes.clone();
    bad_precision[8] = 42; // precision byte after prefix + block_size
    let error = TtlHllSketch::deserialize(&bad_precision).unwrap_err();
    assert_that!(error.kind(), eq(ErrorKind::MalformedDeserializeData));
}

#[test]
fn test_plain_hll_round_trip() {
    let mut sketch = HllSketch::with_block_size(10, 1 << 16);
    for key in 0u64..50_000 {
        sketch.add_hash(scramble_u64(key, 0));
    }
    let restored = HllSketch::deserialize(&sketch.serialize()).unwrap();
    assert_that!(restored.count(), eq(sketch.count()));
    assert_that!(restored.total_insertions(), eq(50_000));
    assert_that!(restored.block_size(), eq(1 << 16));
}
