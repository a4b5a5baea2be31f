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

use std::fmt::Write as _;
use std::io;
use std::io::Write as _;

/// A miss-ratio curve: `(cache_size_bytes, miss_ratio)` points, sizes
/// ascending, ratios non-increasing, first point always `(0, 1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MissRatioCurve {
    points: Vec<(u64, f64)>,
}

impl MissRatioCurve {
    /// Build a curve from histogram counts.
    ///
    /// Bucket `i` of `counts` holds the hits attributable to cache sizes
    /// up to `i * bucket_width` bytes. The cumulative hit total is walked
    /// up to the last non-zero bucket and a point is emitted whenever the
    /// total strictly increases; each count is multiplied by `count_scale`
    /// (the sampling compensation, 1.0 for exact generators) before
    /// entering the ratio. Ratios are clamped into `[0, 1]`.
    pub fn from_counts(
        counts: &[f64],
        bucket_width: u64,
        total_requests: u64,
        count_scale: f64,
    ) -> Self {
        let mut points = vec![(0u64, 1.0)];
        if total_requests == 0 {
            return Self { points };
        }
        let n = total_requests as f64;
        let last = counts.iter().rposition(|&c| c != 0.0).unwrap_or(0);
        let mut total = 0.0f64;
        let mut emitted = 0.0f64;
        for (bucket, &count) in counts.iter().enumerate().take(last + 1) {
            total += count;
            if total > emitted {
                emitted = total;
                let ratio = (1.0 - total * count_scale / n).clamp(0.0, 1.0);
                points.push((bucket as u64 * bucket_width, ratio));
            }
        }
        Self { points }
    }

    pub fn points(&self) -> &[(u64, f64)] {
        &self.points
    }

    /// Miss ratio at a given cache size (step interpolation).
    pub fn miss_ratio_at(&self, cache_bytes: u64) -> f64 {
        let mut ratio = 1.0;
        for &(size, r) in &self.points {
            if size > cache_bytes {
                break;
            }
            ratio = r;
        }
        ratio
    }

    /// Mean absolute difference against another curve, sampled every
    /// `step` bytes up to `max_bytes`.
    pub fn mean_absolute_error(&self, other: &MissRatioCurve, step: u64, max_bytes: u64) -> f64 {
        assert!(step > 0, "step must be positive");
        let mut sum = 0.0;
        let mut samples = 0u64;
        let mut size = 0u64;
        while size <= max_bytes {
            sum += (self.miss_ratio_at(size) - other.miss_ratio_at(size)).abs();
            samples += 1;
            size += step;
        }
        sum / samples as f64
    }

    /// Largest absolute difference against another curve on the same grid.
    pub fn max_absolute_deviation(
        &self,
        other: &MissRatioCurve,
        step: u64,
        max_bytes: u64,
    ) -> f64 {
        assert!(step > 0, "step must be positive");
        let mut worst = 0.0f64;
        let mut size = 0u64;
        while size <= max_bytes {
            worst = worst.max((self.miss_ratio_at(size) - other.miss_ratio_at(size)).abs());
            size += step;
        }
        worst
    }

    /// Render as CSV: one `size_bytes,miss_ratio` pair per line, six
    /// fractional digits, newline-terminated.
    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(self.points.len() * 20);
        for &(size, ratio) in &self.points {
            let _ = writeln!(out, "{size},{ratio:.6}");
        }
        out
    }

    /// Stream the CSV form into a writer.
    pub fn write_csv<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        for &(size, ratio) in &self.points {
            writeln!(writer, "{size},{ratio:.6}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_point_is_origin() {
        let curve = MissRatioCurve::from_counts(&[0.0, 3.0], 1024, 7, 1.0);
        assert_eq!(curve.points()[0], (0, 1.0));
        assert_eq!(curve.points().len(), 2);
        let (size, ratio) = curve.points()[1];
        assert_eq!(size, 1024);
        assert!((ratio - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_buckets_do_not_emit() {
        let curve = MissRatioCurve::from_counts(&[0.0, 2.0, 0.0, 0.0, 1.0, 0.0], 10, 10, 1.0);
        let sizes: Vec<u64> = curve.points().iter().map(|&(s, _)| s).collect();
        assert_eq!(sizes, vec![0, 10, 40]);
    }

    #[test]
    fn test_ratios_non_increasing_and_clamped() {
        let counts = vec![0.0, 5.0, -1.0, 8.0];
        let curve = MissRatioCurve::from_counts(&counts, 10, 10, 1.0);
        let mut last = f64::INFINITY;
        for &(_, ratio) in curve.points() {
            assert!(ratio <= last);
            assert!((0.0..=1.0).contains(&ratio));
            last = ratio;
        }
        // The negative bucket dips the running total, so nothing is
        // emitted until the total exceeds its previous high-water mark.
        assert_eq!(curve.points().len(), 3);
    }

    #[test]
    fn test_count_scale_applies() {
        // 2 sampled hits at rate 0.5 stand for 4 real ones.
        let curve = MissRatioCurve::from_counts(&[0.0, 2.0], 10, 8, 2.0);
        let (_, ratio) = curve.points()[1];
        assert!((ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_csv_rendering() {
        let curve = MissRatioCurve::from_counts(&[0.0, 3.0], 1024, 7, 1.0);
        let csv = curve.to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("0,1.000000"));
        assert_eq!(lines.next(), Some("1024,0.571429"));
        assert_eq!(lines.next(), None);
        assert!(csv.ends_with('\n'));

        let mut sink = Vec::new();
        curve.write_csv(&mut sink).unwrap();
        assert_eq!(String::from_utf8(sink).unwrap(), csv);
    }

    #[test]
    fn test_miss_ratio_at_steps() {
        let curve = MissRatioCurve::from_counts(&[0.0, 4.0, 4.0], 10, 10, 1.0);
        assert_eq!(curve.miss_ratio_at(0), 1.0);
        assert!((curve.miss_ratio_at(10) - 0.6).abs() < 1e-9);
        assert!((curve.miss_ratio_at(15) - 0.6).abs() < 1e-9);
        assert!((curve.miss_ratio_at(10_000) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stream() {
        let curve = MissRatioCurve::from_counts(&[], 10, 0, 1.0);
        assert_eq!(curve.points(), &[(0, 1.0)]);
    }
}
