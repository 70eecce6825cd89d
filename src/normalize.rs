// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Percentile normalization of raw scores.
//!
//! A [`PercentileNormalizer`] collects a sample of raw scores, then maps any
//! score to `(0, 1)` through the sample's empirical CDF:
//!
//! - inside `[min, max]` of the sample: piecewise-linear interpolation
//!   through `(sample[i], (i + 1) / (n + 1))`
//! - outside: exponential decay towards 0 (below) or 1 (above) with a
//!   half-life of a quarter of the sample range
//!
//! Samples larger than [`NormalizerConfig::max_sample_size`] are kept as a
//! uniform reservoir sample.
//!
//! # Example
//!
//! ```rust
//! use semrel::normalize::PercentileNormalizer;
//!
//! let mut norm = PercentileNormalizer::default();
//! for x in [0.1, 0.4, 0.2, 0.9, 0.5] {
//!     norm.observe(x);
//! }
//! norm.observations_finished().unwrap();
//!
//! let low = norm.normalize(0.2).unwrap();
//! let high = norm.normalize(0.9).unwrap();
//! assert!(low < high);
//! assert!(norm.normalize(-100.0).unwrap() > 0.0);
//! assert!(norm.normalize(100.0).unwrap() < 1.0);
//! ```
//!
//! # File Format
//!
//! ```text
//! [magic: 4 bytes "PNRM"]
//! [version: u16]
//! [bincode-encoded config, observation count, finished flag, sample]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SemrelError};
use crate::storage::replace_file;

/// Magic bytes for saved normalizer files.
pub const NORMALIZER_MAGIC: &[u8; 4] = b"PNRM";

/// Current normalizer file format version.
pub const NORMALIZER_VERSION: u16 = 1;

/// Percentile points reported by [`PercentileNormalizer::percentiles`].
const DUMP_POINTS: u32 = 20;

/// Configuration for [`PercentileNormalizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Largest number of observations kept.
    ///
    /// Default: 10,000
    pub max_sample_size: usize,

    /// Seed of the reservoir sampling generator.
    pub seed: u64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_sample_size: 10_000,
            seed: 0x5eed,
        }
    }
}

/// Interpolation knots built from a finished sample.
#[derive(Debug, Clone)]
struct Interpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
    min: f64,
    max: f64,
    half_life: f64,
}

impl Interpolator {
    fn new(sorted: &[f64]) -> Self {
        let n = sorted.len();
        let min = sorted[0];
        let max = sorted[n - 1];

        // Tied values are nudged up one ulp per rank so knots strictly increase
        let mut xs: Vec<f64> = Vec::with_capacity(n);
        for &x in sorted {
            let x = match xs.last() {
                Some(&prev) if x <= prev => next_up(prev),
                _ => x,
            };
            xs.push(x);
        }
        let ys = (0..n).map(|i| (i as f64 + 1.0) / (n as f64 + 1.0)).collect();

        let range = max - min;
        let half_life = if range > 0.0 { range / 4.0 } else { 1.0 };

        Self {
            xs,
            ys,
            min,
            max,
            half_life,
        }
    }

    fn value(&self, x: f64) -> f64 {
        let n = self.ys.len();
        if x < self.min {
            let y0 = self.ys[0];
            let y = to_asymptote(self.min - x, self.half_life, y0, 0.0);
            return y.min(next_down(y0)).max(f64::MIN_POSITIVE);
        }
        if x >= self.max {
            let y0 = self.ys[n - 1];
            if x == self.max {
                return y0;
            }
            let y = to_asymptote(x - self.max, self.half_life, y0, 1.0);
            return y.max(next_up(y0)).min(next_down(1.0));
        }

        // First knot strictly right of x
        let i = self.xs.partition_point(|&k| k <= x);
        if i == 0 {
            return self.ys[0];
        }
        if i == n {
            return self.ys[n - 1];
        }
        let (x0, x1) = (self.xs[i - 1], self.xs[i]);
        let (y0, y1) = (self.ys[i - 1], self.ys[i]);
        y0 + (x - x0) / (x1 - x0) * (y1 - y0)
    }
}

/// Exponential approach from `y0` towards `y_inf`, halving the remaining
/// distance every `half_life`.
fn to_asymptote(delta: f64, half_life: f64, y0: f64, y_inf: f64) -> f64 {
    y_inf + (y0 - y_inf) * 0.5f64.powf(delta / half_life)
}

/// Next representable value above a finite `x`.
fn next_up(x: f64) -> f64 {
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// Next representable value below a finite `x`.
fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

#[derive(Serialize, Deserialize)]
struct SavedNormalizer {
    config: NormalizerConfig,
    observed: u64,
    finished: bool,
    sample: Vec<f64>,
}

/// Maps raw scores to `(0, 1)` by their rank in an observed sample.
///
/// Lifecycle: [`observe`](Self::observe) any number of scores, then call
/// [`observations_finished`](Self::observations_finished). Only then does
/// [`normalize`](Self::normalize) work. Observing more scores afterwards
/// reopens the sample until the next `observations_finished`.
#[derive(Debug, Clone)]
pub struct PercentileNormalizer {
    config: NormalizerConfig,
    sample: Vec<f64>,
    observed: u64,
    rng: ChaCha8Rng,
    interpolator: Option<Interpolator>,
}

impl PercentileNormalizer {
    /// Create an empty normalizer.
    pub fn new(config: NormalizerConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            sample: Vec::new(),
            observed: 0,
            rng,
            interpolator: None,
        }
    }

    /// The normalizer configuration.
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Record a raw score. NaN and infinite scores are ignored.
    pub fn observe(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.interpolator = None;
        self.observed += 1;

        if self.sample.len() < self.config.max_sample_size {
            self.sample.push(x);
        } else if self.config.max_sample_size > 0 {
            // Reservoir sampling: keep each observation with equal probability
            let j = self.rng.gen_range(0..self.observed);
            if (j as usize) < self.config.max_sample_size {
                self.sample[j as usize] = x;
            }
        }
    }

    /// Finish observing and build the interpolation.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::EmptySample` if nothing was observed.
    pub fn observations_finished(&mut self) -> Result<()> {
        if self.sample.is_empty() {
            return Err(SemrelError::EmptySample);
        }
        self.sample.sort_by(|a, b| a.total_cmp(b));
        self.interpolator = Some(Interpolator::new(&self.sample));
        Ok(())
    }

    /// Returns `true` once the interpolation is built.
    pub fn is_finished(&self) -> bool {
        self.interpolator.is_some()
    }

    /// Discard all observations.
    pub fn reset(&mut self) {
        self.sample.clear();
        self.observed = 0;
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.interpolator = None;
    }

    /// Normalized value of `x` in `(0, 1)`.
    ///
    /// Non-decreasing in `x`. Values below the sample minimum map strictly
    /// below `normalize(min)` and above 0; values above the sample maximum
    /// map strictly above `normalize(max)` and below 1. NaN maps to NaN.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::NotBuilt` before
    /// [`observations_finished`](Self::observations_finished).
    pub fn normalize(&self, x: f64) -> Result<f64> {
        let interpolator = self.interpolator()?;
        if x.is_nan() {
            return Ok(f64::NAN);
        }
        Ok(interpolator.value(x))
    }

    /// Number of scores observed, including those not kept in the sample.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Number of scores kept in the sample.
    pub fn sample_size(&self) -> usize {
        self.sample.len()
    }

    /// Smallest and largest sampled score.
    pub fn range(&self) -> Result<(f64, f64)> {
        let interpolator = self.interpolator()?;
        Ok((interpolator.min, interpolator.max))
    }

    /// Sample values at 0%, 5%, ..., 100%.
    pub fn percentiles(&self) -> Result<Vec<(u32, f64)>> {
        self.interpolator()?;
        let n = self.sample.len();
        Ok((0..=DUMP_POINTS)
            .map(|i| {
                let p = i * 100 / DUMP_POINTS;
                let index = (p as usize * n / 100).min(n - 1);
                (p, self.sample[index])
            })
            .collect())
    }

    /// One-line summary of [`percentiles`](Self::percentiles).
    pub fn dump(&self) -> Result<String> {
        let points: Vec<String> = self
            .percentiles()?
            .into_iter()
            .map(|(p, v)| format!("{}%: {}", p, v))
            .collect();
        Ok(format!("percentile normalizer: {}", points.join(", ")))
    }

    fn interpolator(&self) -> Result<&Interpolator> {
        self.interpolator.as_ref().ok_or_else(|| {
            SemrelError::NotBuilt("percentile normalizer observations not finished".to_string())
        })
    }

    /// Save the sample to a file.
    ///
    /// The file is written next to `path`, synced, then moved into place,
    /// so a crash leaves either the old file or the new one.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        let write = || -> Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);

            writer.write_all(NORMALIZER_MAGIC)?;
            writer.write_all(&NORMALIZER_VERSION.to_le_bytes())?;

            let saved = SavedNormalizer {
                config: self.config.clone(),
                observed: self.observed,
                finished: self.interpolator.is_some(),
                sample: self.sample.clone(),
            };
            bincode::serialize_into(&mut writer, &saved)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| SemrelError::Io(e.into_error()))?
                .sync_all()?;
            Ok(())
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        replace_file(&temp_path, path)?;
        Ok(())
    }

    /// Load a normalizer written by [`save`](Self::save). A finished
    /// normalizer is ready to use immediately.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::CorruptedFile` on a bad magic number or version.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != NORMALIZER_MAGIC {
            return Err(SemrelError::CorruptedFile(format!(
                "{}: invalid magic bytes - not a normalizer file",
                path.display()
            )));
        }

        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes)?;
        let version = u16::from_le_bytes(version_bytes);
        if version != NORMALIZER_VERSION {
            return Err(SemrelError::CorruptedFile(format!(
                "{}: unsupported normalizer version {} (expected {})",
                path.display(),
                version,
                NORMALIZER_VERSION
            )));
        }

        let saved: SavedNormalizer = bincode::deserialize_from(&mut reader)?;
        let mut normalizer = Self::new(saved.config);
        normalizer.sample = saved.sample;
        normalizer.observed = saved.observed;
        if saved.finished {
            normalizer.observations_finished()?;
        }
        Ok(normalizer)
    }
}

impl Default for PercentileNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn finished(values: &[f64]) -> PercentileNormalizer {
        let mut norm = PercentileNormalizer::default();
        for &v in values {
            norm.observe(v);
        }
        norm.observations_finished().unwrap();
        norm
    }

    #[test]
    fn test_not_built_before_finish() {
        let mut norm = PercentileNormalizer::default();
        norm.observe(1.0);
        assert!(matches!(norm.normalize(1.0), Err(SemrelError::NotBuilt(_))));
        assert!(matches!(norm.dump(), Err(SemrelError::NotBuilt(_))));
    }

    #[test]
    fn test_empty_sample_rejected() {
        let mut norm = PercentileNormalizer::default();
        norm.observe(f64::NAN);
        assert!(matches!(norm.observations_finished(), Err(SemrelError::EmptySample)));
    }

    #[test]
    fn test_knots() {
        let norm = finished(&[3.0, 1.0, 2.0]);
        assert_eq!(norm.normalize(1.0).unwrap(), 0.25);
        assert_eq!(norm.normalize(2.0).unwrap(), 0.5);
        assert_eq!(norm.normalize(3.0).unwrap(), 0.75);
        assert_relative_eq!(norm.normalize(1.5).unwrap(), 0.375, epsilon = 1e-12);
        assert_eq!(norm.range().unwrap(), (1.0, 3.0));
    }

    #[test]
    fn test_tails() {
        let norm = finished(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let y_min = norm.normalize(0.0).unwrap();
        let y_max = norm.normalize(4.0).unwrap();

        // One half-life below the minimum halves the distance to 0
        let below = norm.normalize(-1.0).unwrap();
        assert_relative_eq!(below, y_min / 2.0, epsilon = 1e-12);
        assert!(below < y_min);
        assert!(norm.normalize(-1e300).unwrap() > 0.0);
        assert!(norm.normalize(f64::NEG_INFINITY).unwrap() > 0.0);

        let above = norm.normalize(5.0).unwrap();
        assert!(above > y_max);
        assert!(norm.normalize(1e300).unwrap() < 1.0);
        assert!(norm.normalize(f64::INFINITY).unwrap() < 1.0);
    }

    #[test]
    fn test_ties_monotonic() {
        let norm = finished(&[5.0, 5.0, 5.0, 1.0]);
        let ys: Vec<f64> = [1.0, 5.0, 5.0, 5.0]
            .iter()
            .map(|&x| norm.normalize(x).unwrap())
            .collect();
        assert!(ys.windows(2).all(|w| w[0] <= w[1]));
        assert!(norm.normalize(0.0).unwrap() < ys[0]);
        assert!(norm.normalize(6.0).unwrap() > ys[3]);
    }

    #[test]
    fn test_clustered_far_from_zero() {
        let values: Vec<f64> = (0..10_000).map(|i| 1000.0 + i as f64 * 1e-4).collect();
        let norm = finished(&values);
        let (_, max) = norm.range().unwrap();

        assert_relative_eq!(norm.normalize(1000.5).unwrap(), 0.5, epsilon = 1e-3);
        assert_relative_eq!(norm.normalize(1000.25).unwrap(), 0.25, epsilon = 1e-3);

        let at_max = norm.normalize(max).unwrap();
        assert_eq!(at_max, 10_000.0 / 10_001.0);
        let just_above = norm.normalize(max + 1e-9).unwrap();
        assert!(just_above > at_max);
        assert!(just_above - at_max < 1e-9, "jump {}", just_above - at_max);
    }

    #[test]
    fn test_next_up_down() {
        for x in [-2.5, -f64::MIN_POSITIVE, 0.0, 1e-300, 1.0, 1e300] {
            assert!(next_up(x) > x);
            assert!(next_down(x) < x);
            assert_eq!(next_down(next_up(x)), x);
        }
    }

    #[test]
    fn test_single_value_sample() {
        let norm = finished(&[2.0]);
        assert_relative_eq!(norm.normalize(2.0).unwrap(), 0.5);
        let below = norm.normalize(1.0).unwrap();
        let above = norm.normalize(3.0).unwrap();
        assert!(below > 0.0 && below < 0.5);
        assert!(above > 0.5 && above < 1.0);
    }

    #[test]
    fn test_reservoir_bounds_sample() {
        let mut norm = PercentileNormalizer::new(NormalizerConfig {
            max_sample_size: 100,
            seed: 7,
        });
        for i in 0..10_000 {
            norm.observe(i as f64);
        }
        assert_eq!(norm.sample_size(), 100);
        assert_eq!(norm.observed(), 10_000);
        norm.observations_finished().unwrap();

        // A uniform sample of 0..10000 has its median near 5000
        let median = norm.percentiles().unwrap()[10].1;
        assert!(median > 2_000.0 && median < 8_000.0, "median {}", median);
    }

    #[test]
    fn test_observe_after_finish_reopens() {
        let mut norm = finished(&[1.0, 2.0]);
        norm.observe(3.0);
        assert!(!norm.is_finished());
        norm.observations_finished().unwrap();
        assert_eq!(norm.range().unwrap(), (1.0, 3.0));
    }

    #[test]
    fn test_reset() {
        let mut norm = finished(&[1.0, 2.0]);
        norm.reset();
        assert!(!norm.is_finished());
        assert_eq!(norm.sample_size(), 0);
        assert_eq!(norm.observed(), 0);
    }

    #[test]
    fn test_dump_has_21_points() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let norm = finished(&values);
        let points = norm.percentiles().unwrap();
        assert_eq!(points.len(), 21);
        assert_eq!(points[0], (0, 0.0));
        assert_eq!(points[10], (50, 50.0));
        assert_eq!(points[20], (100, 99.0));
        assert!(norm.dump().unwrap().starts_with("percentile normalizer: 0%: 0"));
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("norm.bin");
        let norm = finished(&[0.3, 0.1, 0.7, 0.2]);
        norm.save(&path).unwrap();

        let loaded = PercentileNormalizer::load(&path).unwrap();
        assert!(loaded.is_finished());
        for x in [-1.0, 0.1, 0.15, 0.5, 0.7, 2.0] {
            assert_eq!(loaded.normalize(x).unwrap(), norm.normalize(x).unwrap());
        }
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("norm.bin");
        finished(&[1.0, 2.0, 3.0]).save(&path).unwrap();

        let second = finished(&[10.0, 20.0]);
        second.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = PercentileNormalizer::load(&path).unwrap();
        assert_eq!(loaded.range().unwrap(), (10.0, 20.0));
        assert_eq!(loaded.sample_size(), 2);
    }

    #[test]
    fn test_load_rejects_other_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.bin");
        std::fs::write(&path, b"NOPE\x01\x00").unwrap();
        assert!(matches!(
            PercentileNormalizer::load(&path),
            Err(SemrelError::CorruptedFile(_))
        ));
    }
}
