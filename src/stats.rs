use serde::{Deserialize, Serialize};

pub const DEFAULT_SENSITIVITY: f64 = 1.7;
pub const SENSITIVITY_STEP: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Intensity band used to binarize a slice before the watershed.
///
/// `min_threshold`/`max_threshold` are raw pixel values that define the
/// 8-bit normalization; `lower_threshold`/`upper_threshold` live in the
/// normalized `[0, 255]` space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdBand {
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub lower_threshold: f64,
    pub upper_threshold: f64,
}

/// Multiplier on the standard deviation that sets the band width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensitivityFactor(f64);

impl Default for SensitivityFactor {
    fn default() -> Self {
        Self(DEFAULT_SENSITIVITY)
    }
}

impl SensitivityFactor {
    pub fn new(value: f64) -> Self {
        Self(value.max(0.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn increase(&mut self) {
        self.0 += SENSITIVITY_STEP;
    }

    pub fn decrease(&mut self) {
        self.0 = (self.0 - SENSITIVITY_STEP).max(0.0);
    }
}

/// Linear map of `value` from `[in_min, in_max]` onto `[0, 255]`.
///
/// A degenerate range maps everything to `0`.
#[inline]
pub fn map_to_range(value: f64, in_min: f64, in_max: f64) -> f64 {
    let span = in_max - in_min;
    if span <= 0.0 || !span.is_finite() {
        return 0.0;
    }
    (value - in_min) / span * 255.0
}

/// Observed `(min, max)` of the finite samples, `(0, 0)` for an empty buffer.
pub fn min_max(pixels: &[f32]) -> (f64, f64) {
    let (min, max) = pixels
        .iter()
        .filter(|value| value.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
            (min.min(value), max.max(value))
        });
    if min > max {
        (0.0, 0.0)
    } else {
        (min as f64, max as f64)
    }
}

/// Mean and population standard deviation of the pixels under `coords`.
///
/// Returns `None` when no coordinate addresses a sample.
pub fn calculate_stats(
    pixels: &[f32],
    columns: usize,
    coords: &[(usize, usize)],
) -> Option<RegionStats> {
    let mut sum = 0.0_f64;
    let mut sum_squares = 0.0_f64;
    let mut count = 0usize;

    for &(x, y) in coords {
        if x >= columns {
            continue;
        }
        let Some(&value) = pixels.get(y * columns + x) else {
            continue;
        };
        let value = value as f64;
        sum += value;
        sum_squares += value * value;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    let variance = (sum_squares / count as f64 - mean * mean).max(0.0);
    Some(RegionStats {
        mean,
        std_dev: variance.sqrt(),
    })
}

impl ThresholdBand {
    /// Derive the band from the region under `coords`.
    pub fn estimate(
        pixels: &[f32],
        columns: usize,
        coords: &[(usize, usize)],
        min_override: Option<f64>,
        max_override: Option<f64>,
        sensitivity: SensitivityFactor,
    ) -> Option<Self> {
        let stats = calculate_stats(pixels, columns, coords)?;
        let (observed_min, observed_max) = min_max(pixels);
        let min_threshold = min_override.unwrap_or(observed_min);
        let max_threshold = max_override.unwrap_or(observed_max);
        Some(Self::from_stats(stats, min_threshold, max_threshold, sensitivity))
    }

    pub fn from_stats(
        stats: RegionStats,
        min_threshold: f64,
        max_threshold: f64,
        sensitivity: SensitivityFactor,
    ) -> Self {
        let mean_norm = map_to_range(stats.mean, min_threshold, max_threshold);
        // a deviation is a width, not a position: scale it without the offset
        let std_norm = map_to_range(stats.std_dev + min_threshold, min_threshold, max_threshold);
        let k = sensitivity.value();
        Self {
            min_threshold,
            max_threshold,
            lower_threshold: mean_norm - k * std_norm,
            upper_threshold: mean_norm + k * std_norm,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.min_threshold.is_finite()
            && self.max_threshold.is_finite()
            && self.lower_threshold.is_finite()
            && self.upper_threshold.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_region_has_zero_deviation() {
        let pixels = vec![42.0_f32; 16];
        let coords = [(0, 0), (1, 1), (2, 3), (3, 2)];
        let stats = calculate_stats(&pixels, 4, &coords).expect("non-empty region");
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn empty_region_has_no_stats() {
        assert!(calculate_stats(&[1.0, 2.0], 2, &[]).is_none());
        assert!(calculate_stats(&[1.0, 2.0], 2, &[(5, 0), (0, 9)]).is_none());
    }

    #[test]
    fn stats_index_rows_by_column_count() {
        // 3 columns x 2 rows, row-major
        let pixels = [0.0, 1.0, 2.0, 10.0, 20.0, 30.0];
        let stats = calculate_stats(&pixels, 3, &[(2, 1)]).expect("stats");
        assert_eq!(stats.mean, 30.0);
    }

    #[test]
    fn band_is_ordered_for_any_sensitivity() {
        let pixels: Vec<f32> = (0..100).map(|value| (value * 7 % 31) as f32).collect();
        let coords: Vec<_> = (0..10).flat_map(|y| (0..5).map(move |x| (x, y))).collect();
        for k in [0.0, 0.4, 1.2, 1.7, 5.0] {
            let sensitivity = SensitivityFactor::new(k);
            let band = ThresholdBand::estimate(&pixels, 10, &coords, None, None, sensitivity)
                .expect("band");
            assert!(band.lower_threshold <= band.upper_threshold, "k={k}: {band:?}");
        }
    }

    #[test]
    fn band_uses_observed_range_unless_overridden() {
        let pixels = [0.0_f32, 100.0, 50.0, 50.0];
        let coords = [(0, 1), (1, 1)];
        let sensitivity = SensitivityFactor::default();
        let band =
            ThresholdBand::estimate(&pixels, 2, &coords, None, None, sensitivity).expect("band");
        assert_eq!(band.min_threshold, 0.0);
        assert_eq!(band.max_threshold, 100.0);
        assert!((band.lower_threshold - 127.5).abs() < 1e-9);
        assert!((band.upper_threshold - 127.5).abs() < 1e-9);

        let band =
            ThresholdBand::estimate(&pixels, 2, &coords, Some(50.0), Some(150.0), sensitivity)
                .expect("band");
        assert_eq!(band.min_threshold, 50.0);
        assert!(band.lower_threshold.abs() < 1e-9);
    }

    #[test]
    fn deviation_widens_band_symmetrically() {
        let pixels = [0.0_f32, 255.0, 100.0, 200.0];
        let coords = [(0, 1), (1, 1)];
        let sensitivity = SensitivityFactor::new(1.0);
        let band =
            ThresholdBand::estimate(&pixels, 2, &coords, None, None, sensitivity).expect("band");
        // mean 150, std 50 on a 0..255 range
        assert!((band.lower_threshold - 100.0).abs() < 1e-9);
        assert!((band.upper_threshold - 200.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_range_maps_to_zero() {
        assert_eq!(map_to_range(7.0, 7.0, 7.0), 0.0);
        let pixels = vec![9.0_f32; 4];
        let sensitivity = SensitivityFactor::default();
        let band =
            ThresholdBand::estimate(&pixels, 2, &[(1, 1)], None, None, sensitivity).expect("band");
        assert_eq!(band.lower_threshold, 0.0);
        assert_eq!(band.upper_threshold, 0.0);
    }

    #[test]
    fn sensitivity_steps_and_floors_at_zero() {
        let mut factor = SensitivityFactor::new(0.3);
        factor.increase();
        assert!((factor.value() - 0.5).abs() < 1e-9);
        factor.decrease();
        factor.decrease();
        factor.decrease();
        assert_eq!(factor.value(), 0.0);
    }
}
