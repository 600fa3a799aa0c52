//! Calibration of the relative height field into physical elevation units
//!
//! The robust path is an empirically tuned feature-preservation transform,
//! not a principled statistical one: percentile-based centering keeps a
//! handful of extreme cells from compressing the dynamic range of the rest
//! of the terrain, and a skewness-triggered gamma expands whichever tail
//! dominates (low values when craters dominate, high values when peaks do).
//! The exact constants are part of the pipeline's established behavior;
//! changing them is a behavior change, not a cleanup.

use crate::config::{NormalizationMode, ScalingParams};
use crate::types::{GridReal, HeightField, SfsError, SfsResult};
use ndarray::Array2;

/// Maps a converged relative field into calibrated elevation
pub struct PhysicalScaler {
    params: ScalingParams,
}

impl PhysicalScaler {
    pub fn new(params: ScalingParams) -> Self {
        Self { params }
    }

    /// One-shot calibration; a pure function of (field, params)
    ///
    /// Every transform in here is monotonic, so the relative ordering of
    /// cells is preserved, and repeated calls are bit-identical.
    pub fn scale(&self, relative: &HeightField) -> SfsResult<Array2<GridReal>> {
        if relative.is_empty() {
            return Err(SfsError::InvalidInput(
                "Cannot scale an empty height field".to_string(),
            ));
        }
        if !relative.iter().all(|v| v.is_finite()) {
            return Err(SfsError::InvalidInput(
                "Height field contains non-finite values".to_string(),
            ));
        }

        match &self.params.mode {
            NormalizationMode::Robust => {
                let mut norm = self.robust_normalize(relative);
                if self.params.feature_enhancement {
                    apply_adaptive_gamma(&mut norm);
                }
                Ok(self.map_to_range(norm))
            }
            NormalizationMode::Standard => {
                let norm = min_max_normalize(relative);
                Ok(self.map_to_range(norm))
            }
            NormalizationMode::PixelScale {
                detector_pixel_width_um,
                spacecraft_altitude_km,
                focal_length_mm,
            } => {
                // Ground sampling distance from imaging geometry; the SFS
                // output is height in pixel units, multiply to get meters
                let pixel_size_m = (detector_pixel_width_um * 1e-6)
                    * (spacecraft_altitude_km * 1000.0)
                    / (focal_length_mm * 1e-3);
                log::info!("Estimated pixel scale: {:.2} m/pixel", pixel_size_m);

                let mut scaled = relative.mapv(|v| v * pixel_size_m as f32);
                let mean = scaled.sum() / scaled.len() as f32;
                scaled.mapv_inplace(|v| v - mean);
                Ok(scaled)
            }
        }
    }

    /// Percentile/median normalization into [0, 1]
    fn robust_normalize(&self, field: &HeightField) -> Array2<GridReal> {
        let mut sorted: Vec<f32> = field.iter().copied().collect();
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            sorted.par_sort_unstable_by(|a, b| a.total_cmp(b));
        }
        #[cfg(not(feature = "parallel"))]
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));
        let p1 = percentile(&sorted, 1.0);
        let p99 = percentile(&sorted, 99.0);
        let median = percentile(&sorted, 50.0);

        if p99 > p1 {
            let scale = p99 - p1;
            // Map the robust core to [0.1, 0.9] so genuine extremes keep
            // headroom instead of saturating immediately
            field.mapv(|v| (((v - median) / scale) * 0.4 + 0.5).clamp(0.0, 1.0))
        } else {
            log::debug!("Degenerate percentile spread, falling back to min-max");
            min_max_normalize(field)
        }
    }

    fn map_to_range(&self, norm: Array2<GridReal>) -> Array2<GridReal> {
        let lo = self.params.min_height;
        let span = self.params.max_height - self.params.min_height;
        norm.mapv(|v| lo + v * span)
    }
}

/// Plain min-max normalization into [0, 1], safe on constant fields
fn min_max_normalize(field: &HeightField) -> Array2<GridReal> {
    let min = field.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = field.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let range = (max - min).max(1e-8);
    field.mapv(|v| (v - min) / range)
}

/// Skewness-triggered gamma shaping of a [0, 1] field, in place
///
/// Positive skew (crater-dominated) brightens the low tail with gamma 0.7,
/// negative skew (peak-dominated) expands the high tail with gamma 1.3, a
/// balanced field gets a mild 0.85.
fn apply_adaptive_gamma(norm: &mut Array2<GridReal>) {
    let n = norm.len() as f64;
    let mean = norm.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = norm.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    let skew = norm.iter().map(|&v| (v as f64 - mean).powi(3)).sum::<f64>() / n
        / (std.powi(3) + 1e-8);

    let gamma = if skew > 0.1 {
        0.7
    } else if skew < -0.1 {
        1.3
    } else {
        0.85
    };
    log::debug!("Surface skewness {:.3}, applying gamma {}", skew, gamma);
    norm.mapv_inplace(|v| v.powf(gamma));
}

/// Linear-interpolated percentile of pre-sorted values, numpy-style
fn percentile(sorted: &[f32], q: f32) -> f32 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let frac = rank - lower as f32;
    sorted[lower] * (1.0 - frac) + sorted[upper] * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn robust_params() -> ScalingParams {
        ScalingParams {
            mode: NormalizationMode::Robust,
            min_height: -2000.0,
            max_height: 2000.0,
            feature_enhancement: true,
        }
    }

    fn ripple_field() -> HeightField {
        HeightField::from_shape_fn((20, 20), |(i, j)| {
            ((i as f32 * 0.37).sin() + (j as f32 * 0.61).cos()) * 5.0
        })
    }

    #[test]
    fn output_stays_within_elevation_bounds() {
        let scaler = PhysicalScaler::new(robust_params());
        let dem = scaler.scale(&ripple_field()).unwrap();
        assert!(dem
            .iter()
            .all(|&v| (-2000.0..=2000.0).contains(&v)), "out-of-bounds cell");
    }

    #[test]
    fn relative_ordering_is_preserved() {
        let field = ripple_field();
        for params in [
            robust_params(),
            ScalingParams {
                mode: NormalizationMode::Standard,
                feature_enhancement: false,
                ..robust_params()
            },
        ] {
            let dem = PhysicalScaler::new(params).scale(&field).unwrap();
            let mut cells: Vec<(f32, f32)> =
                field.iter().copied().zip(dem.iter().copied()).collect();
            cells.sort_by(|a, b| a.0.total_cmp(&b.0));
            for pair in cells.windows(2) {
                assert!(
                    pair[1].1 >= pair[0].1,
                    "ordering violated: {:?} -> {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn scaling_is_idempotent_bitwise() {
        let field = ripple_field();
        let scaler = PhysicalScaler::new(robust_params());
        let a = scaler.scale(&field).unwrap();
        let b = scaler.scale(&field).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn robust_mode_resists_outlier_compression() {
        // One wild cell; standard min-max squashes the terrain into a sliver
        // of the output range, robust keeps its spread.
        let mut field = ripple_field();
        field[[0, 0]] = 1.0e4;

        let spread = |dem: &Array2<f32>| {
            let mut vals: Vec<f32> = dem.iter().copied().collect();
            vals.sort_by(|a, b| a.total_cmp(b));
            let p = |q| percentile(&vals, q);
            p(95.0) - p(5.0)
        };

        let robust = PhysicalScaler::new(robust_params()).scale(&field).unwrap();
        let standard = PhysicalScaler::new(ScalingParams {
            mode: NormalizationMode::Standard,
            feature_enhancement: false,
            ..robust_params()
        })
        .scale(&field)
        .unwrap();
        assert!(spread(&robust) > 4.0 * spread(&standard));
    }

    #[test]
    fn constant_field_scales_without_dividing_by_zero() {
        let field = HeightField::from_elem((8, 8), 2.5);
        for mode in [NormalizationMode::Robust, NormalizationMode::Standard] {
            let dem = PhysicalScaler::new(ScalingParams {
                mode,
                ..robust_params()
            })
            .scale(&field)
            .unwrap();
            assert!(dem.iter().all(|v| v.is_finite()));
            assert!(dem.iter().all(|&v| (-2000.0..=2000.0).contains(&v)));
        }
    }

    #[test]
    fn pixel_scale_mode_is_linear_and_mean_centered() {
        let field = HeightField::from_shape_fn((4, 4), |(i, _)| i as f32);
        let dem = PhysicalScaler::new(ScalingParams {
            mode: NormalizationMode::PixelScale {
                detector_pixel_width_um: 7.0,
                spacecraft_altitude_km: 100.0,
                focal_length_mm: 140.0,
            },
            ..robust_params()
        })
        .scale(&field)
        .unwrap();

        // 7e-6 * 1e5 / 0.14 = 5 m/pixel
        let mean = dem.sum() / dem.len() as f32;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-3);
        assert_relative_eq!(dem[[1, 0]] - dem[[0, 0]], 5.0, epsilon = 1e-3);
    }

    #[test]
    fn non_finite_field_is_rejected() {
        let mut field = ripple_field();
        field[[3, 3]] = f32::NAN;
        assert!(PhysicalScaler::new(robust_params()).scale(&field).is_err());
    }
}
