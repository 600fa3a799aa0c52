//! DEM quality assessment
//!
//! Numeric quality metrics for a calibrated DEM against its source image:
//! elevation statistics, slope and roughness summaries, photometric
//! correlation, terrain-feature counts and an aggregate 0-100 score. The
//! report is a plain serializable struct; rendering it into prose or plots
//! happens outside the core.

use crate::core::gradient;
use crate::types::{GridReal, HeightField, ImageGrid, SfsError, SfsResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Basic elevation statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationStats {
    pub min_height: f32,
    pub max_height: f32,
    pub mean_height: f32,
    pub std_height: f32,
    pub height_range: f32,
}

/// Slope statistics from the gradient magnitude
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlopeStats {
    pub mean_slope: f32,
    pub max_slope: f32,
    pub std_slope: f32,
    /// Percent of cells steeper than mean + 2 sigma
    pub steep_areas_percent: f32,
}

/// Roughness statistics from the absolute Laplacian
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoughnessStats {
    pub mean_roughness: f32,
    pub max_roughness: f32,
    pub std_roughness: f32,
}

/// Terrain-feature counts used by mission planning upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainFeatures {
    /// Cells deeper than mean - 1.5 sigma
    pub crater_candidates: usize,
    /// Cells higher than mean + 1.5 sigma
    pub ridge_features: usize,
    /// Percent of cells with gradient magnitude below 0.1
    pub flat_terrain_percent: f32,
    /// Cells that are both flat and smooth enough to land on
    pub suitable_landing_sites: usize,
    pub data_completeness_percent: f32,
}

/// Complete quality report for one DEM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemQualityReport {
    pub elevation: ElevationStats,
    pub slope: SlopeStats,
    pub roughness: RoughnessStats,
    pub features: TerrainFeatures,
    /// Pearson correlation between the DEM and the source image
    pub correlation_with_image: f32,
    /// Aggregate 0-100 score
    pub quality_score: u32,
}

/// Assess a calibrated DEM against the image it was derived from
pub fn assess_dem(dem: &HeightField, image: &ImageGrid) -> SfsResult<DemQualityReport> {
    if dem.dim() != image.dim() {
        return Err(SfsError::InvalidInput(format!(
            "DEM {}x{} does not match image {}x{}",
            dem.dim().0,
            dem.dim().1,
            image.dim().0,
            image.dim().1
        )));
    }
    if dem.is_empty() {
        return Err(SfsError::InvalidInput("DEM is empty".to_string()));
    }

    let elevation = elevation_stats(dem);

    let (gx, gy) = gradient::gradients(dem);
    let mut slope_mag = Array2::zeros(dem.dim());
    ndarray::Zip::from(&mut slope_mag)
        .and(&gx)
        .and(&gy)
        .for_each(|m, &x, &y| *m = (x * x + y * y).sqrt());
    let slope = slope_stats(&slope_mag);

    let lap = gradient::laplacian(dem);
    let abs_lap = lap.mapv(f32::abs);
    let (r_mean, r_std) = mean_std(&abs_lap);
    let roughness = RoughnessStats {
        mean_roughness: r_mean,
        max_roughness: abs_lap.iter().fold(0.0f32, |a, &b| a.max(b)),
        std_roughness: r_std,
    };

    let finite = dem.iter().filter(|v| v.is_finite()).count();
    let total = dem.len();
    let crater_floor = elevation.mean_height - 1.5 * elevation.std_height;
    let ridge_ceiling = elevation.mean_height + 1.5 * elevation.std_height;
    let features = TerrainFeatures {
        crater_candidates: dem.iter().filter(|&&v| v < crater_floor).count(),
        ridge_features: dem.iter().filter(|&&v| v > ridge_ceiling).count(),
        flat_terrain_percent: 100.0
            * slope_mag.iter().filter(|&&m| m < 0.1).count() as f32
            / total as f32,
        suitable_landing_sites: slope_mag
            .iter()
            .zip(abs_lap.iter())
            .filter(|(&m, &l)| m < 0.05 && l < 0.1)
            .count(),
        data_completeness_percent: 100.0 * finite as f32 / total as f32,
    };

    let correlation = pearson_correlation(dem, image);

    let quality_score = score(&elevation, &slope, &features, correlation);
    log::info!(
        "DEM quality: score {}/100, correlation {:.3}",
        quality_score,
        correlation
    );

    Ok(DemQualityReport {
        elevation,
        slope,
        roughness,
        features,
        correlation_with_image: correlation,
        quality_score,
    })
}

fn elevation_stats(dem: &HeightField) -> ElevationStats {
    let min = dem.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let max = dem.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let (mean, std) = mean_std(dem);
    ElevationStats {
        min_height: min,
        max_height: max,
        mean_height: mean,
        std_height: std,
        height_range: max - min,
    }
}

fn slope_stats(slope_mag: &Array2<GridReal>) -> SlopeStats {
    let (mean, std) = mean_std(slope_mag);
    let threshold = mean + 2.0 * std;
    SlopeStats {
        mean_slope: mean,
        max_slope: slope_mag.iter().fold(0.0f32, |a, &b| a.max(b)),
        std_slope: std,
        steep_areas_percent: 100.0
            * slope_mag.iter().filter(|&&m| m > threshold).count() as f32
            / slope_mag.len() as f32,
    }
}

fn mean_std(a: &Array2<GridReal>) -> (f32, f32) {
    let n = a.len() as f64;
    let mean = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = a.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

/// Pearson correlation coefficient between two same-shape grids
pub fn pearson_correlation(a: &Array2<GridReal>, b: &Array2<GridReal>) -> f32 {
    debug_assert_eq!(a.dim(), b.dim());
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= 0.0 {
        0.0
    } else {
        (cov / denom) as f32
    }
}

/// Aggregate 0-100 score; the rubric is part of the pipeline's contract
/// with downstream reporting
fn score(
    elevation: &ElevationStats,
    slope: &SlopeStats,
    features: &TerrainFeatures,
    correlation: f32,
) -> u32 {
    let mut score = 0u32;

    // Data completeness and validity
    if features.data_completeness_percent > 99.0 {
        score += 20;
    } else if features.data_completeness_percent > 95.0 {
        score += 15;
    }

    // Elevation variability
    if elevation.height_range > 0.0 {
        if elevation.height_range > 10.0 {
            score += 20;
        } else if elevation.height_range > 5.0 {
            score += 15;
        }
    }

    // Terrain gradients for landing-site assessment
    if slope.mean_slope > 0.01 && slope.mean_slope < 0.5 {
        score += 15;
    }
    if features.flat_terrain_percent > 10.0 {
        score += 10;
    }

    // Photoclinometry correlation accuracy
    if correlation > 0.7 {
        score += 25;
    } else if correlation > 0.5 {
        score += 20;
    } else if correlation > 0.3 {
        score += 15;
    } else if correlation > 0.1 {
        score += 10;
    }

    // Feature detection capability
    if features.crater_candidates > 0 || features.ridge_features > 0 {
        score += 10;
    }

    score
}
