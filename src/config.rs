//! Per-run configuration for the shape-from-shading pipeline
//!
//! One immutable value object is constructed per run and passed by reference
//! into every component; nothing mutates shared parameters mid-run.

use crate::types::{HeightField, SfsError, SfsResult};
use serde::{Deserialize, Serialize};

/// How the height field is seeded before the first iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum InitialSurface {
    /// All-zero field
    #[default]
    Flat,
    /// Scaled image intensity, (I - 0.5) * 10 after a light pre-smooth
    ImageSeeded,
    /// Deterministic pseudo-random perturbation around zero
    Random { seed: u64 },
    /// Caller-supplied field, must match the image shape
    Provided(HeightField),
}

/// Step strategy used by the solver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepPolicyKind {
    /// Fixed-rate gradient descent with decaying momentum
    Momentum,
    /// Limited-memory BFGS with line search and a per-cell height box
    BoundedQuasiNewton {
        /// Number of curvature pairs retained
        memory: usize,
        /// Inclusive per-cell bounds on height, (lo, hi)
        height_bounds: (f32, f32),
    },
}

impl Default for StepPolicyKind {
    fn default() -> Self {
        StepPolicyKind::Momentum
    }
}

/// Edge-preserving smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingParams {
    /// Whether the periodic bilateral pass runs at all
    pub enabled: bool,
    /// Apply the bilateral pass every `period` iterations
    pub period: usize,
    /// Range sigma of the original-vs-blur blend weight
    pub sigma_color: f32,
    /// Spatial sigma of the underlying Gaussian blur, in pixels
    pub sigma_spatial: f32,
    /// Sigma of the single Gaussian pass applied at termination
    pub final_sigma: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 10,
            sigma_color: 0.03,
            sigma_spatial: 2.0,
            final_sigma: 0.2,
        }
    }
}

/// Normalization mode used when mapping relative heights to physical units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NormalizationMode {
    /// Percentile/median normalization that resists outlier compression
    Robust,
    /// Plain min-max normalization
    Standard,
    /// Linear scale from imaging geometry, mean-centered (no range mapping)
    PixelScale {
        detector_pixel_width_um: f64,
        spacecraft_altitude_km: f64,
        focal_length_mm: f64,
    },
}

impl Default for NormalizationMode {
    fn default() -> Self {
        NormalizationMode::Robust
    }
}

/// Physical scaling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingParams {
    pub mode: NormalizationMode,
    /// Minimum output elevation in physical units
    pub min_height: f32,
    /// Maximum output elevation in physical units
    pub max_height: f32,
    /// Skewness-triggered gamma shaping of the normalized field
    pub feature_enhancement: bool,
}

impl Default for ScalingParams {
    fn default() -> Self {
        Self {
            mode: NormalizationMode::Robust,
            min_height: -2000.0,
            max_height: 2000.0,
            feature_enhancement: true,
        }
    }
}

/// Complete configuration for one optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfsConfig {
    /// Sun azimuth in degrees, clockwise from north
    pub sun_azimuth_deg: f64,
    /// Sun elevation in degrees above the horizon
    pub sun_elevation_deg: f64,
    pub initial_surface: InitialSurface,
    pub max_iterations: usize,
    /// Mean absolute per-cell height change below which the run converges
    pub convergence_threshold: f64,
    /// Smoothness prior weight; <= 0 disables regularization
    pub regularization_lambda: f32,
    /// Scale lambda by 1 + ln(H*W)/20 for large grids
    pub adaptive_regularization: bool,
    /// Boost photometric updates near strong observed edges
    pub edge_aware_weighting: bool,
    pub step_policy: StepPolicyKind,
    pub smoothing: SmoothingParams,
    pub scaling: ScalingParams,
}

impl Default for SfsConfig {
    fn default() -> Self {
        Self {
            sun_azimuth_deg: 101.554510,
            sun_elevation_deg: 34.802249,
            initial_surface: InitialSurface::Flat,
            max_iterations: 200,
            convergence_threshold: 5e-8,
            regularization_lambda: 0.03,
            adaptive_regularization: true,
            edge_aware_weighting: true,
            step_policy: StepPolicyKind::Momentum,
            smoothing: SmoothingParams::default(),
            scaling: ScalingParams::default(),
        }
    }
}

impl SfsConfig {
    /// Check parameter consistency before any optimization work begins
    pub fn validate(&self) -> SfsResult<()> {
        if !self.sun_azimuth_deg.is_finite() || !self.sun_elevation_deg.is_finite() {
            return Err(SfsError::InvalidInput(
                "Sun azimuth/elevation must be finite".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(SfsError::InvalidInput(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(SfsError::InvalidInput(
                "convergence_threshold must be positive".to_string(),
            ));
        }
        if self.smoothing.enabled {
            if self.smoothing.period == 0 {
                return Err(SfsError::InvalidInput(
                    "smoothing period must be positive".to_string(),
                ));
            }
            if self.smoothing.sigma_color <= 0.0 || self.smoothing.sigma_spatial <= 0.0 {
                return Err(SfsError::InvalidInput(
                    "bilateral sigmas must be positive".to_string(),
                ));
            }
        }
        if let StepPolicyKind::BoundedQuasiNewton {
            memory,
            height_bounds: (lo, hi),
        } = &self.step_policy
        {
            if *memory == 0 {
                return Err(SfsError::InvalidInput(
                    "quasi-Newton memory must be positive".to_string(),
                ));
            }
            if !(lo < hi) {
                return Err(SfsError::InvalidInput(format!(
                    "Height bounds are inverted or degenerate: [{}, {}]",
                    lo, hi
                )));
            }
        }
        if self.scaling.min_height >= self.scaling.max_height {
            return Err(SfsError::InvalidInput(format!(
                "min_height {} must be below max_height {}",
                self.scaling.min_height, self.scaling.max_height
            )));
        }
        if let NormalizationMode::PixelScale {
            detector_pixel_width_um,
            spacecraft_altitude_km,
            focal_length_mm,
        } = &self.scaling.mode
        {
            if *detector_pixel_width_um <= 0.0
                || *spacecraft_altitude_km <= 0.0
                || *focal_length_mm <= 0.0
            {
                return Err(SfsError::InvalidInput(
                    "Pixel-scale geometry parameters must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SfsConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_elevation_bounds_are_rejected() {
        let mut config = SfsConfig::default();
        config.scaling.min_height = 100.0;
        config.scaling.max_height = -100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iteration_budget_is_rejected() {
        let config = SfsConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn degenerate_height_box_is_rejected() {
        let config = SfsConfig {
            step_policy: StepPolicyKind::BoundedQuasiNewton {
                memory: 8,
                height_bounds: (5.0, 5.0),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
