//! Photoclin: A Fast, Modular Shape-from-Shading DEM Generator
//!
//! This library recovers digital elevation models from single grayscale
//! orbital images with a known sun position, using a Lambertian reflectance
//! model and iterative photoclinometric optimization.

pub mod types;
pub mod config;
pub mod core;

// Re-export main types and functions for easier access
pub use config::{
    InitialSurface, NormalizationMode, ScalingParams, SfsConfig, SmoothingParams, StepPolicyKind,
};
pub use types::{
    HeightField, ImageGrid, IterationRecord, OptimizationTrace, ReflectanceMap, SfsError,
    SfsResult, SfsSolution, TerminationReason,
};

pub use core::quality::DemQualityReport;
pub use core::scaling::PhysicalScaler;
pub use core::solver::{CancelToken, Solver};

/// Everything one pipeline run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Physically scaled elevation model
    pub dem: HeightField,
    /// Relative (unscaled) solver output
    pub relative_height: HeightField,
    pub trace: OptimizationTrace,
    pub reason: TerminationReason,
    pub quality: DemQualityReport,
}

/// Run the full pipeline: optimize, scale to physical units, assess quality
pub fn run_pipeline(image: &ImageGrid, config: &SfsConfig) -> SfsResult<PipelineOutput> {
    run_pipeline_cancellable(image, config, &CancelToken::new())
}

/// [`run_pipeline`] with cooperative cancellation
pub fn run_pipeline_cancellable(
    image: &ImageGrid,
    config: &SfsConfig,
    cancel: &CancelToken,
) -> SfsResult<PipelineOutput> {
    let solution = Solver::new(config.clone()).run_cancellable(image, cancel)?;
    let scaler = PhysicalScaler::new(config.scaling.clone());
    let dem = scaler.scale(&solution.height)?;
    let quality = core::quality::assess_dem(&dem, image)?;
    log::info!(
        "Pipeline finished: {} after {} iterations, quality {}/100",
        solution.reason,
        solution.iterations,
        quality.quality_score
    );
    Ok(PipelineOutput {
        dem,
        relative_height: solution.height,
        trace: solution.trace,
        reason: solution.reason,
        quality,
    })
}

#[cfg(feature = "python")]
mod python {
    use super::*;
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::prelude::*;

    fn to_py_err(e: SfsError) -> PyErr {
        match e {
            SfsError::InvalidInput(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(generate_dem, m)?)?;
        m.add_function(wrap_pyfunction!(render_hillshade, m)?)?;
        Ok(())
    }

    /// Recover a DEM from a single grayscale image
    #[pyfunction]
    #[pyo3(signature = (image, sun_azimuth=101.554510, sun_elevation=34.802249, max_iterations=200))]
    fn generate_dem<'py>(
        py: Python<'py>,
        image: PyReadonlyArray2<'py, f32>,
        sun_azimuth: f64,
        sun_elevation: f64,
        max_iterations: usize,
    ) -> PyResult<(&'py PyArray2<f32>, u32)> {
        let image = image.as_array().to_owned();
        let config = SfsConfig {
            sun_azimuth_deg: sun_azimuth,
            sun_elevation_deg: sun_elevation,
            max_iterations,
            ..Default::default()
        };
        let output = run_pipeline(&image, &config).map_err(to_py_err)?;
        Ok((
            output.dem.into_pyarray(py),
            output.quality.quality_score,
        ))
    }

    /// Shaded relief of an existing DEM
    #[pyfunction]
    fn render_hillshade<'py>(
        py: Python<'py>,
        dem: PyReadonlyArray2<'py, f32>,
        sun_azimuth: f64,
        sun_elevation: f64,
    ) -> PyResult<&'py PyArray2<f32>> {
        let dem = dem.as_array().to_owned();
        Ok(core::reflectance::hillshade(&dem, sun_azimuth, sun_elevation).into_pyarray(py))
    }
}
