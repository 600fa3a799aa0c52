use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued raster data type
pub type GridReal = f32;

/// 2D intensity grid (rows x cols, row-major), values in [0, 1]
pub type ImageGrid = Array2<GridReal>;

/// 2D relative height grid, arbitrary units until scaled
pub type HeightField = Array2<GridReal>;

/// 2D predicted brightness grid, values >= 0
pub type ReflectanceMap = Array2<GridReal>;

/// Unit illumination direction (x east, y north, z up)
///
/// Kept in f64: the unit-norm contract is tighter than f32 rounding.
pub type LightVector = [f64; 3];

/// Pair of partial-derivative grids (dZ/dx, dZ/dy)
pub type GradientField = (Array2<GridReal>, Array2<GridReal>);

/// How a solver run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Mean absolute height change dropped below the configured threshold
    Converged,
    /// Iteration budget exhausted before convergence; the field is still usable
    IterationBudgetExhausted,
    /// Cooperative cancellation observed at an iteration boundary
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Converged => write!(f, "converged"),
            TerminationReason::IterationBudgetExhausted => write!(f, "budget-exhausted"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-iteration convergence diagnostics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based iteration index
    pub iteration: usize,
    /// Total photometric + smoothness cost
    pub residual: f64,
    /// Mean absolute cost gradient over all cells
    pub mean_abs_gradient: f64,
    /// Mean absolute per-cell height change produced by the step
    pub mean_abs_delta: f64,
}

/// Append-only record of the optimization, one entry per completed iteration
pub type OptimizationTrace = Vec<IterationRecord>;

/// Complete result of a solver run
///
/// Every non-fatal outcome (converged, exhausted, cancelled) returns a fully
/// populated solution; callers never special-case partial results.
#[derive(Debug, Clone)]
pub struct SfsSolution {
    /// Final relative height field, same shape as the input image
    pub height: HeightField,
    /// Convergence diagnostics, `trace.len() == iterations`
    pub trace: OptimizationTrace,
    /// Why iteration stopped
    pub reason: TerminationReason,
    /// Convenience flag, `reason == Converged`
    pub converged: bool,
    /// Number of completed iterations
    pub iterations: usize,
}

/// Error types for the shape-from-shading core
#[derive(Debug, thiserror::Error)]
pub enum SfsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numerical instability at iteration {iteration}: {message}")]
    NumericalInstability {
        /// Last iteration the solver entered before the blow-up
        iteration: usize,
        message: String,
        /// Diagnostics collected up to the failure, for post-mortems
        trace: OptimizationTrace,
    },
}

/// Result type for shape-from-shading operations
pub type SfsResult<T> = Result<T, SfsError>;

/// Validate an intensity image before any optimization work begins
///
/// Rejects empty grids and non-finite pixels; both are always fatal.
pub fn validate_image(image: &ImageGrid) -> SfsResult<()> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Err(SfsError::InvalidInput(format!(
            "Image is empty ({}x{})",
            rows, cols
        )));
    }
    if !image.iter().all(|v| v.is_finite()) {
        return Err(SfsError::InvalidInput(
            "Image contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
