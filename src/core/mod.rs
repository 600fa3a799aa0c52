//! Core shape-from-shading modules

pub mod illumination;
pub mod gradient;
pub mod reflectance;
pub mod cost;
pub mod smoothing;
pub mod solver;
pub mod scaling;
pub mod quality;

// Re-export main types
pub use illumination::light_direction;
pub use reflectance::{hillshade, render_from_gradients, render_reflectance};
pub use cost::{evaluate_cost_and_gradient, CostGradientEvaluator};
pub use smoothing::{gaussian_blur, EdgePreservingSmoother};
pub use solver::{BoundedQuasiNewtonPolicy, CancelToken, MomentumPolicy, Solver, StepPolicy};
pub use scaling::PhysicalScaler;
pub use quality::{assess_dem, DemQualityReport};
