//! Photometric + smoothness cost and its analytic height-space gradient
//!
//! Cost = 1/2 sum (I - R)^2 + 1/2 lambda sum (laplacian Z)^2. The
//! photometric term is differentiated through the normal field by the chain
//! rule: per-cell dR/dp and dR/dq, multiplied by the residual, then mapped
//! back into height space by the negative divergence of the slope-space
//! fields. Self-shadowed cells (reflectance at the clamp floor) are masked
//! out of the slope-space fields before the divergence is taken; the slope
//! derivative is undefined at the clamp and must not propagate as noise.
//! The divergence still sweeps across the zeroed region, so a discontinuity
//! exists at mask boundaries. That matches the long-standing behavior of
//! the pipeline and is pinned by a test below.

use crate::core::gradient;
use crate::core::reflectance::{self, NORMAL_DENOM_FLOOR};
use crate::types::{GridReal, HeightField, ImageGrid, LightVector};
use ndarray::Array2;

/// Reflectance at or below this value is treated as self-shadowed
pub const SHADOW_FLOOR: f32 = 1e-6;

/// Reusable evaluator for one (light, lambda) setting
///
/// Owns scratch buffers so the per-iteration hot path performs no
/// allocation. A pure (cost, gradient) function of its inputs otherwise;
/// it drives no optimization itself.
pub struct CostGradientEvaluator {
    light: LightVector,
    lambda: f32,
    /// Optional per-cell weight on the photometric residual term
    residual_weights: Option<Array2<GridReal>>,
    grad_x: Array2<GridReal>,
    grad_y: Array2<GridReal>,
    rendered: Array2<GridReal>,
    slope_p: Array2<GridReal>,
    slope_q: Array2<GridReal>,
    lap: Array2<GridReal>,
    scratch: Array2<GridReal>,
}

impl CostGradientEvaluator {
    /// Create an evaluator for grids of the given shape
    pub fn new(shape: (usize, usize), light: LightVector, lambda: f32) -> Self {
        Self {
            light,
            lambda,
            residual_weights: None,
            grad_x: Array2::zeros(shape),
            grad_y: Array2::zeros(shape),
            rendered: Array2::zeros(shape),
            slope_p: Array2::zeros(shape),
            slope_q: Array2::zeros(shape),
            lap: Array2::zeros(shape),
            scratch: Array2::zeros(shape),
        }
    }

    /// Weight the photometric residual per cell (edge-aware solving)
    pub fn with_residual_weights(mut self, weights: Array2<GridReal>) -> Self {
        self.residual_weights = Some(weights);
        self
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// Compute total cost and write the height-space gradient into `grad_out`
    ///
    /// Cost is accumulated in f64 so the convergence test stays stable on
    /// large grids.
    pub fn evaluate_into(
        &mut self,
        height: &HeightField,
        observed: &ImageGrid,
        grad_out: &mut Array2<GridReal>,
    ) -> f64 {
        debug_assert_eq!(height.dim(), observed.dim());
        debug_assert_eq!(height.dim(), grad_out.dim());

        gradient::gradient_x_into(height, &mut self.grad_x);
        gradient::gradient_y_into(height, &mut self.grad_y);
        reflectance::render_from_gradients_into(
            &self.grad_x,
            &self.grad_y,
            self.light,
            &mut self.rendered,
        );

        let (lx, ly, lz) = (
            self.light[0] as f32,
            self.light[1] as f32,
            self.light[2] as f32,
        );

        // Photometric cost and the slope-space gradient fields
        let mut brightness_cost = 0.0f64;
        {
            let weights = self.residual_weights.as_ref();
            let grad_x = &self.grad_x;
            let grad_y = &self.grad_y;
            let rendered = &self.rendered;
            ndarray::Zip::indexed(&mut self.slope_p)
                .and(&mut self.slope_q)
                .and(grad_x)
                .and(grad_y)
                .and(rendered)
                .for_each(|idx, sp, sq, &p, &q, &r| {
                    let i = observed[idx];
                    let err = i - r;
                    brightness_cost += 0.5 * (err as f64) * (err as f64);

                    if r <= SHADOW_FLOOR {
                        // Back-facing facet: derivative undefined at the clamp
                        *sp = 0.0;
                        *sq = 0.0;
                        return;
                    }

                    let denom = (1.0 + p * p + q * q).sqrt().max(NORMAL_DENOM_FLOOR);
                    let denom3 = denom * denom * denom;
                    // Unnormalized normal-light dot product
                    let dot = -lx * p - ly * q + lz;
                    let dr_dp = (-lx * denom * denom - dot * p) / denom3;
                    let dr_dq = (-ly * denom * denom - dot * q) / denom3;

                    // dCost/dR = -(I - R), optionally edge-weighted
                    let mut residual = r - i;
                    if let Some(w) = weights {
                        residual *= w[idx];
                    }
                    *sp = residual * dr_dp;
                    *sq = residual * dr_dq;
                });
        }

        // Map slope-space gradients back to height space
        gradient::negative_divergence_into(
            &self.slope_p,
            &self.slope_q,
            &mut self.scratch,
            grad_out,
        );

        // Smoothness term: quadratic Laplacian prior, biharmonic gradient
        let mut smoothness_cost = 0.0f64;
        if self.lambda > 0.0 {
            gradient::laplacian_into(height, &mut self.lap);
            for v in self.lap.iter() {
                smoothness_cost += 0.5 * self.lambda as f64 * (*v as f64) * (*v as f64);
            }
            gradient::laplacian_into(&self.lap, &mut self.scratch);
            let lambda = self.lambda;
            ndarray::Zip::from(grad_out)
                .and(&self.scratch)
                .for_each(|g, &b| *g += lambda * b);
        }

        brightness_cost + smoothness_cost
    }

    /// Allocating convenience wrapper returning (cost, gradient)
    pub fn evaluate(
        &mut self,
        height: &HeightField,
        observed: &ImageGrid,
    ) -> (f64, Array2<GridReal>) {
        let mut grad = Array2::zeros(height.dim());
        let cost = self.evaluate_into(height, observed, &mut grad);
        (cost, grad)
    }
}

/// One-shot (cost, gradient) evaluation for external callers
pub fn evaluate_cost_and_gradient(
    height: &HeightField,
    observed: &ImageGrid,
    light: LightVector,
    lambda: f32,
) -> (f64, Array2<GridReal>) {
    CostGradientEvaluator::new(height.dim(), light, lambda).evaluate(height, observed)
}
