//! Iterative shape-from-shading solver
//!
//! Owns the height-field state, the step policy, the convergence test and
//! the iteration budget. Iterations are strictly sequential: iteration n+1
//! always consumes the full result of iteration n, and the only suspension
//! point is the convergence/cancellation check at the iteration boundary.
//! Each run owns its field, trace and buffers outright; nothing is shared
//! between concurrent runs.

use crate::config::{InitialSurface, SfsConfig, StepPolicyKind};
use crate::core::cost::CostGradientEvaluator;
use crate::core::gradient;
use crate::core::illumination;
use crate::core::smoothing::{self, EdgePreservingSmoother};
use crate::types::{
    GridReal, HeightField, ImageGrid, IterationRecord, OptimizationTrace, SfsError,
    SfsResult, SfsSolution, TerminationReason,
};
use ndarray::Array2;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, observed once per iteration boundary
///
/// Never interrupts a running iteration; the last completed field is
/// returned with `TerminationReason::Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Everything a step policy may consult when proposing an update
pub struct StepContext<'a> {
    /// Zero-based index of the current iteration
    pub iteration: usize,
    /// Current height field
    pub height: &'a HeightField,
    /// Cost gradient at `height`
    pub gradient: &'a Array2<GridReal>,
    /// Cost at `height`
    pub cost: f64,
    /// Evaluator for line-search probes
    pub evaluator: &'a mut CostGradientEvaluator,
    /// The (pre-smoothed) image being fitted
    pub observed: &'a ImageGrid,
}

/// Pluggable step strategy: one method, interchangeable behind the trait
///
/// The two historical optimizers of this pipeline (hand-rolled momentum
/// descent and a bounded quasi-Newton routine) are both expressed as
/// implementations of this trait and selected by configuration.
pub trait StepPolicy {
    /// Propose the height delta for this iteration
    fn compute_step(&mut self, ctx: &mut StepContext<'_>) -> Array2<GridReal>;
}

/// Fixed-rate momentum descent with smoothly decaying rate and momentum
pub struct MomentumPolicy {
    velocity: Array2<GridReal>,
    base_step: f32,
    step_decay: f32,
    base_momentum: f32,
    momentum_decay: f32,
}

impl MomentumPolicy {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            velocity: Array2::zeros(shape),
            base_step: 0.012,
            step_decay: 3.0e-4,
            base_momentum: 0.85,
            momentum_decay: 1.0e-3,
        }
    }
}

impl StepPolicy for MomentumPolicy {
    fn compute_step(&mut self, ctx: &mut StepContext<'_>) -> Array2<GridReal> {
        let it = ctx.iteration as f32;
        let step = self.base_step / (1.0 + it * self.step_decay);
        let momentum = self.base_momentum / (1.0 + it * self.momentum_decay);

        ndarray::Zip::from(&mut self.velocity)
            .and(ctx.gradient)
            .for_each(|v, &g| *v = momentum * *v - step * g);
        self.velocity.clone()
    }
}

/// Limited-memory BFGS step with Armijo backtracking and a per-cell
/// height box applied by projection
pub struct BoundedQuasiNewtonPolicy {
    memory: usize,
    bounds: (f32, f32),
    s_pairs: VecDeque<Array2<GridReal>>,
    y_pairs: VecDeque<Array2<GridReal>>,
    prev_height: Option<HeightField>,
    prev_gradient: Option<Array2<GridReal>>,
    probe_grad: Array2<GridReal>,
}

impl BoundedQuasiNewtonPolicy {
    pub fn new(shape: (usize, usize), memory: usize, bounds: (f32, f32)) -> Self {
        Self {
            memory,
            bounds,
            s_pairs: VecDeque::with_capacity(memory),
            y_pairs: VecDeque::with_capacity(memory),
            prev_height: None,
            prev_gradient: None,
            probe_grad: Array2::zeros(shape),
        }
    }

    fn push_pair(&mut self, s: Array2<GridReal>, y: Array2<GridReal>) {
        let sy: f64 = s
            .iter()
            .zip(y.iter())
            .map(|(a, b)| (*a as f64) * (*b as f64))
            .sum();
        // Skip pairs without positive curvature, they would break the
        // two-loop recursion
        if sy > 1e-12 {
            if self.s_pairs.len() == self.memory {
                self.s_pairs.pop_front();
                self.y_pairs.pop_front();
            }
            self.s_pairs.push_back(s);
            self.y_pairs.push_back(y);
        }
    }

    /// Two-loop recursion: direction = -H * gradient
    fn search_direction(&self, gradient: &Array2<GridReal>) -> Array2<GridReal> {
        let dot = |a: &Array2<GridReal>, b: &Array2<GridReal>| -> f64 {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| (*x as f64) * (*y as f64))
                .sum()
        };

        let mut q = gradient.mapv(|v| v as f64);
        let m = self.s_pairs.len();
        let mut alphas = vec![0.0f64; m];
        let mut rhos = vec![0.0f64; m];

        for k in (0..m).rev() {
            let s = &self.s_pairs[k];
            let y = &self.y_pairs[k];
            let rho = 1.0 / dot(s, y);
            let alpha = rho
                * s.iter()
                    .zip(q.iter())
                    .map(|(si, qi)| (*si as f64) * qi)
                    .sum::<f64>();
            ndarray::Zip::from(&mut q)
                .and(y)
                .for_each(|qi, &yi| *qi -= alpha * yi as f64);
            alphas[k] = alpha;
            rhos[k] = rho;
        }

        // Initial inverse-Hessian scale from the most recent pair
        if let (Some(s), Some(y)) = (self.s_pairs.back(), self.y_pairs.back()) {
            let gamma = dot(s, y) / dot(y, y).max(1e-300);
            q.mapv_inplace(|v| v * gamma);
        }

        for k in 0..m {
            let s = &self.s_pairs[k];
            let y = &self.y_pairs[k];
            let beta = rhos[k]
                * y.iter()
                    .zip(q.iter())
                    .map(|(yi, qi)| (*yi as f64) * qi)
                    .sum::<f64>();
            let coeff = alphas[k] - beta;
            ndarray::Zip::from(&mut q)
                .and(s)
                .for_each(|qi, &si| *qi += coeff * si as f64);
        }

        q.mapv(|v| -v as f32)
    }

    fn project(&self, v: f32) -> f32 {
        v.clamp(self.bounds.0, self.bounds.1)
    }
}

impl StepPolicy for BoundedQuasiNewtonPolicy {
    fn compute_step(&mut self, ctx: &mut StepContext<'_>) -> Array2<GridReal> {
        // Fold the previous iterate into the curvature history
        if let (Some(ph), Some(pg)) = (self.prev_height.take(), self.prev_gradient.take()) {
            let s = ctx.height - &ph;
            let y = ctx.gradient - &pg;
            self.push_pair(s, y);
        }
        self.prev_height = Some(ctx.height.clone());
        self.prev_gradient = Some(ctx.gradient.clone());

        let direction = self.search_direction(ctx.gradient);
        let descent: f64 = direction
            .iter()
            .zip(ctx.gradient.iter())
            .map(|(d, g)| (*d as f64) * (*g as f64))
            .sum();

        // Projected Armijo backtracking
        let c1 = 1e-4;
        let mut alpha = 1.0f32;
        let mut best_delta: Option<Array2<GridReal>> = None;
        for _ in 0..20 {
            let trial = ndarray::Zip::from(ctx.height)
                .and(&direction)
                .map_collect(|&z, &d| self.project(z + alpha * d));
            let trial_cost = ctx
                .evaluator
                .evaluate_into(&trial, ctx.observed, &mut self.probe_grad);
            if trial_cost.is_finite() && trial_cost <= ctx.cost + c1 * (alpha as f64) * descent {
                best_delta = Some(trial - ctx.height);
                break;
            }
            alpha *= 0.5;
        }

        // Line search failed to make progress; stand still and let the
        // convergence test end the run
        best_delta.unwrap_or_else(|| Array2::zeros(ctx.height.dim()))
    }
}

/// The optimization driver
///
/// State machine: Initializing -> Iterating -> {Converged, Exhausted,
/// Cancelled, Failed}. All terminal states apply one final smoothing pass
/// before returning; Failed surfaces as an error carrying the iteration
/// index and the trace collected so far.
pub struct Solver {
    config: SfsConfig,
}

impl Solver {
    pub fn new(config: SfsConfig) -> Self {
        Self { config }
    }

    /// Run without external cancellation
    pub fn run(&self, observed: &ImageGrid) -> SfsResult<SfsSolution> {
        self.run_cancellable(observed, &CancelToken::new())
    }

    /// Run, observing `cancel` once per iteration boundary
    pub fn run_cancellable(
        &self,
        observed: &ImageGrid,
        cancel: &CancelToken,
    ) -> SfsResult<SfsSolution> {
        crate::types::validate_image(observed)?;
        self.config.validate()?;

        let shape = observed.dim();
        log::info!(
            "Starting SFS optimization on {}x{} grid, budget {} iterations",
            shape.0,
            shape.1,
            self.config.max_iterations
        );

        // Light noise damping before fitting; seeding uses the same grid
        let smoothed = smoothing::gaussian_blur(observed, 0.5);

        let light = illumination::light_direction(
            self.config.sun_azimuth_deg,
            self.config.sun_elevation_deg,
        );
        log::debug!("Light direction: [{:.3}, {:.3}, {:.3}]", light[0], light[1], light[2]);

        let mut height = self.seed_surface(&smoothed)?;

        let lambda = self.effective_lambda(shape);
        let mut evaluator = CostGradientEvaluator::new(shape, light, lambda);
        if self.config.edge_aware_weighting {
            evaluator = evaluator.with_residual_weights(edge_weights(&smoothed));
        }

        let mut policy = self.make_policy(shape);
        let smoother = EdgePreservingSmoother::new(self.config.smoothing.clone());

        let mut trace: OptimizationTrace = Vec::new();
        let mut grad: Array2<GridReal> = Array2::zeros(shape);
        let mut prev_height: HeightField = Array2::zeros(shape);
        let mut reason = TerminationReason::IterationBudgetExhausted;

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                log::info!("Cancellation observed at iteration {}", iteration);
                reason = TerminationReason::Cancelled;
                break;
            }

            prev_height.assign(&height);

            let cost = evaluator.evaluate_into(&height, &smoothed, &mut grad);
            if !cost.is_finite() {
                return Err(self.instability(iteration, "cost became non-finite", trace));
            }
            let mean_abs_gradient =
                grad.iter().map(|g| g.abs() as f64).sum::<f64>() / grad.len() as f64;
            if !mean_abs_gradient.is_finite() {
                return Err(self.instability(iteration, "gradient became non-finite", trace));
            }

            let mut ctx = StepContext {
                iteration,
                height: &height,
                gradient: &grad,
                cost,
                evaluator: &mut evaluator,
                observed: &smoothed,
            };
            let delta = policy.compute_step(&mut ctx);
            height += &delta;

            if smoother.due_at(iteration) {
                height = smoother.apply(&height);
            }

            let mean_abs_delta = height
                .iter()
                .zip(prev_height.iter())
                .map(|(a, b)| (a - b).abs() as f64)
                .sum::<f64>()
                / height.len() as f64;

            trace.push(IterationRecord {
                iteration,
                residual: cost,
                mean_abs_gradient,
                mean_abs_delta,
            });
            log::debug!(
                "iter {:4}  cost {:.4e}  |grad| {:.3e}  |dZ| {:.3e}",
                iteration,
                cost,
                mean_abs_gradient,
                mean_abs_delta
            );

            if mean_abs_delta < self.config.convergence_threshold {
                log::info!("Converged after {} iterations", iteration + 1);
                reason = TerminationReason::Converged;
                break;
            }
        }

        // Every terminal state gets the final smoothing pass
        let height = smoother.finalize(&height);

        let iterations = trace.len();
        if reason == TerminationReason::IterationBudgetExhausted {
            log::info!(
                "Iteration budget of {} exhausted without convergence",
                self.config.max_iterations
            );
        }

        Ok(SfsSolution {
            height,
            trace,
            converged: reason == TerminationReason::Converged,
            reason,
            iterations,
        })
    }

    fn instability(&self, iteration: usize, message: &str, trace: OptimizationTrace) -> SfsError {
        SfsError::NumericalInstability {
            iteration,
            message: message.to_string(),
            trace,
        }
    }

    fn effective_lambda(&self, shape: (usize, usize)) -> f32 {
        let lambda = self.config.regularization_lambda;
        if lambda > 0.0 && self.config.adaptive_regularization {
            let cells = (shape.0 * shape.1) as f64;
            let scaled = lambda as f64 * (1.0 + cells.ln() / 20.0);
            log::debug!("Adaptive regularization: {:.3e} -> {:.3e}", lambda, scaled);
            scaled as f32
        } else {
            lambda
        }
    }

    fn seed_surface(&self, smoothed: &ImageGrid) -> SfsResult<HeightField> {
        let shape = smoothed.dim();
        match &self.config.initial_surface {
            InitialSurface::Flat => Ok(Array2::zeros(shape)),
            InitialSurface::ImageSeeded => Ok(smoothed.mapv(|v| (v - 0.5) * 10.0)),
            InitialSurface::Random { seed } => {
                let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15).max(1);
                Ok(Array2::from_shape_simple_fn(shape, || {
                    // Sum of four uniforms, centered and scaled to sigma ~0.1
                    let mut acc = 0.0f32;
                    for _ in 0..4 {
                        state ^= state >> 12;
                        state ^= state << 25;
                        state ^= state >> 27;
                        let bits = state.wrapping_mul(0x2545F4914F6CDD1D);
                        acc += (bits >> 40) as f32 / (1u64 << 24) as f32;
                    }
                    (acc - 2.0) * 0.17320508
                }))
            }
            InitialSurface::Provided(field) => {
                if field.dim() != shape {
                    return Err(SfsError::InvalidInput(format!(
                        "Provided surface is {}x{}, image is {}x{}",
                        field.dim().0,
                        field.dim().1,
                        shape.0,
                        shape.1
                    )));
                }
                Ok(field.clone())
            }
        }
    }

    fn make_policy(&self, shape: (usize, usize)) -> Box<dyn StepPolicy> {
        match &self.config.step_policy {
            StepPolicyKind::Momentum => Box::new(MomentumPolicy::new(shape)),
            StepPolicyKind::BoundedQuasiNewton {
                memory,
                height_bounds,
            } => Box::new(BoundedQuasiNewtonPolicy::new(shape, *memory, *height_bounds)),
        }
    }
}

/// Per-cell photometric weight boosting updates near strong observed edges
///
/// w = 1 + 3 |grad I| / max |grad I|, so crater rims and ridges receive up
/// to four times the update a uniform step would apply.
pub fn edge_weights(observed: &ImageGrid) -> Array2<GridReal> {
    let (gx, gy) = gradient::gradients(observed);
    let mut mag = Array2::zeros(observed.dim());
    ndarray::Zip::from(&mut mag)
        .and(&gx)
        .and(&gy)
        .for_each(|m, &x, &y| *m = (x * x + y * y).sqrt());
    let max = mag.iter().fold(0.0f32, |a, &b| a.max(b));
    mag.mapv_inplace(|m| 1.0 + 3.0 * m / (max + 1e-8));
    mag
}
