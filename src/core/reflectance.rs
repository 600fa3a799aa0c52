//! Lambertian reflectance rendering
//!
//! The forward half of the inverse problem: a gradient field plus a light
//! direction produces the predicted brightness map. Deterministic and
//! bit-reproducible for identical inputs.

use crate::core::gradient;
use crate::types::{GridReal, HeightField, LightVector, ReflectanceMap};
use ndarray::Array2;

/// Floor on the normal-vector denominator sqrt(1 + p^2 + q^2)
///
/// Near-vertical slopes would otherwise divide by ~0.
pub const NORMAL_DENOM_FLOOR: f32 = 1e-8;

/// Render the reflectance map from precomputed slope grids
///
/// Per cell: n = (-p, -q, 1) / sqrt(1 + p^2 + q^2), R = max(0, n . L).
/// A facet facing away from the light contributes no brightness.
pub fn render_from_gradients(
    grad_x: &Array2<GridReal>,
    grad_y: &Array2<GridReal>,
    light: LightVector,
) -> ReflectanceMap {
    let mut out = Array2::zeros(grad_x.dim());
    render_from_gradients_into(grad_x, grad_y, light, &mut out);
    out
}

/// Non-allocating variant of [`render_from_gradients`]
pub fn render_from_gradients_into(
    grad_x: &Array2<GridReal>,
    grad_y: &Array2<GridReal>,
    light: LightVector,
    out: &mut ReflectanceMap,
) {
    debug_assert_eq!(grad_x.dim(), grad_y.dim());
    debug_assert_eq!(grad_x.dim(), out.dim());
    let (lx, ly, lz) = (light[0] as f32, light[1] as f32, light[2] as f32);
    let shade = move |r: &mut GridReal, p: &GridReal, q: &GridReal| {
        let denom = (1.0 + p * p + q * q).sqrt().max(NORMAL_DENOM_FLOOR);
        let dot = (-p * lx - q * ly + lz) / denom;
        *r = dot.max(0.0);
    };
    let zip = ndarray::Zip::from(out).and(grad_x).and(grad_y);
    #[cfg(feature = "parallel")]
    zip.par_for_each(shade);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(shade);
}

/// Render the predicted brightness of a height field under a light direction
pub fn render_reflectance(height: &HeightField, light: LightVector) -> ReflectanceMap {
    let (gx, gy) = gradient::gradients(height);
    render_from_gradients(&gx, &gy, light)
}

/// Hillshade visualization values in [0, 1] for downstream report rendering
///
/// Classic slope/aspect shading; kept here because it shares the gradient
/// stencils, the actual plotting lives outside the core.
pub fn hillshade(dem: &HeightField, azimuth_deg: f64, elevation_deg: f64) -> Array2<GridReal> {
    let (gx, gy) = gradient::gradients(dem);
    let az = azimuth_deg.to_radians() as f32;
    let el = elevation_deg.to_radians() as f32;

    let mut out = Array2::zeros(dem.dim());
    ndarray::Zip::from(&mut out)
        .and(&gx)
        .and(&gy)
        .for_each(|h, &p, &q| {
            let slope = (p * p + q * q).sqrt().atan();
            let aspect = (-p).atan2(q);
            let shade =
                el.cos() * slope.cos() + el.sin() * slope.sin() * (az - aspect).cos();
            *h = shade.clamp(0.0, 1.0);
        });
    out
}
