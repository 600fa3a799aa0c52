//! Discrete differential operators on height grids
//!
//! Central differences over the interior, one-sided differences at the four
//! grid edges, so every operator is defined on the full grid with no
//! shrinkage. These stencils run once or more per solver iteration; the
//! `_into` variants write into caller-owned scratch buffers to keep the
//! inner loop free of allocation churn.

use crate::types::{GradientField, GridReal, HeightField};
use ndarray::Array2;

/// Partial derivative along x (columns) into a preallocated buffer
pub fn gradient_x_into(z: &Array2<GridReal>, out: &mut Array2<GridReal>) {
    let (rows, cols) = z.dim();
    debug_assert_eq!(out.dim(), z.dim());
    if cols < 2 {
        out.fill(0.0);
        return;
    }
    for i in 0..rows {
        out[[i, 0]] = z[[i, 1]] - z[[i, 0]];
        for j in 1..cols - 1 {
            out[[i, j]] = (z[[i, j + 1]] - z[[i, j - 1]]) * 0.5;
        }
        out[[i, cols - 1]] = z[[i, cols - 1]] - z[[i, cols - 2]];
    }
}

/// Partial derivative along y (rows) into a preallocated buffer
pub fn gradient_y_into(z: &Array2<GridReal>, out: &mut Array2<GridReal>) {
    let (rows, cols) = z.dim();
    debug_assert_eq!(out.dim(), z.dim());
    if rows < 2 {
        out.fill(0.0);
        return;
    }
    for j in 0..cols {
        out[[0, j]] = z[[1, j]] - z[[0, j]];
        out[[rows - 1, j]] = z[[rows - 1, j]] - z[[rows - 2, j]];
    }
    for i in 1..rows - 1 {
        for j in 0..cols {
            out[[i, j]] = (z[[i + 1, j]] - z[[i - 1, j]]) * 0.5;
        }
    }
}

/// Both partial derivatives of a height field, (dZ/dx, dZ/dy)
pub fn gradients(z: &HeightField) -> GradientField {
    let mut gx = Array2::zeros(z.dim());
    let mut gy = Array2::zeros(z.dim());
    gradient_x_into(z, &mut gx);
    gradient_y_into(z, &mut gy);
    (gx, gy)
}

/// 5-point Laplacian with zero-valued cells beyond the border
///
/// Matches a [1, -2, 1] second-difference stencil per axis over a
/// zero-padded grid, the same operator the smoothness prior is defined on.
pub fn laplacian_into(z: &Array2<GridReal>, out: &mut Array2<GridReal>) {
    let (rows, cols) = z.dim();
    debug_assert_eq!(out.dim(), z.dim());
    for i in 0..rows {
        for j in 0..cols {
            let up = if i > 0 { z[[i - 1, j]] } else { 0.0 };
            let down = if i + 1 < rows { z[[i + 1, j]] } else { 0.0 };
            let left = if j > 0 { z[[i, j - 1]] } else { 0.0 };
            let right = if j + 1 < cols { z[[i, j + 1]] } else { 0.0 };
            out[[i, j]] = up + down + left + right - 4.0 * z[[i, j]];
        }
    }
}

/// Allocating convenience wrapper around [`laplacian_into`]
pub fn laplacian(z: &Array2<GridReal>) -> Array2<GridReal> {
    let mut out = Array2::zeros(z.dim());
    laplacian_into(z, &mut out);
    out
}

/// Negative divergence of a slope-space field, mapping (d/dp, d/dq)
/// gradients back into height space: -d(fp)/dx - d(fq)/dy
pub fn negative_divergence_into(
    fp: &Array2<GridReal>,
    fq: &Array2<GridReal>,
    scratch: &mut Array2<GridReal>,
    out: &mut Array2<GridReal>,
) {
    gradient_x_into(fp, out);
    gradient_y_into(fq, scratch);
    ndarray::Zip::from(out)
        .and(&*scratch)
        .for_each(|o, &s| *o = -*o - s);
}
