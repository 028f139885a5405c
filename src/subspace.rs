//! Scale-less descriptors: the scale stack of every grid point summarised by the subspace
//! its descriptors span.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use nalgebra::{DMatrix, SVD};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};

use crate::error::{Result, SlsError};
use crate::field::DescriptorField;
use crate::grid::Grid;
use crate::map_indices;
use crate::multiscale::DescriptorStack;
use crate::progress::{ProgressEvent, ProgressSink, Stage};

/// Flattened descriptors with a smaller norm are emitted as the zero vector.
pub const SLS_NORM_EPS: f32 = 1e-8;

const PROGRESS_INTERVAL: usize = 1024;

/// Length of the flattened upper triangle of a `dim x dim` matrix.
pub fn flattened_len(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Upper triangle of the square matrix `a`, row by row, with the diagonal scaled by
/// `1/sqrt(2)`. For symmetric `A` and `B`, `2 * flat(A) . flat(B) == trace(A B)`.
pub fn flatten_symmetric(a: &ArrayView2<f32>) -> Array1<f32> {
    let n = a.nrows();
    let mut out = Array1::zeros(flattened_len(n));
    let mut k = 0;
    for i in 0..n {
        out[k] = a[(i, i)] * std::f32::consts::FRAC_1_SQRT_2;
        k += 1;
        for j in i + 1..n {
            out[k] = a[(i, j)];
            k += 1;
        }
    }
    out
}

/// Orthonormal basis of the top `rank` left singular vectors of the mean centred columns
/// of `x`, as a `D x r` matrix with `r <= rank`.
fn principal_subspace(x: &ArrayView2<f32>, rank: usize) -> Result<Array2<f32>> {
    let (dim, k) = x.dim();
    let mean = x
        .map(|v| f64::from(*v))
        .mean_axis(Axis(1))
        .ok_or_else(|| SlsError::invalid("empty scale stack"))?;
    let centered = DMatrix::from_fn(dim, k, |i, j| f64::from(x[(i, j)]) - mean[i]);
    let svd = SVD::try_new(centered, true, false, f64::EPSILON, 0)
        .ok_or_else(|| SlsError::invalid("SVD of a scale stack did not converge"))?;
    let u = svd
        .u
        .as_ref()
        .ok_or_else(|| SlsError::invalid("SVD returned no left singular vectors"))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| {
        svd.singular_values[b]
            .total_cmp(&svd.singular_values[a])
            .then(a.cmp(&b))
    });
    let r = rank.min(order.len());
    Ok(Array2::from_shape_fn((dim, r), |(i, c)| u[(i, order[c])] as f32))
}

/// SLS descriptor of a single `D' x K` scale stack.
///
/// The result has length `D'(D'+1)/2` and unit norm, or is all zero when the stack is
/// empty or the flattened projector vanishes.
pub fn encode_point(stack: &ArrayView2<f32>, subspace_dim: usize) -> Result<Array1<f32>> {
    if subspace_dim < 1 {
        return Err(SlsError::invalid("subspace dimension must be at least 1"));
    }
    let (dim, k) = stack.dim();
    if k == 0 || dim == 0 {
        return Ok(Array1::zeros(flattened_len(dim)));
    }
    let u = principal_subspace(stack, subspace_dim.min(dim))?;
    let projector = u.dot(&u.t());
    let mut h = flatten_symmetric(&projector.view());
    let norm = h.dot(&h).sqrt();
    if norm > SLS_NORM_EPS {
        h /= norm;
    } else {
        h.fill(0.0);
    }
    Ok(h)
}

/// Encodes every point of `stack` and lays the descriptors out on `grid`.
pub fn encode_sls(
    stack: &DescriptorStack,
    grid: &Grid,
    subspace_dim: usize,
    progress: &dyn ProgressSink,
) -> Result<DescriptorField> {
    if subspace_dim < 1 {
        return Err(SlsError::invalid("subspace dimension must be at least 1"));
    }
    let num_points = stack.num_points();
    if grid.num_points() != num_points {
        return Err(SlsError::invalid(format!(
            "grid has {} points, stack has {num_points}",
            grid.num_points()
        )));
    }
    let dim = stack.dim();
    debug!(
        "encoding {num_points} points, {dim} x {} stacks, rank {}",
        stack.num_sigma(),
        subspace_dim.min(dim)
    );

    let done = AtomicUsize::new(0);
    let encoded = map_indices(num_points, |p| {
        let h = encode_point(&stack.point_stack(p), subspace_dim);
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_INTERVAL == 0 || n == num_points {
            progress.report(ProgressEvent {
                stage: Stage::Encoding,
                done: n,
                total: num_points,
            });
        }
        h
    });

    let mut field =
        DescriptorField::zeros(grid.s2, grid.s1, flattened_len(dim)).with_spacing(grid.spacing);
    for (p, h) in encoded.into_iter().enumerate() {
        let (row, col) = grid.cell(p);
        field.data_mut().slice_mut(s![row, col, ..]).assign(&h?);
    }
    Ok(field)
}
