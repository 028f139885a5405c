// The histogram code in this file is derived from works by Rob Hess and Willow Garage Inc.
// It is made available under the terms of the MIT license included in the root of this repository.
//
// Copyright 2006-2010 Rob Hess
// Copyright 2009 Willow Garage Inc.
// Copyright 2024 Thomas Nibler

//! Local descriptors computed at fixed grid points.

use std::marker::PhantomData;

use itertools::{izip, Itertools};
use ndarray::{s, Array2, Array3, ArrayView2};

use crate::grid::GridPoint;
use crate::imaging::{from_luma_f32, to_luma_f32};
use crate::{
    map_indices, ImageprocProcessing, Processing, DESCRIPTOR_N_BINS, DESCRIPTOR_N_HISTOGRAMS,
    DESCRIPTOR_SIZE, LAMBDA_DESCR, SIGMA_IN,
};

/// Computes one descriptor per point, all at the same patch size.
///
/// The returned array has one row per point, in the order of `points`, and
/// [`dimension`](Self::dimension) columns. An extractor that cannot describe every point
/// returns fewer rows; the rows it does return belong to the leading points. Callers treat
/// a short batch as an extraction shortfall.
pub trait DescriptorExtractor {
    fn dimension(&self) -> usize;

    fn extract(&self, image: &ArrayView2<f32>, points: &[GridPoint], patch_size: f32)
        -> Array2<f32>;
}

/// Upright SIFT descriptors with 4x4 spatial histograms of 8 orientation bins each.
///
/// The patch of side `patch_size` is split into `DESCRIPTOR_N_HISTOGRAMS + 1` bins of width
/// `LAMBDA_DESCR * sigma`, so `sigma = patch_size / (LAMBDA_DESCR * (N + 1))`. Before
/// sampling, the image is blurred up to `sigma` assuming it already carries a blur of
/// `SIGMA_IN`.
pub struct SiftExtractor<P: Processing = ImageprocProcessing> {
    _processing: PhantomData<P>,
}

impl SiftExtractor<ImageprocProcessing> {
    pub fn new() -> Self {
        Self::with_processing()
    }
}

impl Default for SiftExtractor<ImageprocProcessing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Processing> SiftExtractor<P> {
    pub fn with_processing() -> Self {
        SiftExtractor {
            _processing: PhantomData,
        }
    }
}

/// Spatial scale of the descriptor bins for a given patch size.
pub fn patch_sigma(patch_size: f32) -> f32 {
    patch_size / (LAMBDA_DESCR * (DESCRIPTOR_N_HISTOGRAMS + 1) as f32)
}

impl<P: Processing> DescriptorExtractor for SiftExtractor<P> {
    fn dimension(&self) -> usize {
        DESCRIPTOR_SIZE
    }

    fn extract(
        &self,
        image: &ArrayView2<f32>,
        points: &[GridPoint],
        patch_size: f32,
    ) -> Array2<f32> {
        let sigma = patch_sigma(patch_size);
        let blur = ((sigma * sigma) as f64 - SIGMA_IN * SIGMA_IN).max(0.0).sqrt();
        let smoothed = if blur > 0.0 {
            from_luma_f32(&P::gaussian_blur(&to_luma_f32(image), blur))
        } else {
            image.to_owned()
        };
        let smoothed = smoothed.view();

        let rows = map_indices(points.len(), |i| {
            let p = points[i];
            compute_descriptor(&smoothed, p.x as f32, p.y as f32, sigma, 0.0)
        });
        let mut desc = Array2::zeros((points.len(), DESCRIPTOR_SIZE));
        desc.rows_mut()
            .into_iter()
            .zip(rows)
            .for_each(|(mut row, values)| {
                row.iter_mut()
                    .zip(values)
                    .for_each(|(el, value)| *el = value);
            });
        desc
    }
}

/// SIFT descriptor of the patch around `(x, y)`, with histogram bins `LAMBDA_DESCR * scale`
/// pixels wide and the patch rotated by `orientation` degrees.
pub fn compute_descriptor(
    img: &ArrayView2<f32>,
    x: f32,
    y: f32,
    scale: f32,
    orientation: f32,
) -> [f32; DESCRIPTOR_SIZE] {
    let n_hist = DESCRIPTOR_N_HISTOGRAMS;
    let n_bins = DESCRIPTOR_N_BINS;
    let height = img.shape()[0];
    let width = img.shape()[1];
    let x = x.round() as i32;
    let y = y.round() as i32;
    const BIN_ANGLE_STEP: f32 = DESCRIPTOR_N_BINS as f32 / 360.0;
    let hist_width = LAMBDA_DESCR * scale;
    let radius = (hist_width * 2_f32.sqrt() * (n_hist + 1) as f32 * 0.5).round() as i32;
    let (sin_ori, cos_ori) = orientation.to_radians().sin_cos();
    let (sin_ori_scaled, cos_ori_scaled) = (sin_ori / hist_width, cos_ori / hist_width);

    let mut hist: Array3<f32> = Array3::zeros((n_hist + 2, n_hist + 2, n_bins));

    let (gradients_x, gradients_y, row_bins, col_bins, weights): (
        Vec<_>,
        Vec<_>,
        Vec<_>,
        Vec<_>,
        Vec<_>,
    ) = (-radius..=radius)
        .flat_map(|y_in_window| {
            (-radius..=radius).filter_map(move |x_in_window| {
                let col_rotated: f32 =
                    x_in_window as f32 * cos_ori_scaled - y_in_window as f32 * sin_ori_scaled;
                let row_rotated: f32 =
                    x_in_window as f32 * sin_ori_scaled + y_in_window as f32 * cos_ori_scaled;
                let row_bin = row_rotated + (n_hist / 2) as f32;
                let col_bin = col_rotated + (n_hist / 2) as f32;

                let abs_y = y + y_in_window;
                let abs_x = x + x_in_window;

                if row_bin > -0.5
                    && row_bin < n_hist as f32 + 0.5
                    && col_bin > -0.5
                    && col_bin < n_hist as f32 + 0.5
                    && abs_y > 0
                    && abs_y < height as i32 - 1
                    && abs_x > 0
                    && abs_x < width as i32 - 1
                {
                    let abs_y = abs_y as usize;
                    let abs_x = abs_x as usize;
                    let dx = img[(abs_y, abs_x + 1)] - img[(abs_y, abs_x - 1)];
                    let dy = img[(abs_y - 1, abs_x)] - img[(abs_y + 1, abs_x)];

                    let weight = col_rotated.powi(2) + row_rotated.powi(2);
                    Some((dx, dy, row_bin, col_bin, weight))
                } else {
                    None
                }
            })
        })
        .multiunzip();
    let weight_scale = -2. / (n_hist.pow(2) as f32);
    let weights = weights
        .into_iter()
        .map(|w| (w * weight_scale).exp())
        .collect_vec();
    let orientations = gradients_x
        .iter()
        .zip(&gradients_y)
        .map(|(x, y)| {
            let x: f64 = *x as f64;
            let y: f64 = *y as f64;
            ((y.atan2(x).to_degrees() + 360.0) % 360.0) as f32 - orientation
        })
        .collect_vec();
    let magnitudes = gradients_x
        .into_iter()
        .zip(&gradients_y)
        .map(|(x, y)| (x * x + y * y).sqrt())
        .collect_vec();

    izip!(row_bins, col_bins, orientations, magnitudes, weights).for_each(
        |(row_bin, col_bin, orientation, mag, weight)| {
            let row_bin = row_bin - 0.5;
            let col_bin = col_bin - 0.5;
            let mag = mag * weight;
            let obin = orientation * BIN_ANGLE_STEP;
            let row_floor = row_bin.floor();
            let col_floor = col_bin.floor();
            let ori_floor = obin.floor();
            let row_frac = row_bin - row_floor;
            let col_frac = col_bin - col_floor;
            let ori_frac = obin - ori_floor;

            let c1 = mag * row_frac;
            let c0 = mag - c1;
            let c11 = c1 * col_frac;
            let c10 = c1 - c11;
            let c01 = c0 * col_frac;
            let c00 = c0 - c01;
            let c111 = c11 * ori_frac;
            let c110 = c11 - c111;
            let c101 = c10 * ori_frac;
            let c100 = c10 - c101;
            let c011 = c01 * ori_frac;
            let c010 = c01 - c011;
            let c001 = c00 * ori_frac;
            let c000 = c00 - c001;

            let r1 = (row_floor + 1.) as usize;
            let c1_ = (col_floor + 1.) as usize;
            let r2 = (row_floor + 2.) as usize;
            let c2 = (col_floor + 2.) as usize;
            let o0 = (ori_floor as i32).rem_euclid(n_bins as i32) as usize;
            let o1 = (o0 + 1) % n_bins;

            hist[(r1, c1_, o0)] += c000;
            hist[(r1, c1_, o1)] += c001;
            hist[(r1, c2, o0)] += c010;
            hist[(r1, c2, o1)] += c011;
            hist[(r2, c1_, o0)] += c100;
            hist[(r2, c1_, o1)] += c101;
            hist[(r2, c2, o0)] += c110;
            hist[(r2, c2, o1)] += c111;
        },
    );

    #[allow(clippy::reversed_empty_ranges)]
    let mut hist_flat = hist.slice(s![1..-1, 1..-1, ..]).iter().copied().collect_vec();
    debug_assert_eq!(hist_flat.len(), DESCRIPTOR_SIZE);

    const DESCRIPTOR_MAGNITUDE_CAP: f32 = 0.2;
    let l2_uncapped = hist_flat.iter().map(|x| x * x).sum::<f32>().sqrt();
    let component_cap = l2_uncapped * DESCRIPTOR_MAGNITUDE_CAP;

    hist_flat.iter_mut().for_each(|v| *v = v.min(component_cap));

    let l2_capped = hist_flat.iter().map(|x| x * x).sum::<f32>().sqrt();

    const DESCRIPTOR_L2_NORM: f32 = 512.0;
    let l2_normalizer = DESCRIPTOR_L2_NORM / l2_capped.max(f32::EPSILON);

    let mut out = [0.0; DESCRIPTOR_SIZE];
    out.iter_mut()
        .zip(hist_flat)
        .for_each(|(o, v)| *o = v * l2_normalizer);
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    use super::*;

    fn ramp(height: usize, width: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            ((x as f32 * 0.3).sin() + (y as f32 * 0.17).cos()) * 0.25 + 0.5
        })
    }

    #[test]
    fn descriptor_has_sift_norm() {
        let img = ramp(64, 64);
        let d = compute_descriptor(&img.view(), 32., 32., 2.0, 0.0);
        let norm = d.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert_abs_diff_eq!(norm, 512.0, epsilon = 0.5);
        assert!(d.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn flat_patch_gives_zero_descriptor() {
        let img = Array2::from_elem((32, 32), 0.5_f32);
        let d = compute_descriptor(&img.view(), 16., 16., 1.5, 0.0);
        assert!(d.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn extractor_returns_one_row_per_point() {
        let img = ramp(40, 50);
        let points = [
            GridPoint { x: 10, y: 10 },
            GridPoint { x: 25, y: 20 },
            GridPoint { x: 49, y: 39 },
        ];
        let extractor = SiftExtractor::new();
        let desc = extractor.extract(&img.view(), &points, 15.0);
        assert_eq!(desc.dim(), (3, extractor.dimension()));
        let single = extractor.extract(&img.view(), &points[1..2], 15.0);
        assert_eq!(single.row(0), desc.row(1));
    }

    #[test]
    fn patch_sigma_inverts_patch_size() {
        let sigma = 2.5;
        let patch = LAMBDA_DESCR * sigma * (DESCRIPTOR_N_HISTOGRAMS + 1) as f32;
        assert_abs_diff_eq!(patch_sigma(patch), sigma, epsilon = 1e-6);
    }
}
