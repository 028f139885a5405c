//! Descriptors sampled at every grid point over a list of scales.

use log::{debug, warn};
use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};

use crate::descriptor::DescriptorExtractor;
use crate::error::{ExtractionShortfall, Result, ScaleShortfall, SlsError};
use crate::field::DescriptorField;
use crate::grid::Grid;
use crate::imaging::pad_reflect;
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crate::{DESCRIPTOR_N_HISTOGRAMS, LAMBDA_DESCR};

/// Norm below which a raw descriptor is left as it is instead of being normalised.
const DESCRIPTOR_NORM_EPS: f32 = 1e-9;

/// Descriptors of `num_points` points at `num_sigma` scales, stored column-wise in a
/// `D x (num_points * num_sigma)` matrix. Column `p * num_sigma + i` holds point `p` at
/// scale `i`, so the scale stack of one point is a contiguous block of columns.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DescriptorStack {
    data: Array2<f32>,
    num_points: usize,
    num_sigma: usize,
}

impl DescriptorStack {
    pub fn zeros(dim: usize, num_points: usize, num_sigma: usize) -> Self {
        DescriptorStack {
            data: Array2::zeros((dim, num_points * num_sigma)),
            num_points,
            num_sigma,
        }
    }

    pub fn from_array(data: Array2<f32>, num_points: usize, num_sigma: usize) -> Result<Self> {
        if data.ncols() != num_points * num_sigma {
            return Err(SlsError::invalid(format!(
                "stack has {} columns, expected {num_points} points x {num_sigma} scales",
                data.ncols()
            )));
        }
        Ok(DescriptorStack {
            data,
            num_points,
            num_sigma,
        })
    }

    /// Descriptor dimension.
    pub fn dim(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_sigma(&self) -> usize {
        self.num_sigma
    }

    pub fn num_columns(&self) -> usize {
        self.data.ncols()
    }

    #[inline]
    pub fn column_index(&self, point: usize, scale: usize) -> usize {
        point * self.num_sigma + scale
    }

    pub fn descriptor(&self, point: usize, scale: usize) -> ArrayView1<'_, f32> {
        self.data.column(self.column_index(point, scale))
    }

    fn descriptor_mut(&mut self, point: usize, scale: usize) -> ArrayViewMut1<'_, f32> {
        let col = self.column_index(point, scale);
        self.data.column_mut(col)
    }

    /// `D x num_sigma` block holding all scales of `point`.
    pub fn point_stack(&self, point: usize) -> ArrayView2<'_, f32> {
        let start = self.column_index(point, 0);
        self.data.slice(s![.., start..start + self.num_sigma])
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Single scale dense descriptor field, e.g. a plain dense SIFT baseline to compare SLS
    /// against. Every cell is L2-normalised, or zero if its norm vanishes.
    pub fn scale_field(&self, grid: &Grid, scale: usize) -> Result<DescriptorField> {
        if scale >= self.num_sigma {
            return Err(SlsError::invalid(format!(
                "scale {scale} out of range, stack has {} scales",
                self.num_sigma
            )));
        }
        if grid.num_points() != self.num_points {
            return Err(SlsError::invalid(format!(
                "grid has {} points, stack has {}",
                grid.num_points(),
                self.num_points
            )));
        }
        let mut field =
            DescriptorField::zeros(grid.s2, grid.s1, self.dim()).with_spacing(grid.spacing);
        for p in 0..self.num_points {
            let (row, col) = grid.cell(p);
            let desc = self.descriptor(p, scale);
            let norm = desc.dot(&desc).sqrt();
            if norm > DESCRIPTOR_NORM_EPS {
                field
                    .data_mut()
                    .slice_mut(s![row, col, ..])
                    .assign(&(&desc / norm));
            }
        }
        Ok(field)
    }
}

/// Grid and multi-scale descriptors of one image.
#[derive(Debug, Clone)]
pub struct SampledImage {
    pub grid: Grid,
    pub stack: DescriptorStack,
}

/// Side length of the descriptor patch used at scale `sigma`.
pub fn patch_size(sigma: f32) -> f32 {
    LAMBDA_DESCR * sigma * (DESCRIPTOR_N_HISTOGRAMS + 1) as f32
}

/// Border needed so that the patch of the largest scale around every pixel of the
/// original image stays inside the padded image.
pub fn padding_for(sigma_max: f32) -> usize {
    (patch_size(sigma_max) / 2.0).ceil() as usize
}

/// Samples descriptors on a regular grid covering `image` at every scale in `sigmas`.
///
/// The image is padded with reflected borders so that the grid covers the whole original
/// image. The extractor is invoked once per scale with all grid points.
///
/// If the extractor comes up short at any scale, all scales are still sampled and the
/// incomplete stack is returned inside [`SlsError::ExtractionShortfall`].
pub fn sample_descriptors<E: DescriptorExtractor + ?Sized>(
    image: &ArrayView2<f32>,
    sigmas: &[f32],
    grid_spacing: usize,
    normalize: bool,
    extractor: &E,
    progress: &dyn ProgressSink,
) -> Result<SampledImage> {
    let (height, width) = image.dim();
    if height == 0 || width == 0 {
        return Err(SlsError::invalid("input image is empty"));
    }
    let sigma_max = match sigmas.last() {
        Some(s) => *s,
        None => return Err(SlsError::invalid("at least one sigma is required")),
    };
    let pad = padding_for(sigma_max);
    let padded = pad_reflect(image, pad)?;
    let grid = Grid::new(width + 2 * pad, height + 2 * pad, grid_spacing, pad)?;
    let points = grid.points();
    let num_points = points.len();
    let num_sigma = sigmas.len();
    let dim = extractor.dimension();
    debug!(
        "sampling {num_points} points ({}x{}) at {num_sigma} scales, padding {pad}",
        grid.s1, grid.s2
    );

    let mut stack = DescriptorStack::zeros(dim, num_points, num_sigma);
    let mut shortfalls = Vec::new();
    for (scale, &sigma) in sigmas.iter().enumerate() {
        let batch = extractor.extract(&padded.view(), &points, patch_size(sigma));
        if batch.ncols() != dim {
            return Err(SlsError::invalid(format!(
                "extractor returned {}-dimensional descriptors, announced {dim}",
                batch.ncols()
            )));
        }
        if batch.nrows() > num_points {
            return Err(SlsError::invalid(format!(
                "extractor returned {} descriptors for {num_points} points",
                batch.nrows()
            )));
        }
        for (p, desc) in batch.axis_iter(Axis(0)).enumerate() {
            let mut col = stack.descriptor_mut(p, scale);
            col.assign(&desc);
            if normalize {
                let norm = desc.dot(&desc).sqrt();
                if norm >= DESCRIPTOR_NORM_EPS {
                    col.mapv_inplace(|v| v / norm);
                }
            }
        }
        if batch.nrows() < num_points {
            warn!(
                "extractor returned {} of {num_points} descriptors at sigma {sigma}",
                batch.nrows()
            );
            shortfalls.push(ScaleShortfall {
                scale_index: scale,
                sigma,
                requested: num_points,
                returned: batch.nrows(),
                missing: (batch.nrows()..num_points).collect(),
            });
        }
        progress.report(ProgressEvent {
            stage: Stage::Sampling,
            done: scale + 1,
            total: num_sigma,
        });
    }

    if !shortfalls.is_empty() {
        return Err(Box::new(ExtractionShortfall {
            scales: shortfalls,
            partial: stack,
        })
        .into());
    }
    Ok(SampledImage { grid, stack })
}
