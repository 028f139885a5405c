//! Per-cell vector fields laid out on the sampling grid.

use ndarray::{Array3, ArrayView1, ArrayView3};

use crate::error::{Result, SlsError};

/// A `rows x cols` grid of descriptors of `channels` components each, one cell every
/// `spacing` pixels of the source image.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DescriptorField {
    data: Array3<f32>,
    spacing: usize,
}

impl DescriptorField {
    pub fn zeros(rows: usize, cols: usize, channels: usize) -> Self {
        DescriptorField {
            data: Array3::zeros((rows, cols, channels)),
            spacing: 1,
        }
    }

    /// Wraps an array of shape `(rows, cols, channels)` with one cell per pixel.
    pub fn from_array(data: Array3<f32>) -> Self {
        DescriptorField { data, spacing: 1 }
    }

    /// Sets the pixel distance between neighbouring cells (at least 1).
    pub fn with_spacing(mut self, spacing: usize) -> Self {
        self.spacing = spacing.max(1);
        self
    }

    pub fn spacing(&self) -> usize {
        self.spacing
    }

    pub fn rows(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn cols(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn get(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.slice(ndarray::s![row, col, ..])
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub(crate) fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }
}

/// Displacement `(dx, dy)` from every source cell to its matched target cell, in cells.
/// Multiply by `spacing` for pixels.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct FlowField {
    data: Array3<f32>,
    spacing: usize,
}

impl FlowField {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        FlowField {
            data: Array3::zeros((rows, cols, 2)),
            spacing: 1,
        }
    }

    /// Wraps an array of shape `(rows, cols, 2)` holding `dx` then `dy`.
    pub fn from_array(data: Array3<f32>) -> Result<Self> {
        if data.shape()[2] != 2 {
            return Err(SlsError::invalid(format!(
                "flow field needs 2 channels, got {}",
                data.shape()[2]
            )));
        }
        Ok(FlowField { data, spacing: 1 })
    }

    /// Sets the pixel distance between neighbouring cells (at least 1).
    pub fn with_spacing(mut self, spacing: usize) -> Self {
        self.spacing = spacing.max(1);
        self
    }

    pub fn spacing(&self) -> usize {
        self.spacing
    }

    /// `(rows, cols)`
    pub fn dim(&self) -> (usize, usize) {
        (self.data.shape()[0], self.data.shape()[1])
    }

    pub fn get(&self, row: usize, col: usize) -> (f32, f32) {
        (self.data[(row, col, 0)], self.data[(row, col, 1)])
    }

    pub fn set(&mut self, row: usize, col: usize, (dx, dy): (f32, f32)) {
        self.data[(row, col, 0)] = dx;
        self.data[(row, col, 1)] = dy;
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Mean length of the displacement vectors, in cells.
    pub fn mean_magnitude(&self) -> f32 {
        let (rows, cols) = self.dim();
        if rows * cols == 0 {
            return 0.0;
        }
        let total: f32 = self
            .data
            .lanes(ndarray::Axis(2))
            .into_iter()
            .map(|v| (v[0] * v[0] + v[1] * v[1]).sqrt())
            .sum();
        total / (rows * cols) as f32
    }
}
