//! Accuracy of a flow field against a ground truth homography.

use std::fmt;

use log::warn;
use nalgebra::{Matrix3, Vector3};

use crate::error::{Result, SlsError};
use crate::field::FlowField;

/// Error statistics over the sampled cells of a flow field. All values are 0 when no cell
/// could be evaluated.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct FlowEvalResult {
    pub mean_error: f64,
    pub median_error: f64,
    /// Percentage of samples with an error of at most 2 pixels.
    pub percent_below_2px: f64,
    /// Percentage of samples with an error of at most 5 pixels.
    pub percent_below_5px: f64,
    pub num_samples: usize,
    /// Samples the homography sends to infinity. Not part of any statistic above.
    pub num_excluded: usize,
}

impl fmt::Display for FlowEvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean {:.3} px, median {:.3} px, <=2px {:.1}%, <=5px {:.1}%, {} samples",
            self.mean_error,
            self.median_error,
            self.percent_below_2px,
            self.percent_below_5px,
            self.num_samples
        )?;
        if self.num_excluded > 0 {
            write!(f, ", {} excluded", self.num_excluded)?;
        }
        Ok(())
    }
}

/// Maps pixel `(x, y)` through `h`.
pub fn project(h: &Matrix3<f64>, x: usize, y: usize) -> Result<(f64, f64)> {
    let p = h * Vector3::new(x as f64, y as f64, 1.0);
    let (u, v) = (p.x / p.z, p.y / p.z);
    if p.z == 0.0 || !u.is_finite() || !v.is_finite() {
        return Err(SlsError::DegenerateProjection { x, y });
    }
    Ok((u, v))
}

/// Compares `flow` with the displacement induced by `h` at every `step`-th row and column.
///
/// Cell `(row, col)` sits at pixel `(col, row) * spacing` and its displacement is scaled
/// the same way, so `h` is always in pixels of the images the fields were sampled from.
/// Cells that `h` sends to infinity are logged, skipped and counted in `num_excluded`.
pub fn evaluate_flow(flow: &FlowField, h: &Matrix3<f64>, step: usize) -> Result<FlowEvalResult> {
    if step == 0 {
        return Err(SlsError::invalid("evaluation step must be at least 1"));
    }
    let (rows, cols) = flow.dim();
    let spacing = flow.spacing();
    let scale = spacing as f64;
    let mut errors = Vec::new();
    let mut num_excluded = 0;
    for row in (0..rows).step_by(step) {
        for col in (0..cols).step_by(step) {
            let (x, y) = (col * spacing, row * spacing);
            let (gx, gy) = match project(h, x, y) {
                Ok(p) => p,
                Err(e) => {
                    warn!("excluding sample: {e}");
                    num_excluded += 1;
                    continue;
                }
            };
            let (dx, dy) = flow.get(row, col);
            let ex = x as f64 + f64::from(dx) * scale - gx;
            let ey = y as f64 + f64::from(dy) * scale - gy;
            errors.push(ex.hypot(ey));
        }
    }

    if errors.is_empty() {
        return Ok(FlowEvalResult {
            num_excluded,
            ..Default::default()
        });
    }
    let n = errors.len();
    errors.sort_by(f64::total_cmp);
    let median_error = if n % 2 == 0 {
        (errors[n / 2 - 1] + errors[n / 2]) / 2.0
    } else {
        errors[n / 2]
    };
    let percent_within = |limit: f64| {
        100.0 * errors.iter().filter(|&&e| e <= limit).count() as f64 / n as f64
    };
    Ok(FlowEvalResult {
        mean_error: errors.iter().sum::<f64>() / n as f64,
        median_error,
        percent_below_2px: percent_within(2.0),
        percent_below_5px: percent_within(5.0),
        num_samples: n,
        num_excluded,
    })
}

/// Reads a homography stored as nine whitespace separated numbers in row-major order, the
/// layout of the Oxford affine covariant regions dataset.
pub fn parse_homography(text: &str) -> Result<Matrix3<f64>> {
    let values = text
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| SlsError::invalid(format!("bad homography entry {t:?}: {e}")))
        })
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != 9 {
        return Err(SlsError::invalid(format!(
            "homography needs 9 entries, got {}",
            values.len()
        )));
    }
    Ok(Matrix3::from_row_slice(&values))
}
