//! Brute force dense correspondence search between two descriptor fields.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use ndarray::ArrayView1;

use crate::error::{Result, SlsError};
use crate::field::{DescriptorField, FlowField};
use crate::map_indices;
use crate::progress::{ProgressEvent, ProgressSink, Stage};

const PROGRESS_INTERVAL: usize = 10;

/// Which displacement wins when several target cells are equally close.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum TieBreak {
    /// First minimum in row-major scan order of the search window.
    #[default]
    ScanOrder,
    /// Smallest `|dx| + |dy|`, then smallest `dy`, then smallest `dx`.
    Canonical,
}

impl TieBreak {
    #[inline]
    fn prefers(self, (dx, dy): (isize, isize), (best_dx, best_dy): (isize, isize)) -> bool {
        match self {
            TieBreak::ScanOrder => false,
            TieBreak::Canonical => {
                let key = (dx.abs() + dy.abs(), dy, dx);
                key < (best_dx.abs() + best_dy.abs(), best_dy, best_dx)
            }
        }
    }
}

#[inline]
fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum()
}

/// For every cell of `source`, the offset to the closest cell of `target` within a
/// `(2 radius + 1)^2` window, clipped at the field border. Offsets are in cells; the flow
/// keeps the grid spacing of the fields.
pub fn dense_flow(
    source: &DescriptorField,
    target: &DescriptorField,
    radius: usize,
    tie_break: TieBreak,
    progress: &dyn ProgressSink,
) -> Result<FlowField> {
    let (rows, cols) = (source.rows(), source.cols());
    if (target.rows(), target.cols()) != (rows, cols) {
        return Err(SlsError::invalid(format!(
            "fields differ in shape: {rows}x{cols} and {}x{}",
            target.rows(),
            target.cols()
        )));
    }
    if source.channels() != target.channels() {
        return Err(SlsError::invalid(format!(
            "fields differ in channels: {} and {}",
            source.channels(),
            target.channels()
        )));
    }
    if source.spacing() != target.spacing() {
        return Err(SlsError::invalid(format!(
            "fields differ in grid spacing: {} and {}",
            source.spacing(),
            target.spacing()
        )));
    }
    debug!(
        "dense search over {rows}x{cols} cells, radius {radius}, {} channels",
        source.channels()
    );

    let rows_done = AtomicUsize::new(0);
    let flow_rows = map_indices(rows, |y| {
        let y_range = y.saturating_sub(radius)..=(y + radius).min(rows - 1);
        let row: Vec<(f32, f32)> = (0..cols)
            .map(|x| {
                let desc = source.get(y, x);
                let mut best = f32::INFINITY;
                let mut best_offset = (0isize, 0isize);
                for yy in y_range.clone() {
                    for xx in x.saturating_sub(radius)..=(x + radius).min(cols - 1) {
                        let d = squared_distance(desc, target.get(yy, xx));
                        let offset = (xx as isize - x as isize, yy as isize - y as isize);
                        if d < best || (d == best && tie_break.prefers(offset, best_offset)) {
                            best = d;
                            best_offset = offset;
                        }
                    }
                }
                (best_offset.0 as f32, best_offset.1 as f32)
            })
            .collect();
        let n = rows_done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_INTERVAL == 0 || n == rows {
            progress.report(ProgressEvent {
                stage: Stage::Matching,
                done: n,
                total: rows,
            });
        }
        row
    });

    let mut flow = FlowField::zeros(rows, cols).with_spacing(source.spacing());
    for (y, row) in flow_rows.into_iter().enumerate() {
        for (x, offset) in row.into_iter().enumerate() {
            flow.set(y, x, offset);
        }
    }
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ndarray::{s, Array3};
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    use super::*;
    use crate::progress::NoProgress;

    fn random_field(seed: u64, rows: usize, cols: usize, channels: usize) -> DescriptorField {
        let mut rng = Pcg64::seed_from_u64(seed);
        DescriptorField::from_array(Array3::from_shape_fn((rows, cols, channels), |_| {
            rng.gen::<f32>()
        }))
    }

    fn assert_zero_flow(flow: &FlowField) {
        let (rows, cols) = flow.dim();
        for y in 0..rows {
            for x in 0..cols {
                assert_eq!(flow.get(y, x), (0.0, 0.0), "cell ({x}, {y})");
            }
        }
    }

    #[test]
    fn matching_a_field_with_itself_gives_zero_flow() {
        let field = random_field(1, 7, 9, 5);
        for radius in 0..4 {
            let flow =
                dense_flow(&field, &field, radius, TieBreak::ScanOrder, &NoProgress).unwrap();
            assert_zero_flow(&flow);
        }
    }

    #[test]
    fn constant_field_needs_canonical_ties() {
        let field = DescriptorField::from_array(Array3::from_elem((5, 5, 3), 0.5));
        let flow = dense_flow(&field, &field, 2, TieBreak::Canonical, &NoProgress).unwrap();
        assert_zero_flow(&flow);

        // scan order picks the top left corner of the window
        let flow = dense_flow(&field, &field, 2, TieBreak::ScanOrder, &NoProgress).unwrap();
        assert_eq!(flow.get(2, 2), (-2.0, -2.0));
        assert_eq!(flow.get(0, 3), (-2.0, 0.0));
    }

    #[test]
    fn recovers_a_shift() {
        let base = random_field(2, 9, 12, 4);
        // source cell (y, x) equals target cell (y + 1, x + 2)
        let source = DescriptorField::from_array(base.view().slice(s![1.., 2.., ..]).to_owned());
        let target = DescriptorField::from_array(base.view().slice(s![..8, ..10, ..]).to_owned());
        let flow = dense_flow(&source, &target, 3, TieBreak::ScanOrder, &NoProgress).unwrap();
        for y in 0..7 {
            for x in 0..8 {
                assert_eq!(flow.get(y, x), (2.0, 1.0));
            }
        }
    }

    #[test]
    fn tie_break_policies() {
        // equal minima at offsets (-1, -1) and (1, 0) around the centre
        let source = DescriptorField::zeros(3, 3, 1);
        let mut target = Array3::from_elem((3, 3, 1), 1.0_f32);
        target[(0, 0, 0)] = 0.0;
        target[(1, 2, 0)] = 0.0;
        let target = DescriptorField::from_array(target);

        let flow = dense_flow(&source, &target, 1, TieBreak::ScanOrder, &NoProgress).unwrap();
        assert_eq!(flow.get(1, 1), (-1.0, -1.0));
        let flow = dense_flow(&source, &target, 1, TieBreak::Canonical, &NoProgress).unwrap();
        assert_eq!(flow.get(1, 1), (1.0, 0.0));
    }

    #[test]
    fn zero_radius_never_moves() {
        let a = random_field(3, 4, 4, 2);
        let b = random_field(4, 4, 4, 2);
        let flow = dense_flow(&a, &b, 0, TieBreak::ScanOrder, &NoProgress).unwrap();
        assert_zero_flow(&flow);
    }

    #[test]
    fn reports_progress_every_ten_rows() {
        let field = random_field(5, 25, 3, 2);
        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e.done);
        dense_flow(&field, &field, 1, TieBreak::ScanOrder, &sink).unwrap();
        let mut done = events.into_inner().unwrap();
        done.sort_unstable();
        assert_eq!(done, vec![10, 20, 25]);
    }

    #[test]
    fn rejects_mismatched_fields() {
        let a = random_field(6, 4, 4, 2);
        let b = random_field(6, 4, 5, 2);
        let c = random_field(6, 4, 4, 3);
        assert!(dense_flow(&a, &b, 1, TieBreak::ScanOrder, &NoProgress).is_err());
        assert!(dense_flow(&a, &c, 1, TieBreak::ScanOrder, &NoProgress).is_err());
        let d = a.clone().with_spacing(2);
        assert!(matches!(
            dense_flow(&a, &d, 1, TieBreak::ScanOrder, &NoProgress),
            Err(SlsError::InvalidInput(_))
        ));
    }

    #[test]
    fn flow_keeps_grid_spacing() {
        let field = random_field(7, 3, 4, 2).with_spacing(4);
        let flow = dense_flow(&field, &field, 1, TieBreak::ScanOrder, &NoProgress).unwrap();
        assert_eq!(flow.spacing(), 4);
        assert_zero_flow(&flow);
    }
}
