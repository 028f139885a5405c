//! PCA reduction of the descriptor stacks of an image pair.
//!
//! One basis is fitted on a random subsample drawn from both images and then applied to
//! every descriptor of both stacks, so the reduced descriptors of the two images live in
//! the same space.

use log::{debug, info};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::error::{Result, SlsError};
use crate::multiscale::DescriptorStack;

/// Mean and orthonormal basis of a PCA fit. Projects `x` to `(x - mean) * basis`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PcaBasis {
    pub mean: Array1<f32>,
    /// `D x D'`, one principal direction per column, by decreasing variance.
    pub basis: Array2<f32>,
}

impl PcaBasis {
    /// Zero mean, identity basis.
    pub fn identity(dim: usize) -> Self {
        PcaBasis {
            mean: Array1::zeros(dim),
            basis: Array2::eye(dim),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.basis.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.basis.ncols()
    }

    /// Fits the top `target` principal components of `samples`, one sample per row.
    ///
    /// Directions are ordered by decreasing eigenvalue of the sample covariance. The sign of
    /// each direction is fixed so that its largest magnitude component is positive.
    pub fn fit(samples: &ArrayView2<f32>, target: usize) -> Result<Self> {
        let (n, dim) = samples.dim();
        if n == 0 {
            return Err(SlsError::invalid("PCA needs at least one sample"));
        }
        if target == 0 || target > dim {
            return Err(SlsError::invalid(format!(
                "cannot reduce {dim} dimensions to {target}"
            )));
        }
        let samples = samples.mapv(f64::from);
        let mean = samples
            .mean_axis(Axis(0))
            .ok_or_else(|| SlsError::invalid("PCA needs at least one sample"))?;
        let centered = &samples - &mean.view().insert_axis(Axis(0));
        let cov = centered.t().dot(&centered) / n as f64;

        let eigen = SymmetricEigen::new(DMatrix::from_fn(dim, dim, |i, j| cov[(i, j)]));
        let mut order: Vec<usize> = (0..dim).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .total_cmp(&eigen.eigenvalues[a])
                .then(a.cmp(&b))
        });

        let mut basis = Array2::zeros((dim, target));
        for (k, &i) in order.iter().take(target).enumerate() {
            let v = eigen.eigenvectors.column(i);
            let pivot = (0..dim).fold(0, |best, j| {
                if v[j].abs() > v[best].abs() {
                    j
                } else {
                    best
                }
            });
            let sign = if v[pivot] < 0.0 { -1.0 } else { 1.0 };
            for j in 0..dim {
                basis[(j, k)] = (sign * v[j]) as f32;
            }
        }
        Ok(PcaBasis {
            mean: mean.mapv(|m| m as f32),
            basis,
        })
    }

    pub fn project(&self, x: &ArrayView1<f32>) -> Array1<f32> {
        (x - &self.mean).dot(&self.basis)
    }

    /// Projects every column of `stack`.
    pub fn project_stack(&self, stack: &DescriptorStack) -> Result<DescriptorStack> {
        if stack.dim() != self.input_dim() {
            return Err(SlsError::invalid(format!(
                "stack has dimension {}, basis expects {}",
                stack.dim(),
                self.input_dim()
            )));
        }
        let centered = &stack.view() - &self.mean.view().insert_axis(Axis(1));
        let reduced = self.basis.t().dot(&centered);
        DescriptorStack::from_array(reduced, stack.num_points(), stack.num_sigma())
    }
}

/// Reduced stacks of an image pair and the basis they were projected with.
#[derive(Debug, Clone)]
pub struct ReducedPair {
    pub basis: PcaBasis,
    pub first: DescriptorStack,
    pub second: DescriptorStack,
}

/// How many of the `max_samples` columns come from each stack. The budget is split in
/// proportion to the stack sizes and the two counts always add up to `max_samples`.
/// A budget of 0, or one that covers both stacks, keeps every column.
pub fn split_budget(n1: usize, n2: usize, max_samples: usize) -> (usize, usize) {
    let total = n1 + n2;
    if max_samples == 0 || total <= max_samples {
        return (n1, n2);
    }
    let k1 = (max_samples as u128 * n1 as u128 / total as u128) as usize;
    (k1, max_samples - k1)
}

/// Fits a PCA basis of dimension `target` on at most `max_samples` randomly chosen
/// descriptors of both stacks and projects both stacks through it.
///
/// `target == 0` or `target >= D` leaves the stacks untouched and returns the identity
/// basis. The column selection only depends on `seed` and the stack sizes.
pub fn reduce_dimensions(
    first: &DescriptorStack,
    second: &DescriptorStack,
    target: usize,
    max_samples: usize,
    seed: u64,
) -> Result<ReducedPair> {
    let dim = first.dim();
    if second.dim() != dim {
        return Err(SlsError::invalid(format!(
            "descriptor dimensions differ: {dim} and {}",
            second.dim()
        )));
    }
    if target == 0 || target >= dim {
        debug!("no dimensionality reduction ({dim} -> {target})");
        return Ok(ReducedPair {
            basis: PcaBasis::identity(dim),
            first: first.clone(),
            second: second.clone(),
        });
    }

    let (n1, n2) = (first.num_columns(), second.num_columns());
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut idx1: Vec<usize> = (0..n1).collect();
    let mut idx2: Vec<usize> = (0..n2).collect();
    idx1.shuffle(&mut rng);
    idx2.shuffle(&mut rng);
    let (k1, k2) = split_budget(n1, n2, max_samples);
    idx1.truncate(k1);
    idx2.truncate(k2);

    let mut samples = Array2::zeros((k1 + k2, dim));
    let picks = idx1
        .iter()
        .map(|&c| first.view().index_axis_move(Axis(1), c))
        .chain(
            idx2.iter()
                .map(|&c| second.view().index_axis_move(Axis(1), c)),
        );
    samples
        .rows_mut()
        .into_iter()
        .zip(picks)
        .for_each(|(mut row, col)| row.assign(&col));

    let basis = PcaBasis::fit(&samples.view(), target)?;
    info!(
        "PCA {dim} -> {target} fitted on {} descriptors ({k1} + {k2})",
        k1 + k2
    );
    Ok(ReducedPair {
        first: basis.project_stack(first)?,
        second: basis.project_stack(second)?,
        basis,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::Rng;

    use super::*;

    fn random_stack(seed: u64, dim: usize, points: usize, sigmas: usize) -> DescriptorStack {
        let mut rng = Pcg64::seed_from_u64(seed);
        let data = Array2::from_shape_fn((dim, points * sigmas), |_| rng.gen::<f32>());
        DescriptorStack::from_array(data, points, sigmas).unwrap()
    }

    #[test]
    fn budget_split_is_proportional_and_exact() {
        assert_eq!(split_budget(30, 10, 20), (15, 5));
        assert_eq!(split_budget(7, 6, 5), (2, 3));
        assert_eq!(split_budget(3, 4, 100), (3, 4));
        assert_eq!(split_budget(300, 400, 0), (300, 400));
        let (a, b) = split_budget(1001, 999, 777);
        assert_eq!(a + b, 777);
        assert!(a <= 1001 && b <= 999);
    }

    #[test]
    fn finds_dominant_direction() {
        // points spread along (1, 2, 2) / 3 with a little noise in the other directions
        let mut rng = Pcg64::seed_from_u64(7);
        let samples = Array2::from_shape_fn((200, 3), |(i, j)| {
            let t = i as f32 / 10.0 - 10.0;
            let dir = [1.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0][j];
            5.0 + t * dir + rng.gen_range(-0.01..0.01)
        });
        let pca = PcaBasis::fit(&samples.view(), 1).unwrap();
        assert_eq!(pca.basis.dim(), (3, 1));
        assert_abs_diff_eq!(pca.basis[(0, 0)], 1.0 / 3.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pca.basis[(1, 0)], 2.0 / 3.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pca.basis[(2, 0)], 2.0 / 3.0, epsilon = 1e-2);
        assert_abs_diff_eq!(pca.mean[0], 5.0 - 0.05 / 3.0, epsilon = 1e-2);
    }

    #[test]
    fn basis_is_orthonormal() {
        let stack = random_stack(1, 8, 50, 3);
        let samples = stack.view().t().to_owned();
        let pca = PcaBasis::fit(&samples.view(), 5).unwrap();
        let gram = pca.basis.t().dot(&pca.basis);
        for i in 0..5 {
            for j in 0..5 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[(i, j)], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn full_rank_projection_preserves_distances() {
        let a = random_stack(2, 6, 20, 2);
        let b = random_stack(3, 6, 15, 2);
        let mut samples = a.view().t().to_owned();
        samples.append(Axis(0), b.view().t()).unwrap();
        let pca = PcaBasis::fit(&samples.view(), 6).unwrap();
        let ra = pca.project_stack(&a).unwrap();
        let rb = pca.project_stack(&b).unwrap();
        for (i, j) in [(0, 1), (3, 17), (39, 5)] {
            let d_orig = &a.view().column(i) - &b.view().column(j);
            let d_red = &ra.view().column(i) - &rb.view().column(j);
            assert_abs_diff_eq!(d_orig.dot(&d_orig), d_red.dot(&d_red), epsilon = 1e-4);
        }
    }

    #[test]
    fn no_reduction_passes_stacks_through() {
        let a = random_stack(4, 5, 10, 2);
        let b = random_stack(5, 5, 12, 2);
        for target in [0, 5, 9] {
            let reduced = reduce_dimensions(&a, &b, target, 0, 0).unwrap();
            assert_eq!(reduced.first, a);
            assert_eq!(reduced.second, b);
            assert_eq!(reduced.basis, PcaBasis::identity(5));
        }
    }

    #[test]
    fn reduction_is_deterministic_for_a_seed() {
        let a = random_stack(6, 16, 40, 4);
        let b = random_stack(7, 16, 30, 4);
        let r1 = reduce_dimensions(&a, &b, 6, 100, 42).unwrap();
        let r2 = reduce_dimensions(&a, &b, 6, 100, 42).unwrap();
        assert_eq!(r1.basis, r2.basis);
        assert_eq!(r1.first, r2.first);
        assert_eq!(r1.second, r2.second);
        assert_eq!(r1.first.dim(), 6);
        assert_eq!(r1.first.num_points(), 40);
        assert_eq!(r1.second.num_columns(), 120);
    }

    #[test]
    fn projection_matches_per_vector_projection() {
        let a = random_stack(8, 4, 6, 2);
        let b = random_stack(9, 4, 6, 2);
        let reduced = reduce_dimensions(&a, &b, 2, 0, 1).unwrap();
        let single = reduced.basis.project(&a.view().column(5));
        let col = reduced.first.view().column(5).to_owned();
        assert_abs_diff_eq!(single[0], col[0], epsilon = 1e-5);
        assert_abs_diff_eq!(single[1], col[1], epsilon = 1e-5);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let a = random_stack(1, 4, 3, 1);
        let b = random_stack(1, 5, 3, 1);
        assert!(reduce_dimensions(&a, &b, 2, 0, 0).is_err());
        assert!(PcaBasis::fit(&array![[1.0_f32, 2.0]].view(), 3).is_err());
    }
}
