use crate::error::{Result, SlsError};

/// How the scale list between `sigma_min` and `sigma_max` is spaced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ScaleSpacing {
    Linear,
    Geometric,
}

impl ScaleSpacing {
    /// `n` ascending sigmas from `min` to `max`, both ends included.
    /// With `n == 1` only `min` is returned.
    pub fn sigmas(self, min: f32, max: f32, n: usize) -> Vec<f32> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![min];
        }
        let last = (n - 1) as f32;
        match self {
            ScaleSpacing::Linear => (0..n)
                .map(|i| min + (max - min) * i as f32 / last)
                .collect(),
            ScaleSpacing::Geometric => {
                let ratio = (max / min).powf(1.0 / last);
                (0..n).map(|i| min * ratio.powi(i as i32)).collect()
            }
        }
    }
}

/// Parameters of the SLS pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SlsOptions {
    /// Ascending list of scales at which descriptors are sampled.
    pub sigmas: Vec<f32>,
    /// Target dimension D' of the PCA reduction. 0 disables the reduction.
    pub dim_reduction: usize,
    /// Maximum number of descriptors (from both images together) the PCA is fitted on.
    /// 0 means no limit.
    pub dim_reduction_samples: usize,
    /// Rank of the per-point subspace.
    pub subspace_dim: usize,
    /// Distance in pixels between neighbouring grid points.
    pub grid_spacing: usize,
    /// L2-normalise every raw descriptor before it enters the stack.
    pub normalize_descriptors: bool,
    /// Seed of the PCA sample selection.
    pub seed: u64,
}

impl Default for SlsOptions {
    fn default() -> Self {
        SlsOptions {
            sigmas: ScaleSpacing::Linear.sigmas(0.2, 12.0, 20),
            dim_reduction: 32,
            dim_reduction_samples: 50_000,
            subspace_dim: 10,
            grid_spacing: 1,
            normalize_descriptors: false,
            seed: 0,
        }
    }
}

impl SlsOptions {
    /// Parameters used in the SLS paper: no PCA reduction, rank 8 subspaces over 20 scales.
    pub fn paper() -> Self {
        SlsOptions {
            sigmas: ScaleSpacing::Linear.sigmas(0.5, 12.0, 20),
            dim_reduction: 0,
            dim_reduction_samples: 0,
            subspace_dim: 8,
            ..Default::default()
        }
    }

    pub fn with_sigmas(mut self, spacing: ScaleSpacing, min: f32, max: f32, n: usize) -> Self {
        self.sigmas = spacing.sigmas(min, max, n);
        self
    }

    pub fn num_sigma(&self) -> usize {
        self.sigmas.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sigmas.is_empty() {
            return Err(SlsError::invalid("at least one sigma is required"));
        }
        if self.sigmas.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SlsError::invalid(format!(
                "sigmas must be positive and finite, got {:?}",
                self.sigmas
            )));
        }
        if !self.sigmas.windows(2).all(|w| w[0] < w[1]) {
            return Err(SlsError::invalid(format!(
                "sigmas must be strictly ascending, got {:?}",
                self.sigmas
            )));
        }
        if self.grid_spacing == 0 {
            return Err(SlsError::invalid("grid spacing must be at least 1"));
        }
        if self.subspace_dim < 1 {
            return Err(SlsError::invalid("subspace dimension must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn linear_sigmas_hit_both_ends() {
        let s = ScaleSpacing::Linear.sigmas(0.5, 12.0, 20);
        assert_eq!(s.len(), 20);
        assert_abs_diff_eq!(s[0], 0.5);
        assert_abs_diff_eq!(s[19], 12.0, epsilon = 1e-5);
        assert!(s.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn geometric_sigmas_have_constant_ratio() {
        let s = ScaleSpacing::Geometric.sigmas(1.0, 8.0, 4);
        assert_abs_diff_eq!(s[1], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s[2], 4.0, epsilon = 1e-5);
        assert_abs_diff_eq!(s[3], 8.0, epsilon = 1e-4);
    }

    #[test]
    fn single_sigma() {
        assert_eq!(ScaleSpacing::Geometric.sigmas(2.0, 3.0, 1), vec![2.0]);
        assert!(ScaleSpacing::Linear.sigmas(2.0, 3.0, 0).is_empty());
    }

    #[test]
    fn geometric_scale_list_in_options() {
        let opts = SlsOptions::default().with_sigmas(ScaleSpacing::Geometric, 0.5, 16.0, 6);
        assert_eq!(opts.num_sigma(), 6);
        for (s, expected) in opts.sigmas.iter().zip([0.5_f32, 1.0, 2.0, 4.0, 8.0, 16.0]) {
            assert_abs_diff_eq!(*s, expected, epsilon = 1e-4);
        }
        opts.validate().unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        SlsOptions::default().validate().unwrap();
        SlsOptions::paper().validate().unwrap();
    }

    #[test]
    fn rejects_bad_options() {
        let bad = [
            SlsOptions {
                sigmas: vec![],
                ..Default::default()
            },
            SlsOptions {
                sigmas: vec![2.0, 1.0],
                ..Default::default()
            },
            SlsOptions {
                sigmas: vec![0.0, 1.0],
                ..Default::default()
            },
            SlsOptions {
                grid_spacing: 0,
                ..Default::default()
            },
            SlsOptions {
                subspace_dim: 0,
                ..Default::default()
            },
        ];
        for opts in bad {
            assert!(matches!(opts.validate(), Err(SlsError::InvalidInput(_))));
        }
    }

    #[test]
    fn options_round_trip_through_json() {
        let opts = SlsOptions::paper();
        let json = serde_json::to_string(&opts).unwrap();
        let back: SlsOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
