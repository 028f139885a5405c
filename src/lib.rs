//! This crate computes Scale-less SIFT (SLS) descriptors and dense correspondences between
//! image pairs.
//!
//! At every pixel, SIFT descriptors are sampled over a range of scales. Instead of picking
//! one scale, the whole set is summarised by the low dimensional linear subspace it spans,
//! which is stored as a flattened projection matrix. Matching these subspaces gives dense
//! correspondences that hold up under scale changes between the two images.
//!
//! Useful resources:
//! - [1]: [Hassner 2012](https://talhassner.github.io/home/projects/siftscales/HassnerMayzelsZelnik_CVPR12.pdf)
//!   (On SIFTs and their Scales)
//! - [2]: [Liu 2011](https://people.csail.mit.edu/celiu/SIFTflow/) (SIFT Flow)
//! - [3]: [Rey-Otero 2014](https://www.ipol.im/pub/art/2014/82/article.pdf)
//!
//! The pipeline runs in the order of [1]: [`multiscale::sample_descriptors`] for both
//! images, [`pca::reduce_dimensions`] once for the pair, then [`subspace::encode_sls`] for
//! each image. [`extract_scaleless_descriptors`] chains the three. The resulting fields are
//! matched with [`matching::dense_flow`] and scored with [`evaluation::evaluate_flow`].

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use log::info;

pub mod descriptor;
pub mod error;
pub mod evaluation;
pub mod field;
pub mod grid;
pub mod imaging;
pub mod matching;
pub mod multiscale;
pub mod options;
pub mod pca;
pub mod progress;
pub mod subspace;

pub use descriptor::{DescriptorExtractor, SiftExtractor};
pub use error::{ExtractionShortfall, Result, ScaleShortfall, SlsError};
pub use evaluation::{evaluate_flow, parse_homography, FlowEvalResult};
pub use field::{DescriptorField, FlowField};
pub use grid::{Grid, GridPoint};
pub use matching::{dense_flow, TieBreak};
pub use multiscale::{DescriptorStack, SampledImage};
pub use options::{ScaleSpacing, SlsOptions};
pub use pca::PcaBasis;
pub use progress::{LogProgress, NoProgress, ProgressEvent, ProgressSink, Stage};

const LAMBDA_DESCR: f32 = 3.0;

// See Section 4.2 in [3]
const DESCRIPTOR_N_HISTOGRAMS: usize = 4;
// See Section 4.2 in [3]
const DESCRIPTOR_N_BINS: usize = 8;
/// Dimension of the SIFT descriptors computed by [`SiftExtractor`].
pub const DESCRIPTOR_SIZE: usize =
    DESCRIPTOR_N_HISTOGRAMS * DESCRIPTOR_N_HISTOGRAMS * DESCRIPTOR_N_BINS;

/// Assumed blur of the input image.
const SIGMA_IN: f64 = 0.5;

pub type LumaFImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Basic image operations used by the descriptor extractor.
/// For testing or benchmarking, it's useful to use exactly the same blur procedure to
/// obtain identical results and performance.
pub trait Processing {
    fn gaussian_blur(img: &LumaFImage, sigma: f64) -> LumaFImage;
}

/// Uses the `imageproc` implementation of gaussian blur.
pub struct ImageprocProcessing;

impl Processing for ImageprocProcessing {
    fn gaussian_blur(img: &LumaFImage, sigma: f64) -> LumaFImage {
        gaussian_blur_f32(img, sigma as f32)
    }
}

#[cfg(feature = "rayon")]
pub(crate) fn map_indices<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::prelude::*;
    (0..n).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "rayon"))]
pub(crate) fn map_indices<T, F>(n: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T,
{
    (0..n).map(f).collect()
}

/// SLS descriptor fields of an image pair.
#[derive(Debug, Clone)]
pub struct SlsOutput {
    /// `s2 x s1 x L` field of the first image, `L = D'(D'+1)/2`.
    pub field1: DescriptorField,
    pub field2: DescriptorField,
    pub grid1: Grid,
    pub grid2: Grid,
    /// Basis both stacks were reduced with. Identity if no reduction was configured.
    pub pca: PcaBasis,
}

/// Computes SLS descriptor fields for both images with the given extractor.
///
/// Both images share one PCA basis, fitted on descriptors of both. Fails with
/// [`SlsError::ExtractionShortfall`] if the extractor cannot describe every grid point.
pub fn extract_scaleless_descriptors<E: DescriptorExtractor + ?Sized>(
    img1: &GrayImage,
    img2: &GrayImage,
    opts: &SlsOptions,
    extractor: &E,
    progress: &dyn ProgressSink,
) -> Result<SlsOutput> {
    opts.validate()?;
    let sample = |img: &GrayImage| {
        let img = imaging::to_unit_float(img);
        multiscale::sample_descriptors(
            &img.view(),
            &opts.sigmas,
            opts.grid_spacing,
            opts.normalize_descriptors,
            extractor,
            progress,
        )
    };
    let first = sample(img1)?;
    let second = sample(img2)?;
    info!(
        "sampled {} + {} points at {} scales",
        first.stack.num_points(),
        second.stack.num_points(),
        opts.num_sigma()
    );

    let reduced = pca::reduce_dimensions(
        &first.stack,
        &second.stack,
        opts.dim_reduction,
        opts.dim_reduction_samples,
        opts.seed,
    )?;
    let subs = opts.subspace_dim;
    let field1 = subspace::encode_sls(&reduced.first, &first.grid, subs, progress)?;
    let field2 = subspace::encode_sls(&reduced.second, &second.grid, subs, progress)?;
    info!(
        "encoded SLS fields {}x{} and {}x{}, {} channels",
        field1.cols(),
        field1.rows(),
        field2.cols(),
        field2.rows(),
        field1.channels()
    );
    Ok(SlsOutput {
        field1,
        field2,
        grid1: first.grid,
        grid2: second.grid,
        pca: reduced.basis,
    })
}

/// SLS descriptor fields using SIFT with `imageproc` blur, reporting progress to the log.
pub fn sls_pair(img1: &GrayImage, img2: &GrayImage, opts: &SlsOptions) -> Result<SlsOutput> {
    extract_scaleless_descriptors(img1, img2, opts, &SiftExtractor::new(), &LogProgress)
}
