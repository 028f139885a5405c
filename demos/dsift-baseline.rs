//! Compares single scale dense SIFT with SLS on an image pair.
//!
//! Usage: dsift-baseline IMAGE1 IMAGE2 HOMOGRAPHY
//!
//! Both images must have the same size. Dense SIFT uses the middle scale of the SLS scale
//! list. Both descriptor fields are matched with the same search radius and scored against
//! the homography.

use std::error::Error;
use std::fs;

use sls_features::imaging::to_unit_float;
use sls_features::multiscale::sample_descriptors;
use sls_features::{
    dense_flow, evaluate_flow, extract_scaleless_descriptors, parse_homography, LogProgress,
    NoProgress, SiftExtractor, SlsOptions, TieBreak,
};

const SEARCH_RADIUS: usize = 3;

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        eprintln!("Required args: IMAGE1 IMAGE2 HOMOGRAPHY");
        std::process::exit(1);
    }
    let img1 = image::open(&args[1])?.into_luma8();
    let img2 = image::open(&args[2])?.into_luma8();
    let h = parse_homography(&fs::read_to_string(&args[3])?)?;

    let opts = SlsOptions {
        sigmas: vec![1.0, 2.5, 4.0],
        grid_spacing: 1,
        dim_reduction: 32,
        dim_reduction_samples: 20_000,
        subspace_dim: 6,
        ..Default::default()
    };
    let extractor = SiftExtractor::new();

    let sigma = opts.sigmas[opts.num_sigma() / 2];
    let dsift = |img: &image::GrayImage| {
        let img = to_unit_float(img);
        let sampled =
            sample_descriptors(&img.view(), &[sigma], 1, false, &extractor, &NoProgress)?;
        sampled.stack.scale_field(&sampled.grid, 0)
    };
    let (d1, d2) = (dsift(&img1)?, dsift(&img2)?);
    let flow = dense_flow(&d1, &d2, SEARCH_RADIUS, TieBreak::ScanOrder, &LogProgress)?;
    println!("DSIFT (sigma {sigma}): {}", evaluate_flow(&flow, &h, 1)?);

    let sls = extract_scaleless_descriptors(&img1, &img2, &opts, &extractor, &LogProgress)?;
    let flow = dense_flow(
        &sls.field1,
        &sls.field2,
        SEARCH_RADIUS,
        TieBreak::ScanOrder,
        &LogProgress,
    )?;
    println!("SLS ({} scales): {}", opts.num_sigma(), evaluate_flow(&flow, &h, 1)?);
    Ok(())
}
