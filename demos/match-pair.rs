//! Dense SLS matching of two images.
//!
//! Usage: match-pair IMAGE1 IMAGE2 [HOMOGRAPHY] [OUT]
//!
//! Computes SLS fields for both (downscaled) images, matches every pixel of the first image
//! inside a small window of the second, writes the second image warped onto the first to
//! OUT (default `warped.png`) and, given a homography file mapping image 1 to image 2,
//! prints the flow error statistics.

use std::error::Error;
use std::fs;

use image::imageops::{resize, FilterType};
use image::GrayImage;
use nalgebra::{Matrix3, Vector2};
use sls_features::imaging::{to_gray_image, to_unit_float, warp_image};
use sls_features::{
    dense_flow, evaluate_flow, parse_homography, sls_pair, LogProgress, SlsOptions, TieBreak,
};

const SCALE_FACTOR: f64 = 0.25;
const SEARCH_RADIUS: usize = 3;

fn load(path: &str) -> Result<GrayImage, Box<dyn Error>> {
    let img = image::open(path)?.into_luma8();
    let width = (img.width() as f64 * SCALE_FACTOR).round().max(1.0) as u32;
    let height = (img.height() as f64 * SCALE_FACTOR).round().max(1.0) as u32;
    Ok(resize(&img, width, height, FilterType::Triangle))
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Required args: IMAGE1 IMAGE2 [HOMOGRAPHY] [OUT]");
        std::process::exit(1);
    }
    let img1 = load(&args[1])?;
    let img2 = load(&args[2])?;
    println!(
        "{}: {}x{}, {}: {}x{}",
        args[1],
        img1.width(),
        img1.height(),
        args[2],
        img2.width(),
        img2.height()
    );
    if img1.dimensions() != img2.dimensions() {
        eprintln!("dense matching needs images of the same size");
        std::process::exit(1);
    }

    let opts = SlsOptions::default();
    let out = sls_pair(&img1, &img2, &opts)?;
    println!(
        "SLS fields: {}x{} with {} channels, PCA {} -> {}",
        out.field1.cols(),
        out.field1.rows(),
        out.field1.channels(),
        out.pca.input_dim(),
        out.pca.output_dim()
    );

    let flow = dense_flow(
        &out.field1,
        &out.field2,
        SEARCH_RADIUS,
        TieBreak::ScanOrder,
        &LogProgress,
    )?;
    println!("mean flow magnitude {:.3} px", flow.mean_magnitude());

    if let Some(path) = args.get(3) {
        let h = parse_homography(&fs::read_to_string(path)?)?;
        // the homography refers to full resolution pixels
        let down = Matrix3::new_nonuniform_scaling(&Vector2::repeat(SCALE_FACTOR));
        let up = Matrix3::new_nonuniform_scaling(&Vector2::repeat(1.0 / SCALE_FACTOR));
        println!("{}", evaluate_flow(&flow, &(down * h * up), 1)?);
    }

    let warped = warp_image(&to_unit_float(&img2).view(), &flow)?;
    let out_path = args.get(4).map(String::as_str).unwrap_or("warped.png");
    to_gray_image(&warped.view()).save(out_path)?;
    println!("wrote {out_path}");
    Ok(())
}
