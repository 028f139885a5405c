//! Conversions between `image` buffers and `ndarray` views, border handling and warping.

use image::buffer::ConvertBuffer;
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};
use nshare::AsNdarray2;

use crate::error::{Result, SlsError};
use crate::field::FlowField;
use crate::LumaFImage;

/// Grayscale image with pixel values in [0; 1], indexed `(row, col)`.
pub fn to_unit_float(img: &GrayImage) -> Array2<f32> {
    let img_f32: LumaFImage = img.convert();
    img_f32.as_ndarray2().to_owned()
}

/// Saturating conversion back to 8 bit.
pub fn to_gray_image(img: &ArrayView2<f32>) -> GrayImage {
    let (height, width) = img.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let v = (img[(y as usize, x as usize)] * 255.0).round();
        Luma([v.clamp(0.0, 255.0) as u8])
    })
}

pub(crate) fn to_luma_f32(img: &ArrayView2<f32>) -> LumaFImage {
    let (height, width) = img.dim();
    LumaFImage::from_vec(width as u32, height as u32, img.iter().copied().collect())
        .expect("buffer length matches dimensions")
}

pub(crate) fn from_luma_f32(img: &LumaFImage) -> Array2<f32> {
    img.as_ndarray2().to_owned()
}

/// Maps an out of range index into `0..len` by mirroring around the edge pixels without
/// repeating them (`gfedcb|abcdefgh|gfedcba`).
pub fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let m = i.rem_euclid(period);
    if m < len {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Pads `img` by `pad` pixels on every side with reflected borders.
pub fn pad_reflect(img: &ArrayView2<f32>, pad: usize) -> Result<Array2<f32>> {
    let (height, width) = img.dim();
    if height == 0 || width == 0 {
        return Err(SlsError::invalid("cannot pad an empty image"));
    }
    let pad_i = pad as isize;
    Ok(Array2::from_shape_fn(
        (height + 2 * pad, width + 2 * pad),
        |(y, x)| {
            let src_y = reflect_101(y as isize - pad_i, height);
            let src_x = reflect_101(x as isize - pad_i, width);
            img[(src_y, src_x)]
        },
    ))
}

/// Samples `target` at `(x + dx, y + dy)` for every pixel with bilinear interpolation.
/// Samples falling outside the image read as 0. The flow needs one cell per pixel.
pub fn warp_image(target: &ArrayView2<f32>, flow: &FlowField) -> Result<Array2<f32>> {
    let (height, width) = target.dim();
    if flow.spacing() != 1 {
        return Err(SlsError::invalid(format!(
            "warping needs a flow with grid spacing 1, got {}",
            flow.spacing()
        )));
    }
    if flow.dim() != (height, width) {
        return Err(SlsError::invalid(format!(
            "flow field {:?} does not match image {:?}",
            flow.dim(),
            (height, width)
        )));
    }
    let at = |y: isize, x: isize| -> f32 {
        if y < 0 || x < 0 || y >= height as isize || x >= width as isize {
            0.0
        } else {
            target[(y as usize, x as usize)]
        }
    };
    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        let (dx, dy) = flow.get(y, x);
        let sx = x as f32 + dx;
        let sy = y as f32 + dy;
        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let top = at(y0, x0) * (1.0 - fx) + at(y0, x0 + 1) * fx;
        let bottom = at(y0 + 1, x0) * (1.0 - fx) + at(y0 + 1, x0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }))
}
