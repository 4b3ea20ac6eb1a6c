pub mod closed_form;
pub mod foreground;
pub mod mask;
pub mod trimap;

use image::{GrayImage, Rgba, RgbImage, RgbaImage};
use ndarray::prelude::*;

use crate::errors::Result;
use crate::segmentation::MattingParameters;

pub use mask::naive_cutout;

/// Refine a coarse segmentation mask into a soft alpha matte and cut the
/// foreground out with estimated foreground colours.
///
/// Returns `BgStripError::Matting` when the trimap derived from `mask` has no
/// definite foreground or background.
pub fn alpha_matting_cutout(
    image: &RgbImage,
    mask: &GrayImage,
    params: &MattingParameters,
) -> Result<RgbaImage> {
    let trimap = trimap::build(
        mask,
        params.foreground_threshold,
        params.background_threshold,
        params.erode_size,
    );

    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let image_normalized: Array3<f64> = Array3::from_shape_vec(
        (h, w, 3),
        image.as_raw().iter().map(|&v| f64::from(v) / 255.0).collect(),
    )?;
    let trimap_normalized: Array2<f64> = Array2::from_shape_vec(
        (h, w),
        trimap.as_raw().iter().map(|&v| f64::from(v) / 255.0).collect(),
    )?;

    let alpha = closed_form::estimate_alpha(image_normalized.view(), trimap_normalized.view())?;
    let foreground = foreground::estimate_foreground(image_normalized.view(), alpha.view());

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgba([
            to_u8(foreground[[y, x, 0]]),
            to_u8(foreground[[y, x, 1]]),
            to_u8(foreground[[y, x, 2]]),
            to_u8(alpha[[y, x]]),
        ])
    }))
}

fn to_u8(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}
