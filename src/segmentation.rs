use image::{DynamicImage, RgbaImage};
use tracing::debug;

use crate::errors::{BgStripError, Result};
use crate::imageops_ai::{alpha_matting_cutout, naive_cutout};
use crate::traits::ImageSegmentationModel;

/// Fixed alpha matting configuration used for every file of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MattingParameters {
    /// Mask values above this are definite foreground.
    pub foreground_threshold: u8,
    /// Mask values below this are definite background.
    pub background_threshold: u8,
    /// Side of the square used to erode both definite regions.
    pub erode_size: u32,
    pub alpha_matting: bool,
}

impl MattingParameters {
    pub const DEFAULT: Self = Self {
        foreground_threshold: 240,
        background_threshold: 10,
        erode_size: 10,
        alpha_matting: true,
    };
}

impl Default for MattingParameters {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Replace the background of `image` with transparency.
///
/// The image is normalised to RGBA, the model predicts a foreground mask from its
/// colour channels, and the mask is refined by alpha matting when enabled. Inputs
/// the matting step cannot handle fall back to a plain mask cutout.
pub fn remove_background<M>(
    model: &M,
    image: &DynamicImage,
    params: &MattingParameters,
) -> Result<RgbaImage>
where
    M: ImageSegmentationModel + ?Sized,
{
    let rgba = image.to_rgba8();
    let rgb = DynamicImage::ImageRgba8(rgba.clone()).to_rgb8();

    let mask = model.predict_mask(&rgb)?;
    if mask.dimensions() != rgb.dimensions() {
        return Err(BgStripError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "mask prediction".to_string(),
            source: format!(
                "model returned a {}x{} mask for a {}x{} image",
                mask.width(),
                mask.height(),
                rgb.width(),
                rgb.height()
            )
            .into(),
        });
    }

    if params.alpha_matting {
        match alpha_matting_cutout(&rgb, &mask, params) {
            Ok(cutout) => return Ok(cutout),
            Err(BgStripError::Matting { reason }) => {
                debug!(%reason, "alpha matting skipped, using mask cutout");
            }
            Err(e) => return Err(e),
        }
    }

    naive_cutout(&rgba, &mask)
}
