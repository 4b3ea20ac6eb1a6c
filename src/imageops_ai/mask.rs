use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};

use crate::errors::{BgStripError, Result};

/// Composite `image` over transparent black using `mask` as opacity.
///
/// Every channel, alpha included, is scaled by `mask / 255`.
pub fn naive_cutout(image: &RgbaImage, mask: &GrayImage) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(BgStripError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "mask application".to_string(),
            source: format!(
                "image is {}x{} but mask is {}x{}",
                image.width(),
                image.height(),
                mask.width(),
                mask.height()
            )
            .into(),
        });
    }

    let processed_pixels = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|(&Rgba(channels), &Luma([alpha]))| channels.map(|c| scale(c, alpha)))
        .collect::<Vec<u8>>();

    ImageBuffer::from_raw(image.width(), image.height(), processed_pixels).ok_or_else(|| {
        BgStripError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "mask application".to_string(),
            source: "failed to create ImageBuffer from processed pixels".into(),
        }
    })
}

fn scale(channel: u8, alpha: u8) -> u8 {
    ((u32::from(channel) * u32::from(alpha) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_empty_mask() {
        let image = RgbaImage::from_pixel(2, 1, Rgba([200, 100, 50, 255]));
        let mask = GrayImage::from_raw(2, 1, vec![255, 0]).unwrap();

        let cutout = naive_cutout(&image, &mask).unwrap();
        assert_eq!(cutout.get_pixel(0, 0), &Rgba([200, 100, 50, 255]));
        assert_eq!(cutout.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_partial_mask_scales_existing_alpha() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 128]));
        let mask = GrayImage::from_pixel(1, 1, Luma([128]));

        let cutout = naive_cutout(&image, &mask).unwrap();
        assert_eq!(cutout.get_pixel(0, 0), &Rgba([128, 128, 128, 64]));
    }

    #[test]
    fn test_dimension_mismatch() {
        let image = RgbaImage::new(4, 4);
        let mask = GrayImage::new(3, 4);
        assert!(naive_cutout(&image, &mask).is_err());
    }
}
