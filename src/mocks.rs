use crate::errors::{BgStripError, Result};
use crate::traits::ImageSegmentationModel;
use image::{GrayImage, Luma, RgbImage};
use parking_lot::Mutex;

/// Deterministic stand-in for the ONNX model.
///
/// Pixels with any channel below 128 are foreground, near-white pixels are
/// background. Every call is recorded so tests can check processing order.
#[derive(Debug, Default)]
pub struct MockSegmentationModel {
    pub image_size: u32,
    failing_width: Option<u32>,
    calls: Mutex<Vec<(u32, u32)>>,
}

impl MockSegmentationModel {
    pub fn new(image_size: u32) -> Self {
        Self {
            image_size,
            failing_width: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make inference fail for every image of the given width.
    pub fn failing_on_width(mut self, width: u32) -> Self {
        self.failing_width = Some(width);
        self
    }

    /// Dimensions of every image passed to `predict_mask`, in call order.
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().clone()
    }
}

impl ImageSegmentationModel for MockSegmentationModel {
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        self.calls.lock().push(image.dimensions());

        if self.failing_width == Some(image.width()) {
            return Err(BgStripError::Model {
                operation: "mock inference".to_string(),
                source: format!("refusing images {} pixels wide", image.width()).into(),
            });
        }

        Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let pixel = image.get_pixel(x, y);
            if pixel.0.iter().any(|&c| c < 128) {
                Luma([255])
            } else {
                Luma([0])
            }
        }))
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }
}

/// Mock with the default U2-Net resolution.
pub fn create_mock_model() -> MockSegmentationModel {
    MockSegmentationModel::new(320)
}
