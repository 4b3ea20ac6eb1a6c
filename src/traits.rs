use crate::errors::Result;
use image::{GrayImage, RgbImage};

/// Foreground segmentation model used by the batch processor.
///
/// The processor only depends on this trait, so tests can inject a
/// deterministic model instead of an ONNX session.
pub trait ImageSegmentationModel: Send + Sync {
    /// Predict a foreground mask with the same dimensions as `image`.
    ///
    /// 255 is certain foreground, 0 certain background.
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage>;

    /// Side length of the square model input.
    fn get_image_size(&self) -> u32;
}

impl<M: ImageSegmentationModel + ?Sized> ImageSegmentationModel for &M {
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        (**self).predict_mask(image)
    }

    fn get_image_size(&self) -> u32 {
        (**self).get_image_size()
    }
}
