use std::path::Path;

use crate::{
    errors::{BgStripError, Result},
    traits::ImageSegmentationModel,
};
use image::{imageops, imageops::FilterType, GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Input side length of the published U2-Net export, used when the model reports a dynamic shape.
pub const DEFAULT_IMAGE_SIZE: u32 = 320;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// U2-Net salient object segmentation session.
pub struct Model {
    pub image_size: u32,
    session: Mutex<Session>,
}

impl Model {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        info!(model = %model_path.display(), "loading segmentation model");

        let mut session = SessionBuilder::new()
            .map_err(|e| model_error("session builder initialisation", e))?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| model_error("execution provider registration", e))?
            .with_memory_pattern(true)
            .map_err(|e| model_error("memory pattern configuration", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_error(&format!("loading model file {}", model_path.display()), e))?;

        let shape = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape())
            .ok_or_else(|| BgStripError::Model {
                operation: "reading model input shape".to_string(),
                source: "model has no tensor input".into(),
            })?;
        let image_size = match shape.get(2) {
            Some(&side) if side > 0 => side as u32,
            _ => DEFAULT_IMAGE_SIZE,
        };
        debug!(image_size, "model input resolution");

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![TensorRef::from_array_view(&data)
                .map_err(|e| model_error("creating warm-up tensor", e))?])
            .map_err(|e| model_error("warm-up inference", e))?;

        Ok(Self {
            image_size,
            session: Mutex::new(session),
        })
    }

    /// Run the network on a preprocessed `1x3xSxS` tensor and return the first output's
    /// first channel as an `SxS` array.
    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(
            &tensor.as_standard_layout()
        )?])?;

        let first_key = outputs.keys().next().ok_or_else(|| BgStripError::Model {
            operation: "reading inference output".to_string(),
            source: "model produced no outputs".into(),
        })?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| BgStripError::Model {
                operation: "reading inference output".to_string(),
                source: format!("output {first_key} not found").into(),
            })?
            .try_extract_array::<f32>()?;

        let dims = output.shape();
        if dims.len() < 2 {
            return Err(BgStripError::Model {
                operation: "reading inference output".to_string(),
                source: format!("unexpected output shape {dims:?}").into(),
            });
        }
        let (height, width) = (dims[dims.len() - 2], dims[dims.len() - 1]);
        let plane: Vec<f32> = output.iter().take(height * width).copied().collect();
        Ok(Array2::from_shape_vec((height, width), plane)?)
    }
}

impl ImageSegmentationModel for Model {
    fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage> {
        let tensor = preprocess(image, self.image_size);
        let prediction = self.predict(tensor.view())?;
        postprocess_mask(prediction.view(), image.width(), image.height())
    }

    fn get_image_size(&self) -> u32 {
        self.image_size
    }
}

fn model_error(operation: &str, source: ort::Error) -> BgStripError {
    BgStripError::Model {
        operation: operation.to_string(),
        source: Box::new(source),
    }
}

/// Resize to the model resolution and normalise into an ImageNet-style NCHW tensor.
///
/// Pixel values are divided by the image's brightest channel value before the
/// mean/std normalisation.
pub fn preprocess(image: &RgbImage, image_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, image_size, image_size, FilterType::Lanczos3);
    let max = resized.as_raw().iter().copied().max().unwrap_or(0);
    let scale = f32::from(max).max(1e-6);

    let mut tensor = resized.as_ndarray3().mapv(|v| f32::from(v) / scale);
    for (channel, mut plane) in tensor.axis_iter_mut(Axis(0)).enumerate() {
        plane.mapv_inplace(|v| (v - MEAN[channel]) / STD[channel]);
    }
    tensor.insert_axis(Axis(0))
}

/// Min-max normalise the raw prediction and resize it back to `width x height`.
pub fn postprocess_mask(prediction: ArrayView2<f32>, width: u32, height: u32) -> Result<GrayImage> {
    let (rows, cols) = prediction.dim();
    let (min, max) = prediction
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    let pixels: Vec<u8> = prediction
        .iter()
        .map(|&v| {
            if range > f32::EPSILON {
                ((v - min) / range * 255.0) as u8
            } else {
                0
            }
        })
        .collect();

    let mask: GrayImage = ImageBuffer::<Luma<u8>, _>::from_raw(cols as u32, rows as u32, pixels)
        .ok_or_else(|| BgStripError::Model {
            operation: "building mask image".to_string(),
            source: format!("prediction of shape {rows}x{cols} does not fit a mask buffer").into(),
        })?;
    Ok(imageops::resize(&mask, width, height, FilterType::Lanczos3))
}
