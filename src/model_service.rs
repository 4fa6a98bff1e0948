use crate::{config::ModelConfig, error::InferenceError, ort_service::OrtSegmentationModel};
use image::DynamicImage;
use ndarray::{Array, Array2, Array4, ArrayD, Axis, Ix2};
use std::sync::Arc;

/// Opaque segmentation model. `preprocess` owns the tensor layout and
/// normalization the model expects; `predict` returns a 2-D confidence mask.
pub trait SegmentationModel: Send + Sync + 'static {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, InferenceError>;

    fn predict(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError>;
}

pub fn build_model(
    config: &ModelConfig,
) -> Result<Arc<dyn SegmentationModel>, Box<dyn std::error::Error>> {
    let model: Arc<dyn SegmentationModel> = match config {
        ModelConfig::Onnx(onnx) => Arc::new(OrtSegmentationModel::new(onnx)?),
        ModelConfig::Passthrough => {
            tracing::warn!("Using the passthrough model, masks echo the input intensities");
            Arc::new(PassthroughModel)
        }
    };
    Ok(model)
}

/// Echoes the normalized grayscale input back as the mask. Lets the service
/// run end to end without model weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughModel;

impl SegmentationModel for PassthroughModel {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, InferenceError> {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        let data = gray.into_raw().into_iter().map(|v| v as f32 / 255.).collect();

        Array::from_shape_vec((1, 1, height as usize, width as usize), data)
            .map_err(|e| InferenceError::Preprocess(e.to_string()))
    }

    fn predict(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        squeeze_mask(input.into_dyn())
    }
}

/// Reduces a model output such as `(1, 1, H, W)`, `(1, H, W)` or
/// `(1, H, W, 1)` to `(H, W)`.
pub fn squeeze_mask(output: ArrayD<f32>) -> Result<Array2<f32>, InferenceError> {
    let mut output = output;
    while output.ndim() > 2 && output.shape()[0] == 1 {
        output = output.index_axis_move(Axis(0), 0);
    }
    if output.ndim() == 3 && output.shape()[2] == 1 {
        output = output.index_axis_move(Axis(2), 0);
    }

    let shape = output.shape().to_vec();
    output
        .into_dimensionality::<Ix2>()
        .map_err(|_| InferenceError::UnexpectedShape(shape))
}
