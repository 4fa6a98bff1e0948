use crate::{
    config::OnnxModelConfig,
    error::InferenceError,
    model_service::{squeeze_mask, SegmentationModel},
};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array, Array2, Array4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Resizes to the model resolution and lays the pixels out as NCHW scaled to
/// `[0, 1]`, with one or three channels.
fn transform_image(
    image: &DynamicImage,
    width: u32,
    height: u32,
    channels: usize,
) -> Result<Array4<f32>, InferenceError> {
    let resized = image.resize_exact(width, height, FilterType::CatmullRom);
    let (w, h) = (width as usize, height as usize);
    let mut input = Array::zeros((1, channels, h, w));

    match channels {
        1 => {
            for (x, y, pixel) in resized.to_luma8().enumerate_pixels() {
                input[[0, 0, y as usize, x as usize]] = (pixel.0[0] as f32) / 255.;
            }
        }
        3 => {
            for (x, y, pixel) in resized.to_rgb8().enumerate_pixels() {
                let [r, g, b] = pixel.0;
                let (x, y) = (x as usize, y as usize);
                input[[0, 0, y, x]] = (r as f32) / 255.;
                input[[0, 1, y, x]] = (g as f32) / 255.;
                input[[0, 2, y, x]] = (b as f32) / 255.;
            }
        }
        other => {
            return Err(InferenceError::Preprocess(format!(
                "unsupported channel count {}",
                other
            )))
        }
    }

    Ok(input)
}

pub struct OrtSegmentationModel {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    input_width: u32,
    input_height: u32,
    channels: usize,
    output_name: String,
}

impl OrtSegmentationModel {
    pub fn new(model_config: &OnnxModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_model_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_model_path()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            input_width: model_config.input_width,
            input_height: model_config.input_height,
            channels: model_config.channels,
            output_name: model_config.output_name.clone(),
        })
    }

    fn run_inference(&self, input: &Array4<f32>) -> Result<ndarray::ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| InferenceError::Predict(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Predict(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Predict(format!("inference failed: {}", e)))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            InferenceError::Predict(format!("model has no output named {}", self.output_name))
        })?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Predict(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Predict(format!("invalid tensor shape: {}", e)))
    }
}

impl SegmentationModel for OrtSegmentationModel {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array4<f32>, InferenceError> {
        transform_image(image, self.input_width, self.input_height, self.channels)
    }

    fn predict(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        let output = self.run_inference(&input)?;
        squeeze_mask(output)
    }
}
