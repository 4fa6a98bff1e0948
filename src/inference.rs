use crate::{config::ArtifactFormat, error::InferenceError, model_service::SegmentationModel};
use bytes::Bytes;
use image::{imageops::FilterType, ColorType, DynamicImage, GrayImage, Luma};
use ndarray::Array2;
use std::{any::Any, io::Cursor, sync::Arc};
use tracing::instrument;

/// Encoded outputs of one inference pass, ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedArtifacts {
    pub original: Bytes,
    pub mask: Bytes,
}

/// Runs preprocess, predict and encode for a decoded image on the blocking
/// pool. Performs no I/O.
#[derive(Clone)]
pub struct InferenceOrchestrator {
    model: Arc<dyn SegmentationModel>,
    format: ArtifactFormat,
}

impl InferenceOrchestrator {
    pub fn new(model: Arc<dyn SegmentationModel>, format: ArtifactFormat) -> Self {
        Self { model, format }
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn run(&self, image: DynamicImage) -> Result<EncodedArtifacts, InferenceError> {
        let model = self.model.clone();
        let format = self.format;

        tokio::task::spawn_blocking(move || infer_and_encode(model.as_ref(), image, format))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    InferenceError::TaskAborted(panic_message(e.into_panic()))
                } else {
                    InferenceError::TaskAborted(e.to_string())
                }
            })?
    }
}

fn infer_and_encode(
    model: &dyn SegmentationModel,
    image: DynamicImage,
    format: ArtifactFormat,
) -> Result<EncodedArtifacts, InferenceError> {
    let input = model.preprocess(&image)?;
    let prediction = model.predict(input)?;
    let mask = mask_to_grayscale(&prediction, image.width(), image.height())?;

    let original = encode(&canonical_raster(image), format)?;
    let mask = encode(&DynamicImage::ImageLuma8(mask), format)?;

    Ok(EncodedArtifacts { original, mask })
}

/// Scales confidences into 8-bit levels (`v * 255`, truncated and saturated)
/// and brings the mask back to the source image's dimensions.
pub fn mask_to_grayscale(
    mask: &Array2<f32>,
    width: u32,
    height: u32,
) -> Result<GrayImage, InferenceError> {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return Err(InferenceError::UnexpectedShape(vec![rows, cols]));
    }

    let gray = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([to_level(mask[[y as usize, x as usize]])])
    });

    if gray.dimensions() == (width, height) {
        Ok(gray)
    } else {
        Ok(image::imageops::resize(
            &gray,
            width,
            height,
            FilterType::Nearest,
        ))
    }
}

fn to_level(value: f32) -> u8 {
    // Float to int casts saturate and map NaN to zero.
    (value * 255.) as u8
}

/// Grayscale stays single channel, everything else becomes 8-bit RGB so both
/// encoders accept it.
fn canonical_raster(image: DynamicImage) -> DynamicImage {
    match image.color() {
        ColorType::L8 => image,
        ColorType::L16 | ColorType::La8 | ColorType::La16 => {
            DynamicImage::ImageLuma8(image.to_luma8())
        }
        ColorType::Rgb8 => image,
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    }
}

fn encode(image: &DynamicImage, format: ArtifactFormat) -> Result<Bytes, InferenceError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), format.image_format())?;
    Ok(Bytes::from(buffer))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("model panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("model panicked: {}", message)
    } else {
        "model panicked".into()
    }
}
