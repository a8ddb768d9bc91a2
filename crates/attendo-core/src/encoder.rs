//! ArcFace face encoder via ONNX Runtime.
//!
//! Crops the located face, resizes it to the 112x112 model input and returns
//! an L2-normalized embedding.

use crate::recognition::FaceEncoder;
use crate::types::{Embedding, FaceLocation};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
/// Length of every embedding the encoder returns.
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region {0:?} is empty or outside the image")]
    EmptyRegion(FaceLocation),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face encoder.
pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Crop `face` out of `image` and resize it to the model input size.
    fn crop(image: &RgbImage, face: &FaceLocation) -> Result<RgbImage, EncoderError> {
        let right = face.right.min(image.width());
        let bottom = face.bottom.min(image.height());
        if right <= face.left || bottom <= face.top {
            return Err(EncoderError::EmptyRegion(*face));
        }
        let region = imageops::crop_imm(image, face.left, face.top, right - face.left, bottom - face.top).to_image();
        Ok(imageops::resize(&region, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle))
    }

    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, px) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

/// Scale a raw model output to unit length, widening to f64.
fn normalize(raw: &[f32]) -> Vec<f64> {
    let norm = raw.iter().map(|&v| (v as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|&v| v as f64 / norm).collect()
    } else {
        raw.iter().map(|&v| v as f64).collect()
    }
}

impl FaceEncoder for ArcFaceEncoder {
    fn encode(&mut self, image: &RgbImage, face: &FaceLocation) -> Result<Embedding, EncoderError> {
        let crop = Self::crop(image, face)?;
        let input = Self::preprocess(&crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(normalize(raw)))
    }
}
