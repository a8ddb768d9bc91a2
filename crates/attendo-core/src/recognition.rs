//! Per-frame face recognition: downsample, locate, encode, match.

use crate::detector::DetectorError;
use crate::embeddings::EmbeddingTable;
use crate::encoder::EncoderError;
use crate::types::{DetectedFace, Embedding, EuclideanMatcher, FaceLocation, MatchResult, Matcher};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Frames are shrunk by this factor in each dimension before detection.
pub const DOWNSAMPLE_FACTOR: u32 = 4;

/// Finds face regions in an RGB image.
pub trait FaceLocator: Send {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceLocation>, DetectorError>;
}

/// Turns one located face into an embedding.
pub trait FaceEncoder: Send {
    fn encode(&mut self, image: &RgbImage, face: &FaceLocation) -> Result<Embedding, EncoderError>;
}

/// Shrink a frame by [`DOWNSAMPLE_FACTOR`] with bilinear filtering.
pub fn downsample(frame: &RgbImage) -> RgbImage {
    let scale = 1.0 / DOWNSAMPLE_FACTOR as f32;
    let w = ((frame.width() as f32 * scale).round() as u32).max(1);
    let h = ((frame.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(frame, w, h, FilterType::Triangle)
}

/// Locator + encoder + the known-face table they are matched against.
pub struct FaceRecognition {
    locator: Box<dyn FaceLocator>,
    encoder: Box<dyn FaceEncoder>,
    table: EmbeddingTable,
    tolerance: f64,
}

impl FaceRecognition {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        encoder: Box<dyn FaceEncoder>,
        table: EmbeddingTable,
        tolerance: f64,
    ) -> Self {
        Self { locator, encoder, table, tolerance }
    }

    pub fn table(&self) -> &EmbeddingTable {
        &self.table
    }

    pub fn has_known_faces(&self) -> bool {
        !self.table.is_empty()
    }

    /// Detect and encode every face in a full-resolution RGB frame.
    ///
    /// An empty result means no face was found. A face whose encoding fails
    /// is dropped; the rest of the frame is still returned.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let small = downsample(frame);
        let locations = self.locator.locate(&small)?;
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let mut faces = Vec::with_capacity(locations.len());
        for location in locations {
            match self.encoder.encode(&small, &location) {
                Ok(embedding) => faces.push(DetectedFace { location, embedding }),
                Err(e) => {
                    tracing::warn!(error = %e, ?location, "face encoding failed; skipping face");
                }
            }
        }
        tracing::debug!(faces = faces.len(), "frame detection complete");
        Ok(faces)
    }

    /// Nearest known identity for `embedding`, if it passes the accept test.
    pub fn match_face(&self, embedding: &Embedding) -> MatchResult {
        EuclideanMatcher.compare(embedding, self.table.entries(), self.tolerance)
    }
}
