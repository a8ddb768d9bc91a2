//! attendo-core: face matching for attendance tracking.
//!
//! Loads the known-face embedding table, locates faces with SCRFD, encodes
//! them with ArcFace (both via ONNX Runtime) and finds the nearest known
//! identity within a distance tolerance.

pub mod detector;
pub mod embeddings;
pub mod encoder;
pub mod recognition;
pub mod types;

pub use detector::{DetectorError, ScrfdLocator};
pub use embeddings::{CorpusError, EmbeddingTable};
pub use encoder::{ArcFaceEncoder, EncoderError, ARCFACE_EMBEDDING_DIM};
pub use recognition::{downsample, FaceEncoder, FaceLocator, FaceRecognition, DOWNSAMPLE_FACTOR};
pub use types::{
    cosine_to_distance, DetectedFace, Embedding, EuclideanMatcher, FaceLocation, KnownFace,
    MatchResult, Matcher, DEFAULT_COSINE_THRESHOLD, DEFAULT_TOLERANCE,
};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
