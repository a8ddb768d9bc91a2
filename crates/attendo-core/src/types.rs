use serde::{Deserialize, Serialize};

/// Face location as `(top, right, bottom, left)` pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Multiply all four coordinates by `factor`.
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Face embedding vector produced by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    pub fn distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// An enrolled face: identity key plus its reference embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownFace {
    pub identity: String,
    pub embedding: Embedding,
}

/// A face found in one frame. `location` is in downsampled coordinates.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub location: FaceLocation,
    pub embedding: Embedding,
}

impl DetectedFace {
    /// Location mapped back to source-frame coordinates.
    pub fn frame_location(&self) -> FaceLocation {
        self.location.scaled(crate::DOWNSAMPLE_FACTOR)
    }
}

/// Nearest known face for a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, `None` when nothing passed the accept test.
    pub identity: Option<String>,
    /// Distance to the nearest entry (0.0 when the table is empty).
    pub distance: f64,
    /// Table index of the nearest entry.
    pub index: Option<usize>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self { identity: None, distance: 0.0, index: None }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for comparing a query embedding against the known faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, known: &[KnownFace], tolerance: f64) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Every entry gets its own accept test (`distance <= tolerance`); the argmin
/// picks which one is authoritative. Ties go to the lowest index, so table
/// insertion order decides. A nearest entry that fails its accept test
/// yields no match.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, known: &[KnownFace], tolerance: f64) -> MatchResult {
        if known.is_empty() {
            return MatchResult::no_match();
        }

        let mut best: Option<(usize, f64)> = None;
        let mut accepted = vec![false; known.len()];

        for (i, face) in known.iter().enumerate() {
            // a different length is a different embedding space
            if face.embedding.len() != query.len() {
                continue;
            }
            let dist = query.distance(&face.embedding);
            accepted[i] = dist <= tolerance;
            // strict `<` keeps the first index on ties
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        let Some((best_idx, best_dist)) = best else {
            return MatchResult::no_match();
        };
        if accepted[best_idx] {
            MatchResult {
                identity: Some(known[best_idx].identity.clone()),
                distance: best_dist,
                index: Some(best_idx),
            }
        } else {
            MatchResult {
                identity: None,
                distance: best_dist,
                index: Some(best_idx),
            }
        }
    }
}

/// Cosine similarity above which two ArcFace embeddings are the same person.
pub const DEFAULT_COSINE_THRESHOLD: f64 = 0.40;

/// Euclidean distance equivalent of [`DEFAULT_COSINE_THRESHOLD`] for unit
/// vectors: `sqrt(2 * (1 - 0.40))`.
pub const DEFAULT_TOLERANCE: f64 = 1.095_445_115_010_332_2;

/// Distance between two unit vectors whose cosine similarity is `similarity`.
pub fn cosine_to_distance(similarity: f64) -> f64 {
    (2.0 * (1.0 - similarity)).max(0.0).sqrt()
}
