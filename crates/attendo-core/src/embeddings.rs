//! Known-face embedding table.
//!
//! On disk the table is a JSON pair `[embeddings, identities]`: a list of
//! vectors and a list of identity strings, aligned by position.

use crate::types::{Embedding, KnownFace};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("embedding file not found: {0}")]
    NotFound(String),
    #[error("embedding file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding file malformed: {0}")]
    Malformed(String),
}

/// Serialized form: positionally aligned `(embeddings, identities)`.
type EncodedTable = (Vec<Vec<f64>>, Vec<String>);

/// Immutable table of known faces, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingTable {
    entries: Vec<KnownFace>,
}

impl EmbeddingTable {
    pub fn new(entries: Vec<KnownFace>) -> Self {
        Self { entries }
    }

    /// Load a table, failing if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CorpusError::NotFound(path.display().to_string()));
        }
        let raw = fs::read_to_string(path)?;
        let table = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            faces = table.len(),
            dims = table.dimensions().unwrap_or(0),
            "loaded embedding table"
        );
        Ok(table)
    }

    /// Load a table, falling back to an empty one on any failure.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        Self::or_empty(path.as_ref(), Self::load(path.as_ref()))
    }

    /// Like [`load_or_empty`](Self::load_or_empty), but a table whose
    /// embeddings are not `expected` long is also treated as unavailable.
    pub fn load_or_empty_with_dimensions(path: impl AsRef<Path>, expected: usize) -> Self {
        let path = path.as_ref();
        let loaded = Self::load(path).and_then(|table| {
            table.check_dimensions(expected)?;
            Ok(table)
        });
        Self::or_empty(path, loaded)
    }

    /// An empty table always passes.
    pub fn check_dimensions(&self, expected: usize) -> Result<(), CorpusError> {
        match self.dimensions() {
            Some(dims) if dims != expected => Err(CorpusError::Malformed(format!(
                "embeddings have {dims} dimensions, encoder produces {expected}"
            ))),
            _ => Ok(()),
        }
    }

    fn or_empty(path: &Path, loaded: Result<Self, CorpusError>) -> Self {
        match loaded {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "running with no known faces"
                );
                Self::default()
            }
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CorpusError> {
        let (embeddings, identities): EncodedTable =
            serde_json::from_str(raw).map_err(|e| CorpusError::Malformed(e.to_string()))?;

        if embeddings.len() != identities.len() {
            return Err(CorpusError::Malformed(format!(
                "{} embeddings but {} identities",
                embeddings.len(),
                identities.len()
            )));
        }
        if let Some(first) = embeddings.first() {
            if let Some(bad) = embeddings.iter().position(|e| e.len() != first.len()) {
                return Err(CorpusError::Malformed(format!(
                    "embedding {bad} has {} values, expected {}",
                    embeddings[bad].len(),
                    first.len()
                )));
            }
        }

        let entries = embeddings
            .into_iter()
            .zip(identities)
            .map(|(values, identity)| KnownFace {
                identity,
                embedding: Embedding::new(values),
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn to_json(&self) -> Result<String, CorpusError> {
        let encoded: EncodedTable = (
            self.entries.iter().map(|e| e.embedding.values.clone()).collect(),
            self.entries.iter().map(|e| e.identity.clone()).collect(),
        );
        serde_json::to_string(&encoded).map_err(|e| CorpusError::Malformed(e.to_string()))
    }

    /// Write the table, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CorpusError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn entries(&self) -> &[KnownFace] {
        &self.entries
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length shared by every entry.
    pub fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }
}
