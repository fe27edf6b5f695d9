//! Embedding gallery loaded from a trusted snapshot file.
//!
//! The snapshot stores labels and embeddings as two parallel arrays:
//!
//! ```json
//! { "names": ["alice", "bob"], "embeddings": [[0.1, 0.2], [0.3, 0.4]] }
//! ```

use crate::types::{Embedding, Matcher, Nearest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery has {names} names but {embeddings} embeddings")]
    LengthMismatch { names: usize, embeddings: usize },
    #[error("gallery entry {index} has an empty label")]
    EmptyLabel { index: usize },
    #[error("gallery entry {index} ({label}) is {actual}-dim, extractor produces {expected}-dim")]
    DimensionMismatch {
        index: usize,
        label: String,
        expected: usize,
        actual: usize,
    },
    #[error("gallery entry {index} ({label}) contains a non-finite value")]
    NonFinite { index: usize, label: String },
}

/// On-disk snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct GallerySnapshot {
    pub names: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// One known identity.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Immutable, ordered set of known identities.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dimension: usize,
}

impl Gallery {
    /// Load and validate a snapshot against the extractor's output dimension.
    pub fn load(path: &Path, dimension: usize) -> Result<Self, GalleryError> {
        let raw = std::fs::read(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: GallerySnapshot = serde_json::from_slice(&raw)?;
        let gallery = Self::from_snapshot(snapshot, dimension)?;

        tracing::info!(
            path = %path.display(),
            identities = gallery.len(),
            dimension,
            "loaded embedding gallery"
        );

        Ok(gallery)
    }

    /// Validate a snapshot. Entry order is preserved; it decides match ties.
    pub fn from_snapshot(snapshot: GallerySnapshot, dimension: usize) -> Result<Self, GalleryError> {
        let GallerySnapshot { names, embeddings } = snapshot;
        if names.len() != embeddings.len() {
            return Err(GalleryError::LengthMismatch {
                names: names.len(),
                embeddings: embeddings.len(),
            });
        }

        let mut entries = Vec::with_capacity(names.len());
        for (index, (label, values)) in names.into_iter().zip(embeddings).enumerate() {
            if label.trim().is_empty() {
                return Err(GalleryError::EmptyLabel { index });
            }
            if values.len() != dimension {
                return Err(GalleryError::DimensionMismatch {
                    index,
                    label,
                    expected: dimension,
                    actual: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(GalleryError::NonFinite { index, label });
            }
            entries.push(GalleryEntry {
                label,
                embedding: Embedding::new(values),
            });
        }

        Ok(Self { entries, dimension })
    }

    pub fn empty(dimension: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Closest entry to `probe` under `matcher`, with its label.
    pub fn nearest<M: Matcher>(&self, matcher: &M, probe: &Embedding) -> Option<(&GalleryEntry, Nearest)> {
        let nearest = matcher.nearest(probe, self.entries.iter().map(|e| &e.embedding))?;
        Some((&self.entries[nearest.index], nearest))
    }
}
