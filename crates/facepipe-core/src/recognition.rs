//! Recognition stage: embed a normalized face and identify it against the
//! gallery by Euclidean nearest neighbour.
//!
//! The nearest label is always returned for a non-empty gallery, however far
//! away it is, unless a rejection threshold is configured.

use crate::gallery::Gallery;
use crate::recognizer::{self, EmbeddingExtractor, RecognizerError};
use crate::types::{EuclideanMatcher, MatchResult};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("extractor failed: {0}")]
    Extractor(#[from] RecognizerError),
    #[error("extractor produced a {actual}-dim embedding, gallery holds {expected}-dim")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Embeds faces with an [`EmbeddingExtractor`] and matches them against a [`Gallery`].
#[derive(Clone)]
pub struct RecognitionStage {
    extractor: Arc<dyn EmbeddingExtractor>,
    gallery: Arc<Gallery>,
    distance_threshold: Option<f32>,
}

impl RecognitionStage {
    pub fn new(extractor: Arc<dyn EmbeddingExtractor>, gallery: Arc<Gallery>) -> Self {
        Self {
            extractor,
            gallery,
            distance_threshold: None,
        }
    }

    /// Reject matches farther than `threshold` as [`MatchResult::Unrecognized`].
    pub fn with_distance_threshold(mut self, threshold: Option<f32>) -> Self {
        self.distance_threshold = threshold;
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn recognize(&self, face: &RgbImage) -> Result<MatchResult, RecognitionError> {
        recognize(
            face,
            &self.gallery,
            self.extractor.as_ref(),
            self.distance_threshold,
        )
    }
}

/// Identify `face` against `gallery`.
///
/// An empty gallery or an empty face crop yields [`MatchResult::NoFace`]
/// without invoking the extractor.
pub fn recognize(
    face: &RgbImage,
    gallery: &Gallery,
    extractor: &dyn EmbeddingExtractor,
    distance_threshold: Option<f32>,
) -> Result<MatchResult, RecognitionError> {
    if gallery.is_empty() || face.width() == 0 || face.height() == 0 {
        return Ok(MatchResult::NoFace);
    }

    let input = recognizer::to_input_tensor(face);
    let probe = extractor.extract(input.view())?;

    if probe.dimension() != gallery.dimension() {
        return Err(RecognitionError::DimensionMismatch {
            expected: gallery.dimension(),
            actual: probe.dimension(),
        });
    }

    let Some((entry, nearest)) = gallery.nearest(&EuclideanMatcher, &probe) else {
        return Ok(MatchResult::NoFace);
    };

    tracing::debug!(label = %entry.label, distance = nearest.distance, "nearest gallery identity");

    match distance_threshold {
        Some(limit) if nearest.distance > limit => Ok(MatchResult::Unrecognized {
            distance: nearest.distance,
        }),
        _ => Ok(MatchResult::Identity {
            label: entry.label.clone(),
            distance: nearest.distance,
        }),
    }
}
