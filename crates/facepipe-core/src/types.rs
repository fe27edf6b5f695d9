use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Length of the shorter side.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Face embedding vector (512-dimensional for the default extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Outcome of identifying a face against the gallery.
///
/// `NoFace` is an expected outcome and is routed to the response queue,
/// never treated as a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Identity { label: String, distance: f32 },
    /// Nearest distance exceeded the configured rejection threshold.
    Unrecognized { distance: f32 },
    NoFace,
}

/// Index and distance of the closest gallery entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Strategy for locating the closest gallery embedding to a probe.
pub trait Matcher {
    fn nearest<'a, I>(&self, probe: &Embedding, gallery: I) -> Option<Nearest>
    where
        I: IntoIterator<Item = &'a Embedding>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans every entry; ties keep the earliest entry in gallery order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest<'a, I>(&self, probe: &Embedding, gallery: I) -> Option<Nearest>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut best: Option<Nearest> = None;

        for (index, candidate) in gallery.into_iter().enumerate() {
            let distance = probe.euclidean_distance(candidate);
            let closer = match best {
                None => true,
                // Strict comparison: an equal distance never displaces the earlier entry.
                Some(prev) => distance < prev.distance,
            };
            if closer {
                best = Some(Nearest { index, distance });
            }
        }

        best
    }
}
