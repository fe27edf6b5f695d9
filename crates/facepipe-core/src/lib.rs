//! facepipe-core: Face detection and identification stages.
//!
//! The detector and embedding extractor are capabilities behind traits;
//! ONNX Runtime implementations are provided for both. The stages built on
//! them are pure apart from the detection stage's optional crop write.

pub mod codec;
pub mod detection;
pub mod detector;
pub mod gallery;
pub mod recognition;
pub mod recognizer;
pub mod types;

pub use detection::{DetectionError, DetectionStage, NormalizedFace};
pub use detector::{FaceDetector, ScrfdDetector};
pub use gallery::{Gallery, GalleryError};
pub use recognition::{RecognitionError, RecognitionStage};
pub use recognizer::{EmbeddingExtractor, OnnxExtractor};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, MatchResult, Matcher};
