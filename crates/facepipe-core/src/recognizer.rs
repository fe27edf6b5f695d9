//! Embedding extractor capability and its ONNX Runtime implementation.
//!
//! The extractor consumes a `(1, 3, H, W)` float tensor in `[0, 1]` and
//! yields one fixed-length embedding. The bundled model (InceptionResnetV1
//! trained on VGGFace2, exported to ONNX) L2-normalizes internally, so its
//! output is used unchanged.

use crate::types::Embedding;
use image::RgbImage;
use ndarray::{Array4, ArrayView4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Output length of the default extractor.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;
const MAX_CHANNEL_VALUE: f32 = 255.0;
const EXTRACTOR_MODEL_VERSION: &str = "inception_resnet_v1_vggface2";
/// File name of the extractor model this preprocessing is built for.
pub const DEFAULT_EXTRACTOR_MODEL_FILE: &str = "inception_resnet_v1_vggface2.onnx";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("extractor session lock poisoned")]
    SessionPoisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces a face embedding from a preprocessed NCHW tensor.
///
/// Implementations must be safe to call from concurrent invocations.
pub trait EmbeddingExtractor: Send + Sync {
    /// Length of every embedding this extractor produces.
    fn dimension(&self) -> usize;

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<Embedding, RecognizerError>;
}

/// Convert an RGB face crop to a `(1, C, H, W)` tensor scaled to `[0, 1]`.
pub fn to_input_tensor(face: &RgbImage) -> Array4<f32> {
    let (width, height) = face.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / MAX_CHANNEL_VALUE;
        }
    }

    tensor
}

/// ONNX Runtime face embedding extractor.
pub struct OnnxExtractor {
    session: Mutex<Session>,
    dimension: usize,
}

impl OnnxExtractor {
    /// Load the extractor model, expecting `dimension`-length outputs.
    pub fn load(model_path: &str, dimension: usize) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            dimension,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            dimension,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<Embedding, RecognizerError> {
        let mut session = self.session.lock().map_err(|_| RecognizerError::SessionPoisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input)?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = validate_output(raw, self.dimension)?;

        Ok(Embedding {
            values,
            model_version: Some(EXTRACTOR_MODEL_VERSION.to_string()),
        })
    }
}

fn validate_output(raw: &[f32], dimension: usize) -> Result<Vec<f32>, RecognizerError> {
    if raw.len() != dimension {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {dimension}-dim embedding, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed(
            "embedding contains non-finite values".into(),
        ));
    }
    Ok(raw.to_vec())
}
