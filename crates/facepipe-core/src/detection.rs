//! Detection stage: find the most confident face, crop it to a fixed size
//! and min–max normalize it for the recognition stage.

use crate::codec::{self, EncodeError};
use crate::detector::{DetectorError, FaceDetector};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Side length of the square face crop handed to recognition.
pub const DEFAULT_FACE_SIZE: u32 = 240;
/// Detections whose shorter side is below this many pixels are ignored.
pub const DEFAULT_MIN_FACE_SIZE: f32 = 20.0;
const FACE_SUFFIX: &str = "_face.jpg";

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detector failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("cannot encode face crop: {0}")]
    Encode(#[from] EncodeError),
    #[error("cannot store face crop at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A face cropped to `face_size × face_size` and intensity-normalized.
#[derive(Debug, Clone)]
pub struct NormalizedFace {
    /// Filename stem of the source image, e.g. `a` for `a.jpg`.
    pub source_key: String,
    pub pixels: RgbImage,
}

impl NormalizedFace {
    /// Name of the stored crop: `<source_key>_face.jpg`.
    pub fn file_name(&self) -> String {
        format!("{}{FACE_SUFFIX}", self.source_key)
    }

    /// Write the crop as JPEG under `out_dir`, returning its path.
    pub fn store(&self, out_dir: &Path) -> Result<PathBuf, DetectionError> {
        let bytes = codec::encode_image(&DynamicImage::ImageRgb8(self.pixels.clone()))?;
        let path = out_dir.join(self.file_name());

        std::fs::create_dir_all(out_dir)
            .and_then(|()| std::fs::write(&path, bytes))
            .map_err(|source| DetectionError::Storage {
                path: path.display().to_string(),
                source,
            })?;

        Ok(path)
    }
}

/// Stem of a filename up to its first `.`: `photo.2024.jpg` → `photo`.
pub fn source_key(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.split('.').next().unwrap_or_default().to_string()
}

/// Runs a [`FaceDetector`] and turns its top detection into a [`NormalizedFace`].
#[derive(Clone)]
pub struct DetectionStage {
    detector: Arc<dyn FaceDetector>,
    face_size: u32,
    min_face_size: f32,
}

impl DetectionStage {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector,
            face_size: DEFAULT_FACE_SIZE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }

    pub fn with_face_size(mut self, face_size: u32) -> Self {
        self.face_size = face_size;
        self
    }

    pub fn with_min_face_size(mut self, min_face_size: f32) -> Self {
        self.min_face_size = min_face_size;
        self
    }

    /// Detect the single most confident face. `Ok(None)` means no face.
    pub fn detect(
        &self,
        image: &DynamicImage,
        filename: &str,
    ) -> Result<Option<NormalizedFace>, DetectionError> {
        let rgb = image.to_rgb8();
        let faces = self.detector.detect_faces(&rgb)?;

        // Top-1 policy: the detector sorts by confidence; the first qualifying box wins.
        let Some(face) = faces.into_iter().find(|f| f.min_side() >= self.min_face_size) else {
            tracing::debug!(filename, "no face detected");
            return Ok(None);
        };

        let Some(crop) = crop_face(&rgb, &face, self.face_size) else {
            tracing::debug!(filename, ?face, "face box lies outside the image");
            return Ok(None);
        };

        tracing::debug!(filename, confidence = face.confidence, "face detected");

        Ok(Some(NormalizedFace {
            source_key: source_key(filename),
            pixels: min_max_normalize(&crop),
        }))
    }

    /// Detect and, when a face is found, store it under `out_dir`.
    pub fn detect_and_store(
        &self,
        image: &DynamicImage,
        filename: &str,
        out_dir: &Path,
    ) -> Result<Option<PathBuf>, DetectionError> {
        match self.detect(image, filename)? {
            Some(face) => face.store(out_dir).map(Some),
            None => Ok(None),
        }
    }
}

/// Crop `face` (clamped to the image, no margin) and resize to `size × size`.
fn crop_face(image: &RgbImage, face: &BoundingBox, size: u32) -> Option<RgbImage> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x1 = face.x.max(0.0).floor();
    let y1 = face.y.max(0.0).floor();
    let x2 = (face.x + face.width).min(w).ceil();
    let y2 = (face.y + face.height).min(h).ceil();

    if !(x2 > x1 && y2 > y1) {
        return None;
    }

    let region = imageops::crop_imm(image, x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32).to_image();
    Some(imageops::resize(&region, size, size, FilterType::Triangle))
}

/// Stretch intensities so the crop's darkest value maps to 0 and its
/// brightest to 255. A flat crop becomes all zeros.
///
/// One range is taken over all channels together, not one per channel.
/// Galleries were embedded from crops normalized this way, and a per-channel
/// stretch shifts the colour balance away from them.
fn min_max_normalize(crop: &RgbImage) -> RgbImage {
    let (min, max) = crop
        .as_raw()
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let range = max.saturating_sub(min) as f32;
    let mut out = crop.clone();
    for v in out.iter_mut() {
        *v = if range > 0.0 {
            // Truncating quantization back to 8-bit.
            ((*v - min) as f32 / range * 255.0) as u8
        } else {
            0
        };
    }
    out
}
