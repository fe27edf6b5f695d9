#![allow(dead_code)]

use facepipe_core::codec;
use facepipe_core::detector::{DetectorError, FaceDetector};
use facepipe_core::gallery::{Gallery, GallerySnapshot};
use facepipe_core::recognizer::{EmbeddingExtractor, RecognizerError};
use facepipe_core::{BoundingBox, DetectionStage, Embedding, RecognitionStage};
use facepipe_pipeline::{Orchestrator, PipelineConfig, Publisher, StageRunner};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::ArrayView4;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reports one face covering the middle of the image when it is bright
/// enough on average; dark images have no face.
pub struct BrightnessDetector;

impl FaceDetector for BrightnessDetector {
    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let n = image.as_raw().len().max(1) as f32;
        let mean = image.as_raw().iter().map(|&v| v as f32).sum::<f32>() / n;
        if mean < 64.0 {
            return Ok(Vec::new());
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![BoundingBox {
            x: w * 0.25,
            y: h * 0.25,
            width: w * 0.5,
            height: h * 0.5,
            confidence: 0.98,
        }])
    }
}

pub struct FailingDetector;

impl FaceDetector for FailingDetector {
    fn detect_faces(&self, _: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Err(DetectorError::InferenceFailed("simulated detector crash".into()))
    }
}

/// Returns the same embedding for every face and counts invocations.
pub struct FixedExtractor {
    pub embedding: Vec<f32>,
    pub calls: AtomicUsize,
}

impl FixedExtractor {
    pub fn new(embedding: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            embedding,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for FixedExtractor {
    fn dimension(&self) -> usize {
        self.embedding.len()
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<Embedding, RecognizerError> {
        assert_eq!(&input.shape()[..2], &[1, 3], "extractor expects NCHW input");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Embedding::new(self.embedding.clone()))
    }
}

pub fn gallery(entries: &[(&str, Vec<f32>)]) -> Arc<Gallery> {
    let dimension = entries.first().map(|(_, e)| e.len()).unwrap_or(3);
    Arc::new(
        Gallery::from_snapshot(
            GallerySnapshot {
                names: entries.iter().map(|(n, _)| n.to_string()).collect(),
                embeddings: entries.iter().map(|(_, e)| e.clone()).collect(),
            },
            dimension,
        )
        .unwrap(),
    )
}

pub fn png_payload(image: &RgbImage) -> String {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    codec::encode_payload(&buf)
}

/// 1x1 black pixel.
pub fn black_pixel() -> String {
    png_payload(&RgbImage::new(1, 1))
}

/// Bright textured image the brightness detector treats as a face.
pub fn face_image() -> String {
    png_payload(&RgbImage::from_fn(96, 96, |x, y| {
        Rgb([150 + (x % 80) as u8, 140 + (y % 90) as u8, 200])
    }))
}

pub fn detect_orchestrator(
    detector: Arc<dyn FaceDetector>,
    publisher: Arc<dyn Publisher>,
    work_root: &Path,
) -> Orchestrator {
    Orchestrator::new(
        StageRunner::Detect(DetectionStage::new(detector)),
        publisher,
        PipelineConfig {
            work_root: work_root.to_path_buf(),
        },
    )
}

pub fn recognize_orchestrator(
    extractor: Arc<dyn EmbeddingExtractor>,
    gallery: Arc<Gallery>,
    publisher: Arc<dyn Publisher>,
    work_root: &Path,
) -> Orchestrator {
    Orchestrator::new(
        StageRunner::Recognize(RecognitionStage::new(extractor, gallery)),
        publisher,
        PipelineConfig {
            work_root: work_root.to_path_buf(),
        },
    )
}

/// Entries left under `root` (workspaces that were not cleaned up).
pub fn leftovers(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}
