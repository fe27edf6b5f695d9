use anyhow::{anyhow, bail, Context, Result};
use facepipe_core::detection::{DEFAULT_FACE_SIZE, DEFAULT_MIN_FACE_SIZE};
use facepipe_core::recognizer::{DEFAULT_EMBEDDING_DIM, DEFAULT_EXTRACTOR_MODEL_FILE};
use facepipe_pipeline::Stage;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which stage this worker serves.
    pub stage: Stage,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector model file name (relative to `model_dir`) or absolute path.
    pub detector_model: String,
    /// Extractor model file name (relative to `model_dir`) or absolute path.
    pub extractor_model: String,
    /// Gallery snapshot, required by the recognition stage.
    pub gallery_path: Option<PathBuf>,
    /// Root of the spool queues.
    pub spool_dir: PathBuf,
    pub inbound_queue: String,
    pub next_queue: String,
    pub response_queue: String,
    /// Root for per-request workspaces.
    pub work_dir: PathBuf,
    /// Side length of normalized face crops.
    pub face_size: u32,
    /// Detections whose shorter side is below this are ignored.
    pub min_face_size: f32,
    pub embedding_dim: usize,
    /// Nearest matches further than this are reported as unknown.
    pub distance_threshold: Option<f32>,
    pub max_in_flight: usize,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from `FACEPIPE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let stage: Stage = env_string("FACEPIPE_STAGE", "detect")
            .parse()
            .map_err(|e: String| anyhow!("FACEPIPE_STAGE: {e}"))?;

        let spool_dir = std::env::var("FACEPIPE_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("facepipe-spool"));

        let (inbound, next) = match stage {
            Stage::Detect => ("req-queue-1", "req-queue-2"),
            Stage::Recognize => ("req-queue-2", "req-queue-3"),
        };

        let gallery_path = std::env::var("FACEPIPE_GALLERY_PATH").ok().map(PathBuf::from);
        if stage == Stage::Recognize && gallery_path.is_none() {
            bail!("FACEPIPE_GALLERY_PATH is required for the recognition stage");
        }

        let distance_threshold = match std::env::var("FACEPIPE_DISTANCE_THRESHOLD") {
            Ok(v) => Some(
                v.parse::<f32>()
                    .with_context(|| format!("FACEPIPE_DISTANCE_THRESHOLD={v:?}"))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            stage,
            model_dir: std::env::var("FACEPIPE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            detector_model: env_string("FACEPIPE_DETECTOR_MODEL", "det_10g.onnx"),
            extractor_model: env_string("FACEPIPE_EXTRACTOR_MODEL", DEFAULT_EXTRACTOR_MODEL_FILE),
            gallery_path,
            spool_dir,
            inbound_queue: env_string("FACEPIPE_INBOUND_QUEUE", inbound),
            next_queue: env_string("FACEPIPE_NEXT_QUEUE", next),
            response_queue: env_string("FACEPIPE_RESPONSE_QUEUE", "resp-queue"),
            work_dir: std::env::var("FACEPIPE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("facepipe")),
            face_size: env_u32("FACEPIPE_FACE_SIZE", DEFAULT_FACE_SIZE),
            min_face_size: env_f32("FACEPIPE_MIN_FACE_SIZE", DEFAULT_MIN_FACE_SIZE),
            embedding_dim: env_usize("FACEPIPE_EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            distance_threshold,
            max_in_flight: env_usize("FACEPIPE_MAX_IN_FLIGHT", 4),
            poll_interval: Duration::from_millis(env_u64("FACEPIPE_POLL_INTERVAL_MS", 500)),
        })
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding extraction model.
    pub fn extractor_model_path(&self) -> String {
        self.model_dir
            .join(&self.extractor_model)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
