//! Drives one stage for one inbound message.
//!
//! Per invocation: `Received → Decoded → Detected{Face|NoFace} →
//! [Recognized{Identity|NoFace}]`, ending `Published`, `Dropped` (malformed
//! input) or `Failed`. Failures are logged and reported, never retried here;
//! redelivery is the transport's job.

use crate::message::{self, OutboundMessage, Stage, ValidationError, WorkItem, UNKNOWN_RESULT};
use crate::transport::{Destination, Publisher, TransportError};
use crate::workspace::Workspace;
use facepipe_core::codec::{self, DecodeError};
use facepipe_core::{DetectionError, DetectionStage, MatchResult, RecognitionError, RecognitionStage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const INPUT_DIR: &str = "input";
const FACES_DIR: &str = "faces";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("workspace {context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(#[from] TransportError),
}

fn storage(context: &'static str) -> impl FnOnce(std::io::Error) -> PipelineError {
    move |source| PipelineError::Storage { context, source }
}

/// Settings the orchestrator needs beyond its stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory for per-invocation workspaces.
    pub work_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("facepipe"),
        }
    }
}

/// The stage an orchestrator serves, with its capabilities.
#[derive(Clone)]
pub enum StageRunner {
    Detect(DetectionStage),
    Recognize(RecognitionStage),
}

impl StageRunner {
    pub fn stage(&self) -> Stage {
        match self {
            StageRunner::Detect(_) => Stage::Detect,
            StageRunner::Recognize(_) => Stage::Recognize,
        }
    }
}

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Face found and forwarded under this filename.
    Face { filename: String },
    NoFace,
    Identity { label: String },
    Unrecognized,
}

/// Terminal state of one invocation.
#[derive(Debug)]
pub enum Outcome {
    Published {
        request_id: String,
        destination: Destination,
        result: StageResult,
    },
    Dropped {
        reason: ValidationError,
    },
    Failed {
        request_id: Option<String>,
        error: PipelineError,
    },
}

impl Outcome {
    /// Whether the delivery should be acknowledged (published or dropped).
    pub fn is_settled(&self) -> bool {
        !matches!(self, Outcome::Failed { .. })
    }
}

/// Runs one stage per inbound message and publishes the result.
pub struct Orchestrator {
    runner: StageRunner,
    publisher: Arc<dyn Publisher>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(runner: StageRunner, publisher: Arc<dyn Publisher>, config: PipelineConfig) -> Self {
        Self {
            runner,
            publisher,
            config,
        }
    }

    pub fn stage(&self) -> Stage {
        self.runner.stage()
    }

    /// Process one raw inbound message. Never panics on bad input and never
    /// returns an error: every path ends in an [`Outcome`].
    pub fn handle(&self, body: &[u8]) -> Outcome {
        let stage = self.stage();

        let item = match WorkItem::parse(body, stage) {
            Ok(item) => item,
            Err(reason) => {
                let request_id = message::peek_request_id(body);
                tracing::warn!(
                    %stage,
                    request_id = request_id.as_deref().unwrap_or("-"),
                    %reason,
                    "dropped malformed message"
                );
                return Outcome::Dropped { reason };
            }
        };

        tracing::debug!(%stage, request_id = %item.request_id, filename = %item.filename, "received");

        match self.run_scoped(&item) {
            Ok((destination, result)) => {
                tracing::info!(
                    %stage,
                    request_id = %item.request_id,
                    %destination,
                    ?result,
                    "published"
                );
                Outcome::Published {
                    request_id: item.request_id,
                    destination,
                    result,
                }
            }
            Err(error) => {
                tracing::error!(%stage, request_id = %item.request_id, %error, "invocation failed");
                Outcome::Failed {
                    request_id: Some(item.request_id),
                    error,
                }
            }
        }
    }

    /// Run the stage inside a fresh workspace, removing it on every path.
    fn run_scoped(&self, item: &WorkItem) -> Result<(Destination, StageResult), PipelineError> {
        let workspace = Workspace::create(&self.config.work_root).map_err(storage("create"))?;

        let result = self.run(item, workspace.path());
        let cleanup = workspace.close();

        match (result, cleanup) {
            (Ok(done), Ok(())) => Ok(done),
            (Ok(_), Err(e)) => Err(storage("remove")(e)),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    tracing::warn!(request_id = %item.request_id, error = %cleanup_err, "workspace removal failed");
                }
                Err(e)
            }
        }
    }

    fn run(&self, item: &WorkItem, workspace: &Path) -> Result<(Destination, StageResult), PipelineError> {
        let bytes = codec::decode_payload(&item.payload)?;

        let input_dir = workspace.join(INPUT_DIR);
        std::fs::create_dir_all(&input_dir).map_err(storage("create input dir"))?;
        std::fs::write(input_dir.join(item.base_name()), &bytes).map_err(storage("write input"))?;

        let image = codec::decode_image(&bytes)?;
        tracing::debug!(request_id = %item.request_id, width = image.width(), height = image.height(), "decoded");

        match &self.runner {
            StageRunner::Detect(detection) => {
                let stored = detection.detect_and_store(&image, item.base_name(), &workspace.join(FACES_DIR))?;
                let Some(face_path) = stored else {
                    return self.publish_no_face(item);
                };

                let content = codec::encode_payload(&std::fs::read(&face_path).map_err(storage("read face"))?);
                let filename = face_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                self.publish(
                    Destination::NextStage,
                    &OutboundMessage::Forward {
                        request_id: item.request_id.clone(),
                        content,
                        filename: filename.clone(),
                    },
                )?;
                Ok((Destination::NextStage, StageResult::Face { filename }))
            }
            StageRunner::Recognize(recognition) => match recognition.recognize(&image.to_rgb8())? {
                MatchResult::Identity { label, distance } => {
                    tracing::debug!(request_id = %item.request_id, %label, distance, "recognized");
                    self.publish_identity(item, &label)?;
                    Ok((Destination::Response, StageResult::Identity { label }))
                }
                MatchResult::Unrecognized { distance } => {
                    tracing::debug!(request_id = %item.request_id, distance, "nearest identity beyond threshold");
                    self.publish_identity(item, UNKNOWN_RESULT)?;
                    Ok((Destination::Response, StageResult::Unrecognized))
                }
                MatchResult::NoFace => self.publish_no_face(item),
            },
        }
    }

    fn publish_no_face(&self, item: &WorkItem) -> Result<(Destination, StageResult), PipelineError> {
        tracing::debug!(request_id = %item.request_id, "no face");
        self.publish(
            Destination::Response,
            &OutboundMessage::no_face(&item.request_id, &item.filename),
        )?;
        Ok((Destination::Response, StageResult::NoFace))
    }

    fn publish_identity(&self, item: &WorkItem, result: &str) -> Result<(), PipelineError> {
        self.publish(
            Destination::Response,
            &OutboundMessage::Identity {
                request_id: item.request_id.clone(),
                result: result.to_string(),
            },
        )
    }

    fn publish(&self, destination: Destination, message: &OutboundMessage) -> Result<(), PipelineError> {
        self.publisher.publish(destination, &message.to_json()?)?;
        Ok(())
    }
}
