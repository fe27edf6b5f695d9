//! Wire messages exchanged between stages.
//!
//! Inbound messages carry the artifact under `encoded` (detection) or
//! `content` (recognition). Outbound messages are one of a forwarded face,
//! a terminal no-face result, or a terminal identity result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Result string of the terminal no-face message.
pub const NO_FACE_RESULT: &str = "No-Face";
/// Result string published when a match is rejected by the distance threshold.
pub const UNKNOWN_RESULT: &str = "Unknown";

/// Pipeline stage served by one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detect,
    Recognize,
}

impl Stage {
    /// Name of the inbound field holding the base64 artifact.
    pub fn payload_field(self) -> &'static str {
        match self {
            Stage::Detect => "encoded",
            Stage::Recognize => "content",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Detect => "detect",
            Stage::Recognize => "recognize",
        })
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detect" | "detection" => Ok(Stage::Detect),
            "recognize" | "recognition" => Ok(Stage::Recognize),
            other => Err(format!("unknown stage '{other}' (expected detect or recognize)")),
        }
    }
}

/// Why an inbound message was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message is not valid JSON: {0}")]
    NotJson(String),
    #[error("message is not a JSON object")]
    NotObject,
    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),
    #[error("filename '{0}' has no usable base name")]
    BadFilename(String),
}

/// One unit of work, correlated across stages by `request_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub request_id: String,
    /// Filename as received.
    pub filename: String,
    /// Base64 artifact; decoded by the orchestrator.
    pub payload: String,
    base_name: String,
}

impl WorkItem {
    /// Validate an inbound message for `stage`.
    pub fn parse(body: &[u8], stage: Stage) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| ValidationError::NotJson(e.to_string()))?;
        let object = value.as_object().ok_or(ValidationError::NotObject)?;

        let field = |name: &'static str| -> Result<String, ValidationError> {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(ValidationError::MissingField(name))
        };

        let payload = field(stage.payload_field())?;
        let request_id = field("request_id")?;
        let filename = field("filename")?;

        let base_name = Path::new(&filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::BadFilename(filename.clone()))?;

        Ok(Self {
            request_id,
            filename,
            payload,
            base_name,
        })
    }

    /// Final path component of `filename`, safe to join onto a directory.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }
}

/// Best-effort `request_id` for logging a message that failed validation.
pub fn peek_request_id(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("request_id")?.as_str().map(str::to_string)
}

/// Messages emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Detected face forwarded to the recognition stage.
    Forward {
        request_id: String,
        content: String,
        filename: String,
    },
    /// Terminal: no face in the image.
    NoFace {
        request_id: String,
        result: String,
        filename: String,
    },
    /// Terminal: identity label (or [`UNKNOWN_RESULT`]).
    Identity { request_id: String, result: String },
}

impl OutboundMessage {
    pub fn no_face(request_id: &str, filename: &str) -> Self {
        Self::NoFace {
            request_id: request_id.to_string(),
            result: NO_FACE_RESULT.to_string(),
            filename: filename.to_string(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Forward { request_id, .. }
            | Self::NoFace { request_id, .. }
            | Self::Identity { request_id, .. } => request_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
