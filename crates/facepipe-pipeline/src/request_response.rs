//! Request/response adapter for function-style triggers.
//!
//! Accepts a batch event (`{"Records": [{"body": "..."}]}`), an HTTP-style
//! event (`{"body": "..."}`), or a bare message object, runs every message
//! through the orchestrator and summarizes the outcomes as a status code
//! and JSON body.
//!
//! Function-style detection triggers carry the image under `content`, the
//! same field the recognition stage reads. Such bodies are mapped to the
//! detection payload field before validation.

use crate::message::Stage;
use crate::orchestrator::{Orchestrator, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Adapter reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

/// Split an event into raw message bodies.
fn message_bodies(event: &Value) -> Vec<Vec<u8>> {
    fn body_bytes(body: &Value) -> Vec<u8> {
        match body {
            Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }

    if let Some(records) = event.get("Records").and_then(Value::as_array) {
        return records
            .iter()
            .map(|record| record.get("body").map(body_bytes).unwrap_or_default())
            .collect();
    }
    match event.get("body") {
        Some(body) => vec![body_bytes(body)],
        None => vec![event.to_string().into_bytes()],
    }
}

/// Map a trigger body onto the field layout the orchestrator's stage expects.
fn adapt_body(body: Vec<u8>, stage: Stage) -> Vec<u8> {
    let target = stage.payload_field();
    let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    if fields.contains_key(target) {
        return body;
    }
    match fields.remove("content") {
        Some(payload) => {
            fields.insert(target.to_string(), payload);
            Value::Object(fields).to_string().into_bytes()
        }
        None => body,
    }
}

/// Process every message in `event`.
///
/// Returns 200 when all messages were published or dropped, and 500 naming
/// the first failure otherwise. Messages after a failure are still processed.
pub fn invoke(orchestrator: &Orchestrator, event: &Value) -> Response {
    let mut published = 0usize;
    let mut dropped = 0usize;
    let mut first_error: Option<String> = None;

    let stage = orchestrator.stage();
    for body in message_bodies(event) {
        match orchestrator.handle(&adapt_body(body, stage)) {
            Outcome::Published { .. } => published += 1,
            Outcome::Dropped { .. } => dropped += 1,
            Outcome::Failed { request_id, error } => {
                first_error.get_or_insert_with(|| match request_id {
                    Some(id) => format!("request {id}: {error}"),
                    None => error.to_string(),
                });
            }
        }
    }

    match first_error {
        None => Response {
            status_code: 200,
            body: json!({
                "message": "processed",
                "published": published,
                "dropped": dropped,
            })
            .to_string(),
        },
        Some(error) => Response {
            status_code: 500,
            body: json!({
                "message": "error processing request",
                "error": error,
                "published": published,
                "dropped": dropped,
            })
            .to_string(),
        },
    }
}
