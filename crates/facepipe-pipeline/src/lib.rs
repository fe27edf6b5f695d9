//! facepipe-pipeline: Queue-driven orchestration of the face pipeline.
//!
//! One [`Orchestrator`] serves one stage. Two thin adapters drive it: a
//! push-subscription loop over an [`Inbox`] and a request/response entry
//! point for function-style triggers.

pub mod message;
pub mod orchestrator;
pub mod request_response;
pub mod spool;
pub mod subscriber;
pub mod transport;
pub mod workspace;

pub use message::{OutboundMessage, Stage, WorkItem};
pub use orchestrator::{Orchestrator, Outcome, PipelineConfig, PipelineError, StageResult, StageRunner};
pub use spool::{SpoolPublisher, SpoolQueue};
pub use subscriber::{run_subscriber, SubscriberConfig, SubscriberStats};
pub use transport::{Delivery, Destination, Inbox, MemoryQueue, Publisher, TransportError};
