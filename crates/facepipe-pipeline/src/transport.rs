//! Transport seams: where inbound messages come from and outbound ones go.
//!
//! Delivery is at-least-once. A consumer acknowledges a delivery once it has
//! been published onward or deliberately dropped, and releases it otherwise
//! so the transport redelivers it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown delivery '{0}'")]
    UnknownDelivery(String),
    #[error("transport lock poisoned")]
    Poisoned,
    #[error("transport worker failed: {0}")]
    Worker(String),
}

impl TransportError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Where an outbound message is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Queue feeding the next stage.
    NextStage,
    /// Final response queue.
    Response,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Destination::NextStage => "next-stage",
            Destination::Response => "response",
        })
    }
}

/// Accepts outbound messages.
pub trait Publisher: Send + Sync {
    fn publish(&self, destination: Destination, body: &str) -> Result<(), TransportError>;
}

/// One delivered message awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub body: Vec<u8>,
}

/// Source of inbound messages.
pub trait Inbox: Send + Sync {
    /// Claim up to `max` ready messages. Claimed messages are invisible to
    /// other consumers until acked or released.
    fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError>;

    /// Permanently remove a claimed message.
    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Return a claimed message for redelivery.
    fn release(&self, delivery: &Delivery) -> Result<(), TransportError>;
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    acked: usize,
    published: Vec<(Destination, String)>,
}

/// In-process queue implementing both [`Inbox`] and [`Publisher`].
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, TransportError> {
        let mut state = self.state.lock().map_err(|_| TransportError::Poisoned)?;
        Ok(f(&mut state))
    }

    /// Enqueue an inbound message, returning its delivery id.
    pub fn push(&self, body: impl Into<Vec<u8>>) -> Result<String, TransportError> {
        let body = body.into();
        self.with_state(|s| {
            s.next_id += 1;
            let id = format!("m{}", s.next_id);
            s.ready.push_back(Delivery { id: id.clone(), body });
            id
        })
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Result<Vec<(Destination, String)>, TransportError> {
        self.with_state(|s| s.published.clone())
    }

    /// Bodies published to `destination`.
    pub fn published_to(&self, destination: Destination) -> Result<Vec<String>, TransportError> {
        self.with_state(|s| {
            s.published
                .iter()
                .filter(|(d, _)| *d == destination)
                .map(|(_, body)| body.clone())
                .collect()
        })
    }

    /// (ready, in flight, acked) counts.
    pub fn counts(&self) -> Result<(usize, usize, usize), TransportError> {
        self.with_state(|s| (s.ready.len(), s.in_flight.len(), s.acked))
    }
}

impl Publisher for MemoryQueue {
    fn publish(&self, destination: Destination, body: &str) -> Result<(), TransportError> {
        self.with_state(|s| s.published.push((destination, body.to_string())))
    }
}

impl Inbox for MemoryQueue {
    fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError> {
        self.with_state(|s| {
            let n = max.min(s.ready.len());
            let claimed: Vec<Delivery> = s.ready.drain(..n).collect();
            for d in &claimed {
                s.in_flight.insert(d.id.clone(), d.clone());
            }
            claimed
        })
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.with_state(|s| match s.in_flight.remove(&delivery.id) {
            Some(_) => {
                s.acked += 1;
                Ok(())
            }
            None => Err(TransportError::UnknownDelivery(delivery.id.clone())),
        })?
    }

    fn release(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.with_state(|s| match s.in_flight.remove(&delivery.id) {
            Some(d) => {
                s.ready.push_back(d);
                Ok(())
            }
            None => Err(TransportError::UnknownDelivery(delivery.id.clone())),
        })?
    }
}
