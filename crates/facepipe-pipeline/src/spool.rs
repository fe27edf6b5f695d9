//! Filesystem spool queue.
//!
//! A queue is a directory. Ready messages are `*.json` files in it; a
//! consumer claims one by renaming it into `.inflight/`, acks by deleting
//! the claimed file and releases by renaming it back. Publishing writes a
//! hidden temporary file and renames it into place so consumers never see a
//! partial message. Opening a queue returns leftover `.inflight` messages to
//! the ready set, which is how a crashed consumer's work gets redelivered.

use crate::transport::{Delivery, Destination, Inbox, Publisher, TransportError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const INFLIGHT_DIR: &str = ".inflight";
const MESSAGE_EXT: &str = "json";

/// One spool directory.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    dir: PathBuf,
    inflight: PathBuf,
}

impl SpoolQueue {
    /// Open (creating if needed) the queue `name` under `root`.
    pub fn open(root: &Path, name: &str) -> Result<Self, TransportError> {
        let dir = root.join(name);
        let inflight = dir.join(INFLIGHT_DIR);
        std::fs::create_dir_all(&inflight)
            .map_err(|e| TransportError::io(format!("create spool queue {}", dir.display()), e))?;

        let queue = Self { dir, inflight };
        let recovered = queue.recover()?;
        if recovered > 0 {
            tracing::warn!(queue = %queue.dir.display(), recovered, "returned unacknowledged messages for redelivery");
        }
        Ok(queue)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn recover(&self) -> Result<usize, TransportError> {
        let mut recovered = 0;
        for name in list_messages(&self.inflight)? {
            std::fs::rename(self.inflight.join(&name), self.dir.join(&name))
                .map_err(|e| TransportError::io(format!("recover {name}"), e))?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Append a message, returning its file name.
    pub fn enqueue(&self, body: &[u8]) -> Result<String, TransportError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = uuid::Uuid::new_v4().simple();
        let name = format!("{nanos:020}-{id}.{MESSAGE_EXT}");
        let tmp = self.dir.join(format!(".tmp-{id}"));

        std::fs::write(&tmp, body).map_err(|e| TransportError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, self.dir.join(&name)).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            TransportError::io(format!("publish {name}"), e)
        })?;

        Ok(name)
    }

    /// Number of ready (unclaimed) messages.
    pub fn ready_len(&self) -> Result<usize, TransportError> {
        Ok(list_messages(&self.dir)?.len())
    }

    /// Number of claimed, unacknowledged messages.
    pub fn in_flight_len(&self) -> Result<usize, TransportError> {
        Ok(list_messages(&self.inflight)?.len())
    }
}

/// Sorted names of message files directly inside `dir`.
fn list_messages(dir: &Path) -> Result<Vec<String>, TransportError> {
    let entries = std::fs::read_dir(dir).map_err(|e| TransportError::io(format!("list {}", dir.display()), e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TransportError::io(format!("list {}", dir.display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_message = !name.starts_with('.')
            && Path::new(&name).extension().is_some_and(|ext| ext == MESSAGE_EXT)
            && entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_message {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

impl Inbox for SpoolQueue {
    fn receive(&self, max: usize) -> Result<Vec<Delivery>, TransportError> {
        let mut claimed = Vec::new();

        for name in list_messages(&self.dir)? {
            if claimed.len() >= max {
                break;
            }
            let claimed_path = self.inflight.join(&name);
            match std::fs::rename(self.dir.join(&name), &claimed_path) {
                Ok(()) => {}
                // Another consumer claimed it first.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(TransportError::io(format!("claim {name}"), e)),
            }

            match std::fs::read(&claimed_path) {
                Ok(body) => claimed.push(Delivery { id: name, body }),
                Err(e) => {
                    let _ = std::fs::rename(&claimed_path, self.dir.join(&name));
                    return Err(TransportError::io(format!("read {name}"), e));
                }
            }
        }

        Ok(claimed)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        std::fs::remove_file(self.inflight.join(&delivery.id)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => TransportError::UnknownDelivery(delivery.id.clone()),
            _ => TransportError::io(format!("ack {}", delivery.id), e),
        })
    }

    fn release(&self, delivery: &Delivery) -> Result<(), TransportError> {
        std::fs::rename(self.inflight.join(&delivery.id), self.dir.join(&delivery.id)).map_err(|e| {
            match e.kind() {
                ErrorKind::NotFound => TransportError::UnknownDelivery(delivery.id.clone()),
                _ => TransportError::io(format!("release {}", delivery.id), e),
            }
        })
    }
}

/// Publishes to the next-stage and response spool queues.
#[derive(Debug, Clone)]
pub struct SpoolPublisher {
    next_stage: SpoolQueue,
    response: SpoolQueue,
}

impl SpoolPublisher {
    pub fn open(root: &Path, next_stage: &str, response: &str) -> Result<Self, TransportError> {
        Ok(Self {
            next_stage: SpoolQueue::open(root, next_stage)?,
            response: SpoolQueue::open(root, response)?,
        })
    }
}

impl Publisher for SpoolPublisher {
    fn publish(&self, destination: Destination, body: &str) -> Result<(), TransportError> {
        let queue = match destination {
            Destination::NextStage => &self.next_stage,
            Destination::Response => &self.response,
        };
        queue.enqueue(body.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_receive_ack() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();

        q.enqueue(b"{\"n\": 1}").unwrap();
        assert_eq!(q.ready_len().unwrap(), 1);

        let got = q.receive(10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, b"{\"n\": 1}");
        assert_eq!((q.ready_len().unwrap(), q.in_flight_len().unwrap()), (0, 1));

        q.ack(&got[0]).unwrap();
        assert_eq!((q.ready_len().unwrap(), q.in_flight_len().unwrap()), (0, 0));
    }

    #[test]
    fn test_receive_respects_max_and_order() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();
        for i in 0..3 {
            q.enqueue(format!("{i}").as_bytes()).unwrap();
            // Names are timestamp-prefixed; keep them strictly increasing.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let first = q.receive(2).unwrap();
        assert_eq!(first.iter().map(|d| d.body.clone()).collect::<Vec<_>>(), vec![b"0".to_vec(), b"1".to_vec()]);
        let rest = q.receive(2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].body, b"2");
    }

    #[test]
    fn test_release_redelivers() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();
        q.enqueue(b"x").unwrap();

        let got = q.receive(1).unwrap();
        assert!(q.receive(1).unwrap().is_empty());
        q.release(&got[0]).unwrap();

        let again = q.receive(1).unwrap();
        assert_eq!(again[0].body, b"x");
    }

    #[test]
    fn test_reopen_recovers_in_flight() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();
        q.enqueue(b"x").unwrap();
        let _claimed = q.receive(1).unwrap();
        assert_eq!(q.ready_len().unwrap(), 0);

        let reopened = SpoolQueue::open(root.path(), "req").unwrap();
        assert_eq!(reopened.ready_len().unwrap(), 1);
        assert_eq!(reopened.in_flight_len().unwrap(), 0);
    }

    #[test]
    fn test_ignores_temp_and_foreign_files() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();
        std::fs::write(q.dir().join(".tmp-abc"), b"partial").unwrap();
        std::fs::write(q.dir().join("notes.txt"), b"hi").unwrap();

        assert!(q.receive(10).unwrap().is_empty());
    }

    #[test]
    fn test_ack_unknown_delivery() {
        let root = tempfile::tempdir().unwrap();
        let q = SpoolQueue::open(root.path(), "req").unwrap();
        let bogus = Delivery { id: "missing.json".into(), body: vec![] };
        assert!(matches!(q.ack(&bogus), Err(TransportError::UnknownDelivery(_))));
    }

    #[test]
    fn test_publisher_routes_by_destination() {
        let root = tempfile::tempdir().unwrap();
        let publisher = SpoolPublisher::open(root.path(), "req-queue", "resp-queue").unwrap();

        publisher.publish(Destination::NextStage, "{}").unwrap();
        publisher.publish(Destination::Response, "{}").unwrap();
        publisher.publish(Destination::Response, "{}").unwrap();

        assert_eq!(SpoolQueue::open(root.path(), "req-queue").unwrap().ready_len().unwrap(), 1);
        assert_eq!(SpoolQueue::open(root.path(), "resp-queue").unwrap().ready_len().unwrap(), 2);
    }
}
