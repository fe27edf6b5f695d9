//! Push-subscription adapter: poll an [`Inbox`], run the orchestrator on
//! tokio's blocking pool, and acknowledge or release each delivery.

use crate::orchestrator::{Orchestrator, Outcome};
use crate::transport::{Delivery, Inbox, TransportError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Polling and concurrency settings.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Upper bound on concurrent invocations.
    pub max_in_flight: usize,
    /// Sleep between polls of an empty inbox.
    pub poll_interval: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Published,
    Dropped,
    Failed,
}

/// Counts of settled deliveries over the subscriber's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    pub published: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl SubscriberStats {
    fn record(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Published => self.published += 1,
            Settlement::Dropped => self.dropped += 1,
            Settlement::Failed => self.failed += 1,
        }
    }
}

/// Consume `inbox` until `shutdown` resolves, then wait for in-flight
/// invocations to finish (including workspace cleanup) and return.
pub async fn run_subscriber<I, S>(
    inbox: Arc<I>,
    orchestrator: Arc<Orchestrator>,
    config: SubscriberConfig,
    shutdown: S,
) -> Result<SubscriberStats, TransportError>
where
    I: Inbox + 'static,
    S: Future<Output = ()>,
{
    let max_in_flight = config.max_in_flight.max(1);
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut tasks: JoinSet<Settlement> = JoinSet::new();
    let mut stats = SubscriberStats::default();
    tokio::pin!(shutdown);

    tracing::info!(stage = %orchestrator.stage(), max_in_flight, "subscriber started");

    loop {
        while let Some(joined) = tasks.try_join_next() {
            stats.record(joined.unwrap_or(Settlement::Failed));
        }

        let capacity = permits.available_permits();
        let deliveries = if capacity > 0 {
            let inbox = inbox.clone();
            // A failed poll is retried after `poll_interval`; in-flight work is unaffected.
            match tokio::task::spawn_blocking(move || inbox.receive(capacity)).await {
                Ok(Ok(deliveries)) => deliveries,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "inbox poll failed");
                    Vec::new()
                }
                Err(e) => {
                    tracing::error!(error = %e, "inbox poll task panicked");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let idle = deliveries.is_empty();

        for delivery in deliveries {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| TransportError::Worker(e.to_string()))?;
            tasks.spawn(dispatch(inbox.clone(), orchestrator.clone(), delivery, permit));
        }

        if idle {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record(joined.unwrap_or(Settlement::Failed));
                }
                () = tokio::time::sleep(config.poll_interval) => {}
            }
        } else {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                () = std::future::ready(()) => {}
            }
        }
    }

    tracing::info!(in_flight = tasks.len(), "subscriber stopping; draining in-flight invocations");
    while let Some(joined) = tasks.join_next().await {
        stats.record(joined.unwrap_or(Settlement::Failed));
    }
    tracing::info!(?stats, "subscriber stopped");

    Ok(stats)
}

async fn dispatch<I: Inbox + 'static>(
    inbox: Arc<I>,
    orchestrator: Arc<Orchestrator>,
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
) -> Settlement {
    let body = delivery.body.clone();
    let handled = tokio::task::spawn_blocking(move || orchestrator.handle(&body)).await;

    let settlement = match handled {
        Ok(Outcome::Published { .. }) => Settlement::Published,
        Ok(Outcome::Dropped { .. }) => Settlement::Dropped,
        Ok(Outcome::Failed { .. }) => Settlement::Failed,
        Err(e) => {
            tracing::error!(delivery = %delivery.id, error = %e, "invocation panicked");
            Settlement::Failed
        }
    };

    let id = delivery.id.clone();
    let settled = tokio::task::spawn_blocking(move || match settlement {
        Settlement::Published | Settlement::Dropped => inbox.ack(&delivery),
        Settlement::Failed => inbox.release(&delivery),
    })
    .await;

    match settled {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(delivery = %id, error = %e, "cannot settle delivery"),
        Err(e) => tracing::error!(delivery = %id, error = %e, "settle task panicked"),
    }

    settlement
}
