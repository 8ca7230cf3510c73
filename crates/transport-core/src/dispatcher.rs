//! Batch dispatcher (§4.4): groups a batch's events by `eventType` in
//! first-occurrence order, runs handlers for distinct types concurrently
//! while invoking same-type handlers sequentially in arrival order, and
//! produces the ACK payload mirroring which indices succeeded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use transport_wire::{AckPayload, BatchPayload, WireEvent};

use crate::error::HandlerError;

/// A caller-supplied handler for one `eventType`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WireEvent) -> Result<(), HandlerError>;
}

/// Adapts a plain async closure into an [`EventHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(&WireEvent) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &WireEvent) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

/// Whether a backend allows one handler per event type or many (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Single,
    Many,
}

/// Owns the handler map a `Client` dispatches batches against.
pub struct HandlerRegistry {
    multiplicity: Multiplicity,
    handlers: AsyncMutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new(multiplicity: Multiplicity) -> Self {
        HandlerRegistry {
            multiplicity,
            handlers: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for `event_type`. Returns an error under
    /// [`Multiplicity::Single`] if one is already registered (§4.4).
    pub async fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), crate::error::DuplicateSubscriptionError> {
        let event_type = event_type.into();
        let mut map = self.handlers.lock().await;
        let entry = map.entry(event_type.clone()).or_default();
        if self.multiplicity == Multiplicity::Single && !entry.is_empty() {
            return Err(crate::error::DuplicateSubscriptionError(event_type));
        }
        entry.push(handler);
        Ok(())
    }

    pub async fn unsubscribe_all(&self, event_type: &str) {
        self.handlers.lock().await.remove(event_type);
    }

    async fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .lock()
            .await
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }
}

/// Run every handler registered for each event's type, grouped by type in
/// first-occurrence order (cross-type concurrent, same-type sequential,
/// §4.4), bounded by `deadline`. Returns the ACK payload: `ok` iff every
/// event either had no handler or all its handlers succeeded, with
/// `ok_indices` listing the batch-relative indices that succeeded.
pub async fn dispatch_batch(
    registry: &HandlerRegistry,
    batch: &BatchPayload,
    deadline: Duration,
) -> AckPayload {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, event) in batch.events.iter().enumerate() {
        groups
            .entry(event.event_type.clone())
            .or_insert_with(|| {
                order.push(event.event_type.clone());
                Vec::new()
            })
            .push(idx);
    }

    let run_group = |event_type: String, indices: Vec<usize>| {
        let events = &batch.events;
        async move {
            let mut ok = Vec::with_capacity(indices.len());
            for idx in indices {
                let event = &events[idx];
                let handlers = registry.handlers_for(&event_type).await;
                let mut succeeded = true;
                for handler in &handlers {
                    if let Err(err) = handler.handle(event).await {
                        warn!(event_type = %event_type, index = idx, error = %err, "event handler failed, suppressing ack for index");
                        succeeded = false;
                        break;
                    }
                }
                if succeeded {
                    ok.push(idx);
                }
            }
            ok
        }
    };

    let tasks: Vec<(String, Vec<usize>)> = order
        .into_iter()
        .map(|event_type| {
            let indices = groups.remove(&event_type).unwrap_or_default();
            (event_type, indices)
        })
        .collect();

    let result = tokio::time::timeout(
        deadline,
        join_all(
            tasks
                .into_iter()
                .map(|(event_type, indices)| run_group(event_type, indices)),
        ),
    )
    .await;

    let mut ok_indices: Vec<usize> = match result {
        Ok(groups) => groups.into_iter().flatten().collect(),
        Err(_) => {
            warn!("batch dispatch exceeded deadline, ack reflects only completed handlers");
            Vec::new()
        }
    };
    ok_indices.sort_unstable();

    let ok = ok_indices.len() == batch.events.len();
    AckPayload {
        ok,
        ok_indices: Some(ok_indices),
        stream_id: batch.stream_id.clone(),
        ack_from_offset: batch.from_offset,
        ack_to_offset: batch.to_offset,
    }
}
