use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope};
use super::event_store::{EventStore, StoreError};

// ============================================================================
// In-Memory Event Store
// ============================================================================
//
// Same contract as the ScyllaDB store: appends are all-or-nothing and are
// rejected when the caller's expected version is stale.
//
// ============================================================================

pub struct InMemoryEventStore<E> {
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope<E>>>>,
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent + 'static> EventStore<E> for InMemoryEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(anyhow::anyhow!("Cannot append empty event list").into());
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_default();

        let current_version = stream.len() as i64;
        if current_version != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let event_count = events.len();
        let mut new_version = expected_version;
        for mut envelope in events {
            new_version += 1;
            envelope.sequence_number = new_version;
            stream.push(envelope);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            new_version = new_version,
            event_count = event_count,
            "Appended events to in-memory store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        let streams = self.streams.read().await;
        Ok(streams.get(&aggregate_id).map_or(0, |s| s.len() as i64))
    }
}
