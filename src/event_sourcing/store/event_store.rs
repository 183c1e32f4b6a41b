use async_trait::async_trait;
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, DomainEvent, EventEnvelope};

// ============================================================================
// Event Store - Repository for Events
// ============================================================================
//
// Responsibilities:
// 1. Append events (append-only) as one atomic write
// 2. Load event history for aggregates, ordered by sequence number
// 3. Reject appends made against a stale version (optimistic concurrency)
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, but current is {actual}")]
    VersionConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Append events written against `expected_version`.
    /// Returns the new version number after appending.
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError>;

    /// Load all events for an aggregate, oldest first
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError>;

    /// Current version of an aggregate; 0 when it has no events
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError>;

    async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.current_version(aggregate_id).await? > 0)
    }
}

/// Rebuild an aggregate from its history. `None` when it has no events.
pub async fn load_aggregate<A, S>(store: &S, aggregate_id: Uuid) -> Result<Option<A>, StoreError>
where
    A: Aggregate,
    A::Event: DomainEvent,
    A::Error: std::fmt::Display,
    S: EventStore<A::Event> + ?Sized,
{
    let events = store.load_events(aggregate_id).await?;

    if events.is_empty() {
        return Ok(None);
    }

    Ok(Some(A::load_from_events(events)?))
}
