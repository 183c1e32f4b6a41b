use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::serialize::row::SerializeRow;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use uuid::Uuid;

use crate::event_sourcing::core::{deserialize_event, serialize_event, DomainEvent, EventEnvelope};
use super::event_store::{EventStore, StoreError};

// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// Each append is two batches:
// 1. event_store rows, inserted `IF NOT EXISTS` in a single-partition LWT
//    batch. A sequence number already taken means another writer won.
// 2. outbox_messages rows and the aggregate_sequence row, written only once
//    the history rows were applied.
//
// aggregate_sequence is read first to fail fast on a stale version, but the
// LWT batch is what decides a race between processes.
//
// ============================================================================

type EventRow = (Uuid, i64, Uuid, String, i32, String, Uuid, DateTime<Utc>, Option<HashMap<String, String>>);

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS event_store (
        aggregate_id uuid, sequence_number bigint, event_id uuid, event_type text,
        event_version int, event_data text, correlation_id uuid, timestamp timestamp,
        metadata map<text, text>,
        PRIMARY KEY (aggregate_id, sequence_number)
    ) WITH CLUSTERING ORDER BY (sequence_number ASC)",
    "CREATE TABLE IF NOT EXISTS outbox_messages (
        id uuid PRIMARY KEY, aggregate_id uuid, aggregate_type text, event_id uuid,
        event_type text, event_version int, payload text, topic text, partition_key text,
        correlation_id uuid, created_at timestamp, attempts int
    )",
    "CREATE TABLE IF NOT EXISTS aggregate_sequence (
        aggregate_id uuid PRIMARY KEY, current_sequence bigint, updated_at timestamp
    )",
];

pub struct ScyllaEventStore<E: DomainEvent> {
    session: Arc<Session>,
    aggregate_type_name: String,  // e.g., "SalesOrder"
    topic_name: String,           // e.g., "sales-order-events"
    _phantom: PhantomData<E>,
}

impl<E: DomainEvent> ScyllaEventStore<E> {
    pub fn new(session: Arc<Session>, aggregate_type_name: &str, topic_name: &str) -> Self {
        Self {
            session,
            aggregate_type_name: aggregate_type_name.to_string(),
            topic_name: topic_name.to_string(),
            _phantom: PhantomData,
        }
    }

    /// Create the tables this store writes to, if missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            self.session.query_unpaged(statement, &[]).await?;
        }
        Ok(())
    }

    async fn read_version(&self, aggregate_id: Uuid) -> anyhow::Result<i64> {
        let result = self.session
            .query_unpaged(
                "SELECT current_sequence FROM aggregate_sequence WHERE aggregate_id = ?",
                (aggregate_id,),
            )
            .await?;

        let version = result
            .into_rows_result()?
            .maybe_first_row::<(i64,)>()?
            .map_or(0, |(version,)| version);
        Ok(version)
    }

    async fn conflict(&self, aggregate_id: Uuid, expected_version: i64) -> StoreError {
        match self.read_version(aggregate_id).await {
            Ok(actual) => StoreError::VersionConflict { aggregate_id, expected: expected_version, actual },
            Err(e) => e.into(),
        }
    }
}

/// First column of an LWT response is `[applied]`.
fn lwt_applied(result: QueryResult) -> anyhow::Result<bool> {
    let rows_result = result.into_rows_result()?;
    let applied = match rows_result.maybe_first_row::<Row>()? {
        Some(row) => matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true)))),
        None => false,
    };
    Ok(applied)
}

#[async_trait]
impl<E: DomainEvent + 'static> EventStore<E> for ScyllaEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, StoreError> {
        if events.is_empty() {
            return Err(anyhow::anyhow!("Cannot append empty event list").into());
        }

        let current_version = self.read_version(aggregate_id).await?;
        if current_version != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut history = Batch::default();
        let mut history_values: Vec<Box<dyn SerializeRow + Send + Sync>> = vec![];
        let mut outbox = Batch::default();
        let mut outbox_values: Vec<Box<dyn SerializeRow + Send + Sync>> = vec![];
        let mut new_version = expected_version;
        let partition_key = aggregate_id.to_string();

        for envelope in &events {
            new_version += 1;
            let event_json = serialize_event(&envelope.event_data)?;

            history.append_statement(
                "INSERT INTO event_store (
                    aggregate_id, sequence_number, event_id, event_type, event_version,
                    event_data, correlation_id, timestamp, metadata
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"
            );
            history_values.push(Box::new((
                aggregate_id,
                new_version,
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.event_version,
                event_json.clone(),
                envelope.correlation_id,
                envelope.timestamp,
                envelope.metadata.clone(),
            )));

            outbox.append_statement(
                "INSERT INTO outbox_messages (
                    id, aggregate_id, aggregate_type, event_id, event_type, event_version,
                    payload, topic, partition_key, correlation_id, created_at, attempts
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)"
            );
            outbox_values.push(Box::new((
                Uuid::now_v7(),
                aggregate_id,
                self.aggregate_type_name.clone(),
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.event_version,
                event_json,
                self.topic_name.clone(),
                partition_key.clone(),
                envelope.correlation_id,
                Utc::now(),
            )));
        }

        let result = self.session
            .batch(&history, history_values)
            .await
            .map_err(anyhow::Error::from)?;

        if !lwt_applied(result)? {
            tracing::warn!(
                aggregate_id = %aggregate_id,
                expected_version = expected_version,
                "Sequence already taken by a concurrent writer"
            );
            return Err(self.conflict(aggregate_id, expected_version).await);
        }

        outbox.append_statement(
            "INSERT INTO aggregate_sequence (aggregate_id, current_sequence, updated_at) VALUES (?, ?, ?)"
        );
        outbox_values.push(Box::new((aggregate_id, new_version, Utc::now())));

        self.session
            .batch(&outbox, outbox_values)
            .await
            .map_err(anyhow::Error::from)?;

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %self.aggregate_type_name,
            new_version = new_version,
            event_count = events.len(),
            "Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, StoreError> {
        let result = self.session
            .query_unpaged(
                "SELECT aggregate_id, sequence_number, event_id, event_type, event_version,
                        event_data, correlation_id, timestamp, metadata
                 FROM event_store
                 WHERE aggregate_id = ?
                 ORDER BY sequence_number ASC",
                (aggregate_id,),
            )
            .await
            .map_err(anyhow::Error::from)?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events),
        };

        let rows = rows_result.rows::<EventRow>().map_err(anyhow::Error::from)?;
        for row in rows {
            let (agg_id, sequence_number, event_id, event_type, event_version, event_json, correlation_id, timestamp, metadata) =
                row.map_err(anyhow::Error::from)?;

            let event_data: E = deserialize_event(&event_json)?;

            events.push(EventEnvelope {
                event_id,
                aggregate_id: agg_id,
                sequence_number,
                event_type,
                event_version,
                event_data,
                correlation_id,
                timestamp,
                metadata: metadata.unwrap_or_default(),
            });
        }

        tracing::debug!(aggregate_id = %aggregate_id, count = events.len(), "Loaded events");
        Ok(events)
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.read_version(aggregate_id).await?)
    }
}
