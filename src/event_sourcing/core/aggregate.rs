use uuid::Uuid;
use anyhow::Result;
use super::event::EventEnvelope;

// ============================================================================
// Aggregate Root
// ============================================================================
//
// An aggregate decides (`handle_*`) without mutating and evolves (`apply_*`)
// without deciding. The version is the sequence number of the last event
// applied, which the store checks on append.
//
// ============================================================================

pub trait Aggregate: Sized + Send + Sync {
    type Event;
    type Command;
    type Error;

    fn apply_first_event(event: &Self::Event) -> Result<Self, Self::Error>;

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Handle a command that brings a new aggregate into existence
    fn handle_initial(command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Validate `command` against current state; an empty vec means nothing to record.
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn aggregate_id(&self) -> Uuid;

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Replay a stored history, oldest first.
    fn load_from_events(events: Vec<EventEnvelope<Self::Event>>) -> Result<Self>
    where
        Self::Error: std::fmt::Display,
    {
        let Some((first, rest)) = events.split_first() else {
            anyhow::bail!("No events to load");
        };

        let mut aggregate = Self::apply_first_event(&first.event_data)
            .map_err(|e| anyhow::anyhow!("Failed to apply first event: {}", e))?;
        aggregate.set_version(first.sequence_number);

        for envelope in rest {
            aggregate.apply_event(&envelope.event_data)
                .map_err(|e| anyhow::anyhow!("Failed to apply event: {}", e))?;
            aggregate.set_version(envelope.sequence_number);
        }

        Ok(aggregate)
    }
}
