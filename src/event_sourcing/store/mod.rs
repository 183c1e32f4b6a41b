// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// `EventStore` is the seam; `InMemoryEventStore` backs tests and local runs,
// `ScyllaEventStore` backs deployments.
//
// ============================================================================

pub mod event_store;
pub mod in_memory;
pub mod scylla_store;

pub use event_store::{load_aggregate, EventStore, StoreError};
pub use in_memory::InMemoryEventStore;
pub use scylla_store::ScyllaEventStore;
