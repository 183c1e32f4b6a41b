// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The sales order is the only aggregate. Its subdirectory holds the value
// objects, events, commands, errors, the aggregate itself and the
// orchestrator that drives it.
//
// This layer is completely separate from the event sourcing infrastructure.
//
// ============================================================================

pub mod order;
