// ============================================================================
// Order Domain - Sales-Order Fulfillment
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderItem, DeliveryMode, OrderCharges)
// - Money calculator and quantity ledger
// - State machine (OrderStatus, Transition, the transition table)
// - Events, commands and errors
// - Aggregate (OrderAggregate with business logic) and its snapshot
// - Orchestrator (FulfillmentOrchestrator), the only way orders change
//
// This is completely separate from the generic event sourcing infrastructure.
//
// ============================================================================

pub mod value_objects;
pub mod money;
pub mod ledger;
pub mod state_machine;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod snapshot;
pub mod guard;
pub mod orchestrator;

// Re-export for convenience
pub use value_objects::*;
pub use money::{compute_totals, line_total, round_money, OrderTotals};
pub use ledger::{Advance, LedgerEntry, QuantityLedger};
pub use state_machine::{ensure_allowed, next_status, OrderStatus, Transition, TransitionContext};
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use snapshot::OrderSnapshot;
pub use guard::{InFlight, OrderGuards};
pub use orchestrator::{Collaborators, FulfillmentOrchestrator, InvoiceReceipt, OrderSource};
