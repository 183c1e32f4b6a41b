//! Sales-order fulfillment engine.
//!
//! Owns the lifecycle of a sales order from draft to invoice (or
//! cancellation): separated quantities, monetary totals and the links to the
//! financial sale and fiscal document it spawns. Every change goes through
//! [`FulfillmentOrchestrator`] and is recorded as events.

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_sourcing;
pub mod metrics;
pub mod utils;

pub use config::FulfillmentConfig;
pub use domain::order::{FulfillmentOrchestrator, InvoiceReceipt, OrderSnapshot, OrderSource};
pub use error::{ErrorKind, FailureReport, FulfillmentError};
