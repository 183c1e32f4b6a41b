use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::DeliveryMode;

// ============================================================================
// Fulfillment State Machine
// ============================================================================
//
//   Draft ─confirm─▶ Confirmed ─start_separation─▶ Separating ─┐
//                                                    ▲          │ record_separation
//                                                    └──────────┤ (partial)
//                                                               ▼ (complete)
//   Invoiced ◀─invoice── Delivered ◀─confirm_delivery─ Delivering ◀─dispatch─ Separated
//       ▲                                                                      │
//       └──────────────────── invoice (pickup only) ───────────────────────────┘
//
//   cancel: every status except Invoiced and Cancelled ─▶ Cancelled
//
// `next_status` is the single transition table. Nothing else in the crate
// decides whether a status change is legal.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Separating,
    Separated,
    Delivering,
    Delivered,
    Invoiced,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Draft,
        OrderStatus::Confirmed,
        OrderStatus::Separating,
        OrderStatus::Separated,
        OrderStatus::Delivering,
        OrderStatus::Delivered,
        OrderStatus::Invoiced,
        OrderStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invoiced | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Separating => "separating",
            OrderStatus::Separated => "separated",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every status change a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    UpdateDraft,
    Confirm,
    StartSeparation,
    RecordSeparation,
    Dispatch,
    ConfirmDelivery,
    Invoice,
    Cancel,
}

impl Transition {
    pub const ALL: [Transition; 8] = [
        Transition::UpdateDraft,
        Transition::Confirm,
        Transition::StartSeparation,
        Transition::RecordSeparation,
        Transition::Dispatch,
        Transition::ConfirmDelivery,
        Transition::Invoice,
        Transition::Cancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::UpdateDraft => "update_draft",
            Transition::Confirm => "confirm",
            Transition::StartSeparation => "start_separation",
            Transition::RecordSeparation => "record_separation",
            Transition::Dispatch => "dispatch",
            Transition::ConfirmDelivery => "confirm_delivery",
            Transition::Invoice => "invoice",
            Transition::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the order that some rows of the table depend on.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub delivery_mode: DeliveryMode,
    /// Whether the ledger is fully separated after the requested separation
    pub fully_separated: bool,
}

/// Resolve the status an order moves to, or reject the transition.
pub fn next_status(
    status: OrderStatus,
    transition: Transition,
    ctx: TransitionContext,
) -> Result<OrderStatus, OrderError> {
    use OrderStatus::*;
    use Transition::*;

    match (status, transition) {
        (Draft, UpdateDraft) => Ok(Draft),
        (Draft, Confirm) => Ok(Confirmed),
        (Confirmed, StartSeparation) => Ok(Separating),
        (Separating, RecordSeparation) if ctx.fully_separated => Ok(Separated),
        (Separating, RecordSeparation) => Ok(Separating),
        (Separated, Dispatch) => Ok(Delivering),
        (Delivering, ConfirmDelivery) => Ok(Delivered),
        (Delivered, Invoice) => Ok(Invoiced),
        (Separated, Invoice) if ctx.delivery_mode == DeliveryMode::Pickup => Ok(Invoiced),
        (Invoiced | Cancelled, Cancel) => Err(illegal(transition, status)),
        (_, Cancel) => Ok(Cancelled),
        _ => Err(illegal(transition, status)),
    }
}

/// Same table, without caring about the destination.
pub fn ensure_allowed(
    status: OrderStatus,
    transition: Transition,
    ctx: TransitionContext,
) -> Result<(), OrderError> {
    next_status(status, transition, ctx).map(|_| ())
}

fn illegal(transition: Transition, status: OrderStatus) -> OrderError {
    OrderError::IllegalTransition { transition, status }
}
