use rust_decimal::Decimal;
use uuid::Uuid;

use super::state_machine::{OrderStatus, Transition};

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Invalid {field}: {constraint}")]
    Validation {
        field: &'static str,
        constraint: String,
    },

    #[error("Invalid line for item {item_id}: {reason}")]
    InvalidLine { item_id: Uuid, reason: String },

    #[error("Order discount {discount} exceeds subtotal {subtotal}")]
    InvalidDiscount { discount: Decimal, subtotal: Decimal },

    #[error("Cannot {transition} while the order is {status}")]
    IllegalTransition {
        transition: Transition,
        status: OrderStatus,
    },

    #[error("Separated quantity {requested} for item {item_id} exceeds ordered quantity {ordered}")]
    QuantityExceedsOrdered {
        item_id: Uuid,
        requested: Decimal,
        ordered: Decimal,
    },

    #[error("Separated quantity for item {item_id} cannot go back from {current} to {requested}")]
    QuantityRegression {
        item_id: Uuid,
        requested: Decimal,
        current: Decimal,
    },

    #[error("Order is already linked to financial sale {sale_id}")]
    AlreadyLinked { sale_id: Uuid },

    #[error("Aggregate not initialized")]
    NotInitialized,
}

impl OrderError {
    pub(crate) fn validation(field: &'static str, constraint: impl Into<String>) -> Self {
        Self::Validation {
            field,
            constraint: constraint.into(),
        }
    }
}
