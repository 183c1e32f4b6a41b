use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::Collaborator;
use crate::domain::order::OrderError;
use crate::event_sourcing::StoreError;

// ============================================================================
// Boundary Errors - what callers of the orchestrator see
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Order {0} not found")]
    NotFound(Uuid),

    #[error("Order {order_id} is being changed by another request; reload and try again")]
    ConcurrentModification { order_id: Uuid },

    #[error("The {collaborator} {reason}")]
    CollaboratorFailure {
        collaborator: Collaborator,
        reason: String,
    },

    /// Backend details are logged where the failure happens, never shown here.
    #[error("Order storage is unavailable")]
    Storage(anyhow::Error),
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { aggregate_id, .. } => {
                FulfillmentError::ConcurrentModification { order_id: aggregate_id }
            }
            StoreError::Backend(source) => FulfillmentError::Storage(source),
        }
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    InvalidLine,
    InvalidDiscount,
    IllegalTransition,
    QuantityExceedsOrdered,
    QuantityRegression,
    AlreadyLinked,
    NotFound,
    ConcurrentModification,
    CollaboratorFailure,
    StorageUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvalidLine => "invalid_line",
            ErrorKind::InvalidDiscount => "invalid_discount",
            ErrorKind::IllegalTransition => "illegal_transition",
            ErrorKind::QuantityExceedsOrdered => "quantity_exceeds_ordered",
            ErrorKind::QuantityRegression => "quantity_regression",
            ErrorKind::AlreadyLinked => "already_linked",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConcurrentModification => "concurrent_modification",
            ErrorKind::CollaboratorFailure => "collaborator_failure",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation { .. } => ErrorKind::ValidationError,
            OrderError::InvalidLine { .. } => ErrorKind::InvalidLine,
            OrderError::InvalidDiscount { .. } => ErrorKind::InvalidDiscount,
            OrderError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            OrderError::QuantityExceedsOrdered { .. } => ErrorKind::QuantityExceedsOrdered,
            OrderError::QuantityRegression { .. } => ErrorKind::QuantityRegression,
            OrderError::AlreadyLinked { .. } => ErrorKind::AlreadyLinked,
            OrderError::NotInitialized => ErrorKind::Internal,
        }
    }
}

impl FulfillmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::Order(err) => err.kind(),
            FulfillmentError::NotFound(_) => ErrorKind::NotFound,
            FulfillmentError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            FulfillmentError::CollaboratorFailure { .. } => ErrorKind::CollaboratorFailure,
            FulfillmentError::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }

    pub(crate) fn collaborator(collaborator: Collaborator, reason: impl Into<String>) -> Self {
        FulfillmentError::CollaboratorFailure {
            collaborator,
            reason: reason.into(),
        }
    }
}

/// Serializable form of a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&FulfillmentError> for FailureReport {
    fn from(err: &FulfillmentError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
