use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::value_objects::{DraftChanges, NewOrder, SeparationEntry};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CreateOrder {
        order_id: Uuid,
        quotation_id: Option<Uuid>,
        order: NewOrder,
    },
    UpdateDraft {
        changes: DraftChanges,
    },
    ConfirmOrder,
    StartSeparation,
    RecordSeparation {
        entries: Vec<SeparationEntry>,
    },
    Dispatch,
    ConfirmDelivery {
        delivered_at: DateTime<Utc>,
    },
    /// Issued only after the financial sale (and fiscal document, if any) exist.
    Invoice {
        sale_id: Uuid,
        fiscal_document_id: Option<Uuid>,
    },
    CancelOrder {
        reason: String,
        min_reason_len: usize,
    },
}
