// ============================================================================
// External Collaborators - interfaces the fulfillment engine calls into
// ============================================================================
//
// None of these are implemented by the engine. `in_memory` provides
// implementations for local runs and tests.
//
// ============================================================================

pub mod in_memory;

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{ItemInput, OrderSnapshot, Transition};

pub use in_memory::{
    InMemoryFiscalDocuments, InMemoryQuotations, InMemorySales, RecordingStockRecorder, StockMovement,
};

/// Key sent with every side-effecting collaborator call of a transition, so a
/// retried transition cannot create a second record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_transition(order_id: Uuid, transition: Transition) -> Self {
        Self(format!("{}:{}", order_id, transition))
    }

    /// Key for one attempt of a transition that may legitimately run again
    /// after a failed commit. `attempt` is the correlation id of its events.
    pub fn for_attempt(order_id: Uuid, transition: Transition, attempt: Uuid) -> Self {
        Self(format!("{}:{}:{}", order_id, transition, attempt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a quotation contributes to a new draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationSnapshot {
    pub customer_id: Uuid,
    pub items: Vec<ItemInput>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiscalDocumentOutcome {
    Generated(Uuid),
    /// The generator decided no document is due (e.g. customer exempt)
    Skipped,
}

#[async_trait]
pub trait QuotationSource: Send + Sync {
    async fn materialize(&self, quotation_id: Uuid) -> anyhow::Result<QuotationSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Goods set aside for an order
    Reserve,
    /// Goods handed back to free stock
    Release,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Reserve => "stock_reserve",
            MovementKind::Release => "stock_release",
        }
    }
}

/// A movement repeated with the same key and item must be recorded once.
#[async_trait]
pub trait StockMovementRecorder: Send + Sync {
    async fn reserve(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        quantity: Decimal,
        key: &IdempotencyKey,
    ) -> anyhow::Result<()>;

    async fn release(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        quantity: Decimal,
        key: &IdempotencyKey,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait FinancialSaleCreator: Send + Sync {
    /// Must return the same sale id for the same key.
    async fn create_sale(&self, order: &OrderSnapshot, key: &IdempotencyKey) -> anyhow::Result<Uuid>;
}

#[async_trait]
pub trait FiscalDocumentGenerator: Send + Sync {
    async fn generate(
        &self,
        order: &OrderSnapshot,
        sale_id: Uuid,
        key: &IdempotencyKey,
    ) -> anyhow::Result<FiscalDocumentOutcome>;
}

/// Names collaborators in errors, logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Quotation,
    StockMovement,
    FinancialSale,
    FiscalDocument,
}

impl Collaborator {
    pub fn as_str(self) -> &'static str {
        match self {
            Collaborator::Quotation => "quotation",
            Collaborator::StockMovement => "stock_movement",
            Collaborator::FinancialSale => "financial_sale",
            Collaborator::FiscalDocument => "fiscal_document",
        }
    }

    /// Wording used in caller-facing messages.
    pub fn describe(self) -> &'static str {
        match self {
            Collaborator::Quotation => "quotation service",
            Collaborator::StockMovement => "stock movement service",
            Collaborator::FinancialSale => "financial sale service",
            Collaborator::FiscalDocument => "fiscal document service",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_stable_per_order_and_transition() {
        let order_id = Uuid::new_v4();
        let a = IdempotencyKey::for_transition(order_id, Transition::Invoice);
        let b = IdempotencyKey::for_transition(order_id, Transition::Invoice);

        assert_eq!(a, b);
        assert_eq!(a.as_str(), format!("{}:invoice", order_id));
        assert_ne!(a, IdempotencyKey::for_transition(Uuid::new_v4(), Transition::Invoice));
    }

    #[test]
    fn test_attempt_keys_differ_per_attempt() {
        let order_id = Uuid::new_v4();
        let attempt = Uuid::now_v7();
        let key = IdempotencyKey::for_attempt(order_id, Transition::RecordSeparation, attempt);

        assert_eq!(key.as_str(), format!("{}:record_separation:{}", order_id, attempt));
        assert_ne!(
            key,
            IdempotencyKey::for_attempt(order_id, Transition::RecordSeparation, Uuid::now_v7())
        );
    }
}
