use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::order::OrderSnapshot;
use super::{
    FinancialSaleCreator, FiscalDocumentGenerator, FiscalDocumentOutcome, IdempotencyKey,
    MovementKind, QuotationSnapshot, QuotationSource, StockMovementRecorder,
};

// ============================================================================
// In-Memory Collaborators
// ============================================================================
//
// Stand-ins for the real quotation, stock, sales and fiscal services. Each can
// be told to fail or to respond slowly so timeout and retry paths can be
// exercised.
//
// ============================================================================

/// Consume one unit of an injected-failure budget.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct InMemoryQuotations {
    quotations: RwLock<HashMap<Uuid, QuotationSnapshot>>,
}

impl InMemoryQuotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, quotation_id: Uuid, quotation: QuotationSnapshot) {
        self.quotations.write().await.insert(quotation_id, quotation);
    }
}

#[async_trait]
impl QuotationSource for InMemoryQuotations {
    async fn materialize(&self, quotation_id: Uuid) -> anyhow::Result<QuotationSnapshot> {
        match self.quotations.read().await.get(&quotation_id) {
            Some(quotation) => Ok(quotation.clone()),
            None => bail!("quotation {} not found", quotation_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockMovement {
    pub kind: MovementKind,
    pub order_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub key: IdempotencyKey,
}

/// Records every movement it accepts, once per kind, key and item.
#[derive(Default)]
pub struct RecordingStockRecorder {
    movements: Mutex<Vec<StockMovement>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingStockRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `delay` before recording it.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn movements(&self) -> Vec<StockMovement> {
        self.movements.lock().await.clone()
    }

    async fn record(&self, movement: StockMovement) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("stock ledger unavailable");
        }

        let mut movements = self.movements.lock().await;
        let repeated = movements
            .iter()
            .any(|m| m.kind == movement.kind && m.key == movement.key && m.item_id == movement.item_id);
        if repeated {
            tracing::debug!(key = %movement.key, item_id = %movement.item_id, "Stock movement already recorded");
        } else {
            movements.push(movement);
        }
        Ok(())
    }
}

#[async_trait]
impl StockMovementRecorder for RecordingStockRecorder {
    async fn reserve(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        quantity: Decimal,
        key: &IdempotencyKey,
    ) -> anyhow::Result<()> {
        let key = key.clone();
        self.record(StockMovement { kind: MovementKind::Reserve, order_id, item_id, quantity, key }).await
    }

    async fn release(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        quantity: Decimal,
        key: &IdempotencyKey,
    ) -> anyhow::Result<()> {
        let key = key.clone();
        self.record(StockMovement { kind: MovementKind::Release, order_id, item_id, quantity, key }).await
    }
}

/// Financial sales keyed by idempotency key.
#[derive(Default)]
pub struct InMemorySales {
    sales: Mutex<HashMap<IdempotencyKey, Uuid>>,
    created: AtomicUsize,
    failures: AtomicUsize,
    delay: Option<Duration>,
}

impl InMemorySales {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of distinct sales ever created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FinancialSaleCreator for InMemorySales {
    async fn create_sale(&self, order: &OrderSnapshot, key: &IdempotencyKey) -> anyhow::Result<Uuid> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.failures) {
            bail!("sale ledger rejected {}", key);
        }

        let mut sales = self.sales.lock().await;
        let sale_id = *sales.entry(key.clone()).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::SeqCst);
            Uuid::now_v7()
        });

        tracing::debug!(order_id = %order.id, sale_id = %sale_id, total = %order.total, "Financial sale recorded");
        Ok(sale_id)
    }
}

#[derive(Default)]
pub struct InMemoryFiscalDocuments {
    documents: Mutex<HashMap<IdempotencyKey, Uuid>>,
    failures: AtomicUsize,
    skip: AtomicBool,
}

impl InMemoryFiscalDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Answer `Skipped` instead of issuing documents.
    pub fn set_skipping(&self, skip: bool) {
        self.skip.store(skip, Ordering::SeqCst);
    }

    pub async fn issued_count(&self) -> usize {
        self.documents.lock().await.len()
    }
}

#[async_trait]
impl FiscalDocumentGenerator for InMemoryFiscalDocuments {
    async fn generate(
        &self,
        order: &OrderSnapshot,
        sale_id: Uuid,
        key: &IdempotencyKey,
    ) -> anyhow::Result<FiscalDocumentOutcome> {
        if take_failure(&self.failures) {
            bail!("fiscal authority rejected document for sale {}", sale_id);
        }
        if self.skip.load(Ordering::SeqCst) {
            return Ok(FiscalDocumentOutcome::Skipped);
        }

        let mut documents = self.documents.lock().await;
        let document_id = *documents.entry(key.clone()).or_insert_with(Uuid::now_v7);

        tracing::debug!(order_id = %order.id, sale_id = %sale_id, document_id = %document_id, "Fiscal document issued");
        Ok(FiscalDocumentOutcome::Generated(document_id))
    }
}
