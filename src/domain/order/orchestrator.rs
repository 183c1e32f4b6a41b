use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::{
    Collaborator, FinancialSaleCreator, FiscalDocumentGenerator, FiscalDocumentOutcome,
    IdempotencyKey, MovementKind, QuotationSource, StockMovementRecorder,
};
use crate::config::FulfillmentConfig;
use crate::error::FulfillmentError;
use crate::event_sourcing::core::{Aggregate, EventEnvelope};
use crate::event_sourcing::store::{load_aggregate, EventStore, StoreError};
use crate::metrics::{Metrics, Outcome};
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerError};

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::events::OrderEvent;
use super::guard::{InFlight, OrderGuards};
use super::snapshot::OrderSnapshot;
use super::state_machine::{OrderStatus, Transition};
use super::value_objects::{
    CommercialTerms, DeliveryAddress, DeliveryMode, DraftChanges, NewOrder, OrderCharges,
    SeparationEntry,
};

// ============================================================================
// Fulfillment Orchestrator
// ============================================================================
//
// One operation per transition:
//   guard → load → validate (aggregate) → collaborators → commit → snapshot
//
// Nothing is written unless every step before the commit succeeded, so a
// failed transition leaves the order exactly as it was. Stock reserved ahead
// of a commit that then fails is released again under the same key.
//
// ============================================================================

/// External services the orchestrator calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub quotations: Arc<dyn QuotationSource>,
    pub stock: Arc<dyn StockMovementRecorder>,
    pub sales: Arc<dyn FinancialSaleCreator>,
    pub fiscal: Arc<dyn FiscalDocumentGenerator>,
}

/// Where a new draft comes from.
#[derive(Debug, Clone)]
pub enum OrderSource {
    Blank(NewOrder),
    /// Customer, items and notes are taken from the materialized quotation.
    Quotation {
        quotation_id: Uuid,
        salesperson_id: Uuid,
        order_date: NaiveDate,
        expected_delivery_date: Option<NaiveDate>,
        delivery_mode: DeliveryMode,
        delivery_address: Option<DeliveryAddress>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceReceipt {
    pub order: OrderSnapshot,
    pub sale_id: Uuid,
    pub document_id: Option<Uuid>,
}

enum CallFailure {
    TimedOut(Duration),
    Failed(anyhow::Error),
}

pub struct FulfillmentOrchestrator {
    store: Arc<dyn EventStore<OrderEvent>>,
    collaborators: Collaborators,
    config: FulfillmentConfig,
    guards: OrderGuards,
    sale_breaker: CircuitBreaker,
    fiscal_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl FulfillmentOrchestrator {
    pub fn new(
        store: Arc<dyn EventStore<OrderEvent>>,
        collaborators: Collaborators,
        config: FulfillmentConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let sale_breaker = CircuitBreaker::new(Collaborator::FinancialSale.as_str(), config.breaker.clone());
        let fiscal_breaker = CircuitBreaker::new(Collaborator::FiscalDocument.as_str(), config.breaker.clone());

        Self {
            store,
            collaborators,
            config,
            guards: OrderGuards::new(),
            sale_breaker,
            fiscal_breaker,
            metrics,
        }
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    pub async fn create_order(&self, source: OrderSource) -> Result<OrderSnapshot, FulfillmentError> {
        let order_id = Uuid::now_v7();
        self.observed("create_order", order_id, self.create_order_inner(order_id, source))
            .await
    }

    pub async fn update_draft(
        &self,
        order_id: Uuid,
        changes: DraftChanges,
    ) -> Result<OrderSnapshot, FulfillmentError> {
        self.simple_transition(order_id, Transition::UpdateDraft, OrderCommand::UpdateDraft { changes })
            .await
    }

    pub async fn confirm(&self, order_id: Uuid) -> Result<OrderSnapshot, FulfillmentError> {
        self.simple_transition(order_id, Transition::Confirm, OrderCommand::ConfirmOrder)
            .await
    }

    pub async fn start_separation(&self, order_id: Uuid) -> Result<OrderSnapshot, FulfillmentError> {
        self.simple_transition(order_id, Transition::StartSeparation, OrderCommand::StartSeparation)
            .await
    }

    /// Advance separated quantities. Resubmitting already recorded quantities
    /// is a no-op that still returns the current snapshot.
    pub async fn record_separation(
        &self,
        order_id: Uuid,
        entries: Vec<SeparationEntry>,
    ) -> Result<OrderSnapshot, FulfillmentError> {
        self.observed(
            Transition::RecordSeparation.as_str(),
            order_id,
            self.record_separation_inner(order_id, entries),
        )
        .await
    }

    pub async fn dispatch(&self, order_id: Uuid) -> Result<OrderSnapshot, FulfillmentError> {
        self.simple_transition(order_id, Transition::Dispatch, OrderCommand::Dispatch)
            .await
    }

    pub async fn confirm_delivery(&self, order_id: Uuid) -> Result<OrderSnapshot, FulfillmentError> {
        let command = OrderCommand::ConfirmDelivery { delivered_at: Utc::now() };
        self.simple_transition(order_id, Transition::ConfirmDelivery, command)
            .await
    }

    /// Create the financial sale (and optionally the fiscal document), then
    /// link them to the order. A collaborator failure leaves the order untouched.
    pub async fn invoice(
        &self,
        order_id: Uuid,
        generate_fiscal_document: bool,
    ) -> Result<InvoiceReceipt, FulfillmentError> {
        self.observed(
            Transition::Invoice.as_str(),
            order_id,
            self.invoice_inner(order_id, generate_fiscal_document),
        )
        .await
    }

    pub async fn cancel(&self, order_id: Uuid, reason: &str) -> Result<OrderSnapshot, FulfillmentError> {
        self.observed(Transition::Cancel.as_str(), order_id, self.cancel_inner(order_id, reason))
            .await
    }

    // ------------------------------------------------------------------------
    // Read side (never takes the guard)
    // ------------------------------------------------------------------------

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderSnapshot, FulfillmentError> {
        let order = self.load(order_id).await?;
        Ok(OrderSnapshot::try_from(&order)?)
    }

    pub async fn history(&self, order_id: Uuid) -> Result<Vec<EventEnvelope<OrderEvent>>, FulfillmentError> {
        let events = self
            .store
            .load_events(order_id)
            .await
            .map_err(|e| self.store_failure(order_id, e))?;

        if events.is_empty() {
            return Err(FulfillmentError::NotFound(order_id));
        }
        Ok(events)
    }

    // ------------------------------------------------------------------------
    // Transition bodies
    // ------------------------------------------------------------------------

    async fn create_order_inner(
        &self,
        order_id: Uuid,
        source: OrderSource,
    ) -> Result<(OrderSnapshot, Outcome), FulfillmentError> {
        let (quotation_id, order) = match source {
            OrderSource::Blank(order) => (None, order),
            OrderSource::Quotation {
                quotation_id,
                salesperson_id,
                order_date,
                expected_delivery_date,
                delivery_mode,
                delivery_address,
            } => {
                let quotation = self
                    .call_collaborator(
                        Collaborator::Quotation,
                        None,
                        self.collaborators.quotations.materialize(quotation_id),
                    )
                    .await?;

                tracing::debug!(
                    order_id = %order_id,
                    quotation_id = %quotation_id,
                    items = quotation.items.len(),
                    "Quotation materialized"
                );

                let order = NewOrder {
                    customer_id: quotation.customer_id,
                    salesperson_id,
                    order_date,
                    expected_delivery_date,
                    delivery_mode,
                    delivery_address,
                    items: quotation.items,
                    charges: OrderCharges::default(),
                    terms: CommercialTerms {
                        notes: quotation.notes,
                        ..CommercialTerms::default()
                    },
                };
                (Some(quotation_id), order)
            }
        };

        let command = OrderCommand::CreateOrder { order_id, quotation_id, order };
        let events = OrderAggregate::handle_initial(&command)?;

        let Some((first, rest)) = events.split_first() else {
            return Err(FulfillmentError::Order(super::errors::OrderError::NotInitialized));
        };
        let mut aggregate = OrderAggregate::apply_first_event(first)?;
        for event in rest {
            aggregate.apply_event(event)?;
        }

        let version = self.append(order_id, 0, "create_order", &events, Uuid::now_v7()).await?;
        aggregate.set_version(version);

        Ok((OrderSnapshot::try_from(&aggregate)?, Outcome::Committed))
    }

    async fn simple_transition(
        &self,
        order_id: Uuid,
        transition: Transition,
        command: OrderCommand,
    ) -> Result<OrderSnapshot, FulfillmentError> {
        let work = async {
            let _in_flight = self.acquire(order_id)?;
            let mut order = self.load(order_id).await?;

            let events = order.handle_command(&command)?;
            self.commit(&mut order, transition, events).await?;

            Ok::<_, FulfillmentError>((OrderSnapshot::try_from(&order)?, Outcome::Committed))
        };

        self.observed(transition.as_str(), order_id, work).await
    }

    async fn record_separation_inner(
        &self,
        order_id: Uuid,
        entries: Vec<SeparationEntry>,
    ) -> Result<(OrderSnapshot, Outcome), FulfillmentError> {
        let _in_flight = self.acquire(order_id)?;
        let mut order = self.load(order_id).await?;

        let events = order.handle_command(&OrderCommand::RecordSeparation { entries })?;

        let reservations: Vec<(Uuid, Decimal)> = events
            .iter()
            .filter_map(|event| match event {
                OrderEvent::SeparationRecorded(recorded) => Some(&recorded.entries),
                _ => None,
            })
            .flatten()
            .filter_map(|entry| {
                let current = order
                    .items
                    .iter()
                    .find(|item| item.item_id == entry.item_id)
                    .map_or(Decimal::ZERO, |item| item.separated_quantity);
                let delta = entry.separated_quantity - current;
                (delta > Decimal::ZERO).then_some((entry.item_id, delta))
            })
            .collect();

        if events.is_empty() {
            tracing::debug!(order_id = %order_id, "Separation report changed nothing");
            return Ok((OrderSnapshot::try_from(&order)?, Outcome::Unchanged));
        }

        let attempt = Uuid::now_v7();
        let key = IdempotencyKey::for_attempt(order_id, Transition::RecordSeparation, attempt);
        let mut reserved = Vec::with_capacity(reservations.len());

        for (item_id, delta) in reservations {
            match self.notify_stock(MovementKind::Reserve, &key, order_id, item_id, delta).await {
                Ok(()) => reserved.push((item_id, delta)),
                Err(err) if self.config.block_on_stock_failure => {
                    self.undo_reservations(&key, order_id, reserved).await;
                    return Err(err);
                }
                Err(_) => {}
            }
        }

        if let Err(err) = self
            .commit_correlated(&mut order, Transition::RecordSeparation, events, attempt)
            .await
        {
            self.undo_reservations(&key, order_id, reserved).await;
            return Err(err);
        }

        Ok((OrderSnapshot::try_from(&order)?, Outcome::Committed))
    }

    async fn invoice_inner(
        &self,
        order_id: Uuid,
        generate_fiscal_document: bool,
    ) -> Result<(InvoiceReceipt, Outcome), FulfillmentError> {
        let _in_flight = self.acquire(order_id)?;
        let mut order = self.load(order_id).await?;

        order.ensure_invoiceable()?;
        let snapshot = OrderSnapshot::try_from(&order)?;
        let key = IdempotencyKey::for_transition(order_id, Transition::Invoice);

        let sale_id = self
            .call_collaborator(
                Collaborator::FinancialSale,
                Some(&self.sale_breaker),
                self.collaborators.sales.create_sale(&snapshot, &key),
            )
            .await?;

        let document_id = if generate_fiscal_document {
            let outcome = self
                .call_collaborator(
                    Collaborator::FiscalDocument,
                    Some(&self.fiscal_breaker),
                    self.collaborators.fiscal.generate(&snapshot, sale_id, &key),
                )
                .await?;

            match outcome {
                FiscalDocumentOutcome::Generated(document_id) => Some(document_id),
                FiscalDocumentOutcome::Skipped => {
                    tracing::info!(order_id = %order_id, sale_id = %sale_id, "No fiscal document due for this sale");
                    None
                }
            }
        } else {
            None
        };

        let events = order.handle_command(&OrderCommand::Invoice {
            sale_id,
            fiscal_document_id: document_id,
        })?;
        self.commit(&mut order, Transition::Invoice, events).await?;

        let receipt = InvoiceReceipt {
            order: OrderSnapshot::try_from(&order)?,
            sale_id,
            document_id,
        };
        Ok((receipt, Outcome::Committed))
    }

    async fn cancel_inner(&self, order_id: Uuid, reason: &str) -> Result<(OrderSnapshot, Outcome), FulfillmentError> {
        let in_flight = self.acquire(order_id)?;
        let mut order = self.load(order_id).await?;

        let events = order.handle_command(&OrderCommand::CancelOrder {
            reason: reason.to_string(),
            min_reason_len: self.config.min_cancel_reason_len,
        })?;

        // Goods still in the warehouse go back to free stock. Once dispatched
        // they are no longer ours to release.
        let releases: Vec<(Uuid, Decimal)> = match order.status {
            OrderStatus::Separating | OrderStatus::Separated => order
                .items
                .iter()
                .filter(|item| item.separated_quantity > Decimal::ZERO)
                .map(|item| (item.item_id, item.separated_quantity))
                .collect(),
            _ => Vec::new(),
        };

        self.commit(&mut order, Transition::Cancel, events).await?;
        drop(in_flight);

        let key = IdempotencyKey::for_transition(order_id, Transition::Cancel);
        let notifications = releases
            .into_iter()
            .map(|(item_id, quantity)| self.notify_stock(MovementKind::Release, &key, order_id, item_id, quantity));
        let failed = join_all(notifications).await.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::warn!(order_id = %order_id, failed = failed, "Order cancelled but some stock releases were not recorded");
        }

        Ok((OrderSnapshot::try_from(&order)?, Outcome::Committed))
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    fn acquire(&self, order_id: Uuid) -> Result<InFlight, FulfillmentError> {
        self.guards
            .try_acquire(order_id)
            .ok_or(FulfillmentError::ConcurrentModification { order_id })
    }

    async fn load(&self, order_id: Uuid) -> Result<OrderAggregate, FulfillmentError> {
        load_aggregate::<OrderAggregate, _>(self.store.as_ref(), order_id)
            .await
            .map_err(|e| self.store_failure(order_id, e))?
            .ok_or(FulfillmentError::NotFound(order_id))
    }

    async fn commit(
        &self,
        order: &mut OrderAggregate,
        transition: Transition,
        events: Vec<OrderEvent>,
    ) -> Result<(), FulfillmentError> {
        self.commit_correlated(order, transition, events, Uuid::now_v7()).await
    }

    /// Persist `events` against the version `order` was loaded at, then apply
    /// them locally so the caller sees the committed state.
    async fn commit_correlated(
        &self,
        order: &mut OrderAggregate,
        transition: Transition,
        events: Vec<OrderEvent>,
        correlation_id: Uuid,
    ) -> Result<(), FulfillmentError> {
        if events.is_empty() {
            return Ok(());
        }

        let version = self
            .append(order.id, order.version, transition.as_str(), &events, correlation_id)
            .await?;

        for event in &events {
            order.apply_event(event)?;
        }
        order.set_version(version);

        Ok(())
    }

    async fn append(
        &self,
        order_id: Uuid,
        expected_version: i64,
        transition: &str,
        events: &[OrderEvent],
        correlation_id: Uuid,
    ) -> Result<i64, FulfillmentError> {
        let envelopes = events
            .iter()
            .cloned()
            .zip(expected_version + 1..)
            .map(|(event, sequence)| {
                EventEnvelope::new(order_id, sequence, event, correlation_id)
                    .with_metadata("transition", transition)
            })
            .collect();

        self.store
            .append_events(order_id, expected_version, envelopes)
            .await
            .map_err(|e| self.store_failure(order_id, e))
    }

    fn store_failure(&self, order_id: Uuid, err: StoreError) -> FulfillmentError {
        match &err {
            StoreError::VersionConflict { expected, actual, .. } => {
                tracing::warn!(order_id = %order_id, expected = expected, actual = actual, "Stale order version on append");
            }
            StoreError::Backend(source) => {
                tracing::error!(order_id = %order_id, error = %format!("{:#}", source), "Event store failure");
            }
        }
        err.into()
    }

    /// Run one collaborator call under the configured timeout, and behind
    /// `breaker` when one is given.
    async fn call_collaborator<T, Fut>(
        &self,
        collaborator: Collaborator,
        breaker: Option<&CircuitBreaker>,
        call: Fut,
    ) -> Result<T, FulfillmentError>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.config.collaborator_timeout;
        let timed = async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CallFailure::Failed(e)),
                Err(_) => Err(CallFailure::TimedOut(timeout)),
            }
        };

        let result = match breaker {
            Some(breaker) => {
                let result = breaker.call(timed).await;
                self.metrics
                    .update_circuit_breaker_state(collaborator, breaker.get_state().await);
                result
            }
            None => timed.await.map_err(CircuitBreakerError::OperationFailed),
        };

        result.map_err(|err| {
            self.metrics.record_collaborator_failure(collaborator);
            match err {
                CircuitBreakerError::CircuitOpen => {
                    tracing::warn!(collaborator = collaborator.as_str(), "Circuit open, call not attempted");
                    FulfillmentError::collaborator(collaborator, "is temporarily unavailable; try again later")
                }
                CircuitBreakerError::OperationFailed(CallFailure::TimedOut(after)) => {
                    tracing::error!(collaborator = collaborator.as_str(), timeout_ms = after.as_millis() as u64, "Collaborator call timed out");
                    FulfillmentError::collaborator(
                        collaborator,
                        format!("did not answer within {} ms", after.as_millis()),
                    )
                }
                CircuitBreakerError::OperationFailed(CallFailure::Failed(e)) => {
                    tracing::error!(collaborator = collaborator.as_str(), error = %format!("{:#}", e), "Collaborator call failed");
                    FulfillmentError::collaborator(collaborator, "could not complete the request")
                }
            }
        })
    }

    /// Record a stock movement with retries. Failures are logged and counted;
    /// the caller decides whether they matter.
    async fn notify_stock(
        &self,
        kind: MovementKind,
        key: &IdempotencyKey,
        order_id: Uuid,
        item_id: Uuid,
        quantity: Decimal,
    ) -> Result<(), FulfillmentError> {
        let operation = kind.as_str();
        let timeout = self.config.collaborator_timeout;
        let stock = self.collaborators.stock.as_ref();

        let result = retry_with_backoff(operation, &self.config.stock_retry, |attempt| {
            self.metrics.record_retry_attempt(operation, attempt);
            async move {
                let call = match kind {
                    MovementKind::Reserve => stock.reserve(order_id, item_id, quantity, key),
                    MovementKind::Release => stock.release(order_id, item_id, quantity, key),
                };
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("no answer within {} ms", timeout.as_millis())),
                }
            }
        })
        .await;

        result.map_err(|e| {
            self.metrics.record_collaborator_failure(Collaborator::StockMovement);
            self.metrics.record_stock_notification_failure();
            tracing::warn!(
                order_id = %order_id,
                item_id = %item_id,
                quantity = %quantity,
                movement = operation,
                error = %format!("{:#}", e),
                "Stock movement not recorded"
            );
            FulfillmentError::collaborator(Collaborator::StockMovement, "could not record the stock movement")
        })
    }

    /// Hand back what an attempt reserved before it failed.
    async fn undo_reservations(&self, key: &IdempotencyKey, order_id: Uuid, reserved: Vec<(Uuid, Decimal)>) {
        if reserved.is_empty() {
            return;
        }

        let releases = reserved
            .into_iter()
            .map(|(item_id, quantity)| self.notify_stock(MovementKind::Release, key, order_id, item_id, quantity));
        let failed = join_all(releases).await.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::error!(order_id = %order_id, key = %key, failed = failed, "Reservations of a failed separation are still held");
        }
    }

    /// Time a transition and record its outcome.
    async fn observed<T, Fut>(&self, operation: &'static str, order_id: Uuid, work: Fut) -> Result<T, FulfillmentError>
    where
        Fut: Future<Output = Result<(T, Outcome), FulfillmentError>>,
    {
        let started = Instant::now();
        let result = work.await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok((value, outcome)) => {
                self.metrics.record_transition(operation, outcome, elapsed);
                tracing::info!(order_id = %order_id, operation = operation, outcome = outcome.as_str(), "Transition completed");
                Ok(value)
            }
            Err(err) => {
                let outcome = match &err {
                    FulfillmentError::CollaboratorFailure { .. } | FulfillmentError::Storage(_) => Outcome::Failed,
                    FulfillmentError::ConcurrentModification { .. } => {
                        self.metrics.record_conflict();
                        Outcome::Rejected
                    }
                    FulfillmentError::Order(_) | FulfillmentError::NotFound(_) => Outcome::Rejected,
                };
                self.metrics.record_transition(operation, outcome, elapsed);

                if outcome == Outcome::Failed {
                    tracing::error!(order_id = %order_id, operation = operation, kind = err.kind().as_str(), error = %err, "Transition failed");
                } else {
                    tracing::warn!(order_id = %order_id, operation = operation, kind = err.kind().as_str(), error = %err, "Transition rejected");
                }
                Err(err)
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        InMemoryFiscalDocuments, InMemoryQuotations, InMemorySales, QuotationSnapshot,
        RecordingStockRecorder,
    };
    use crate::error::ErrorKind;
    use crate::event_sourcing::store::InMemoryEventStore;
    use crate::utils::{CircuitBreakerConfig, RetryConfig};
    use super::super::errors::OrderError;
    use super::super::value_objects::ItemInput;
    use rust_decimal_macros::dec;

    struct Harness {
        orchestrator: FulfillmentOrchestrator,
        quotations: Arc<InMemoryQuotations>,
        stock: Arc<RecordingStockRecorder>,
        sales: Arc<InMemorySales>,
        fiscal: Arc<InMemoryFiscalDocuments>,
        metrics: Arc<Metrics>,
    }

    fn test_config() -> FulfillmentConfig {
        FulfillmentConfig {
            collaborator_timeout: Duration::from_millis(200),
            stock_retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                open_for: Duration::from_secs(60),
                success_threshold: 1,
            },
            ..FulfillmentConfig::default()
        }
    }

    fn harness_with(config: FulfillmentConfig, stock: RecordingStockRecorder, sales: InMemorySales) -> Harness {
        harness_on(Arc::new(InMemoryEventStore::<OrderEvent>::new()), config, stock, sales)
    }

    fn harness_on(
        store: Arc<dyn EventStore<OrderEvent>>,
        config: FulfillmentConfig,
        stock: RecordingStockRecorder,
        sales: InMemorySales,
    ) -> Harness {
        let quotations = Arc::new(InMemoryQuotations::new());
        let stock = Arc::new(stock);
        let sales = Arc::new(sales);
        let fiscal = Arc::new(InMemoryFiscalDocuments::new());
        let metrics = Arc::new(Metrics::new().unwrap());

        let orchestrator = FulfillmentOrchestrator::new(
            store,
            Collaborators {
                quotations: quotations.clone(),
                stock: stock.clone(),
                sales: sales.clone(),
                fiscal: fiscal.clone(),
            },
            config,
            metrics.clone(),
        );

        Harness { orchestrator, quotations, stock, sales, fiscal, metrics }
    }

    fn harness() -> Harness {
        harness_with(test_config(), RecordingStockRecorder::new(), InMemorySales::new())
    }

    fn item(quantity: Decimal, unit_price: Decimal) -> ItemInput {
        ItemInput {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            discount: Decimal::ZERO,
            note: None,
        }
    }

    fn new_order(mode: DeliveryMode, items: Vec<ItemInput>) -> NewOrder {
        NewOrder {
            customer_id: Uuid::new_v4(),
            salesperson_id: Uuid::new_v4(),
            order_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            expected_delivery_date: None,
            delivery_mode: mode,
            delivery_address: None,
            items,
            charges: OrderCharges::default(),
            terms: CommercialTerms::default(),
        }
    }

    fn full(snapshot: &OrderSnapshot) -> Vec<SeparationEntry> {
        snapshot
            .items
            .iter()
            .map(|i| SeparationEntry { item_id: i.item_id, separated_quantity: i.quantity })
            .collect()
    }

    /// Pickup order with two lines, already in Separating.
    async fn separating_order(h: &Harness) -> OrderSnapshot {
        let order = h
            .orchestrator
            .create_order(OrderSource::Blank(new_order(
                DeliveryMode::Pickup,
                vec![item(dec!(4), dec!(12.50)), item(dec!(2.5), dec!(80))],
            )))
            .await
            .unwrap();
        h.orchestrator.confirm(order.id).await.unwrap();
        h.orchestrator.start_separation(order.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_from_quotation_copies_customer_items_and_notes() {
        let h = harness();
        let quotation_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        h.quotations
            .insert(
                quotation_id,
                QuotationSnapshot {
                    customer_id,
                    items: vec![item(dec!(30), dec!(1.20))],
                    notes: Some("entregar na obra".to_string()),
                },
            )
            .await;

        let order = h
            .orchestrator
            .create_order(OrderSource::Quotation {
                quotation_id,
                salesperson_id: Uuid::new_v4(),
                order_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                expected_delivery_date: None,
                delivery_mode: DeliveryMode::Pickup,
                delivery_address: None,
            })
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.quotation_id, Some(quotation_id));
        assert_eq!(order.customer_id, customer_id);
        assert_eq!(order.total, dec!(36.00));
        assert_eq!(order.terms.notes.as_deref(), Some("entregar na obra"));
        assert_eq!(order.version, 1);
    }

    #[tokio::test]
    async fn test_unknown_quotation_is_a_collaborator_failure() {
        let h = harness();
        let err = h
            .orchestrator
            .create_order(OrderSource::Quotation {
                quotation_id: Uuid::new_v4(),
                salesperson_id: Uuid::new_v4(),
                order_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                expected_delivery_date: None,
                delivery_mode: DeliveryMode::Pickup,
                delivery_address: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::CollaboratorFailure { collaborator: Collaborator::Quotation, .. }
        ));
    }

    #[tokio::test]
    async fn test_update_draft_replaces_items_and_charges() {
        let h = harness();
        let order = h
            .orchestrator
            .create_order(OrderSource::Blank(new_order(DeliveryMode::Pickup, vec![item(dec!(1), dec!(10))])))
            .await
            .unwrap();

        let updated = h
            .orchestrator
            .update_draft(
                order.id,
                DraftChanges {
                    items: Some(vec![item(dec!(3), dec!(10))]),
                    charges: Some(OrderCharges { discount: dec!(5), freight: dec!(2), extras: Decimal::ZERO }),
                    ..DraftChanges::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.subtotal, dec!(30.00));
        assert_eq!(updated.total, dec!(27.00));
        assert_eq!(updated.version, 2);

        h.orchestrator.confirm(order.id).await.unwrap();
        let err = h
            .orchestrator
            .update_draft(order.id, DraftChanges::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalTransition);
    }

    #[tokio::test]
    async fn test_separation_reserves_only_the_delta() {
        let h = harness();
        let order = separating_order(&h).await;
        let first = order.items[0].item_id;

        h.orchestrator
            .record_separation(order.id, vec![SeparationEntry { item_id: first, separated_quantity: dec!(1) }])
            .await
            .unwrap();
        let after = h
            .orchestrator
            .record_separation(order.id, vec![SeparationEntry { item_id: first, separated_quantity: dec!(3) }])
            .await
            .unwrap();

        assert_eq!(after.status, OrderStatus::Separating);
        let reserved: Vec<Decimal> = h.stock.movements().await.iter().map(|m| m.quantity).collect();
        assert_eq!(reserved, vec![dec!(1), dec!(2)]);
    }

    #[tokio::test]
    async fn test_repeated_separation_report_writes_nothing() {
        let h = harness();
        let order = separating_order(&h).await;
        let entries = full(&order);

        let first = h.orchestrator.record_separation(order.id, entries.clone()).await.unwrap();
        let second = h.orchestrator.record_separation(order.id, entries).await.unwrap();

        assert_eq!(first.status, OrderStatus::Separated);
        assert_eq!(first, second);
        assert_eq!(h.orchestrator.history(order.id).await.unwrap().len(), 4);
        assert_eq!(h.stock.movements().await.len(), 2);
        assert_eq!(
            h.metrics
                .transitions_total
                .with_label_values(&["record_separation", "unchanged"])
                .get(),
            1
        );
    }

    /// In-memory store whose next appends can be made to fail.
    struct UnreliableStore {
        inner: InMemoryEventStore<OrderEvent>,
        failing_appends: std::sync::atomic::AtomicUsize,
    }

    impl UnreliableStore {
        fn new() -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                failing_appends: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn fail_next_appends(&self, count: usize) {
            self.failing_appends.store(count, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl EventStore<OrderEvent> for UnreliableStore {
        async fn append_events(
            &self,
            aggregate_id: Uuid,
            expected_version: i64,
            events: Vec<EventEnvelope<OrderEvent>>,
        ) -> Result<i64, StoreError> {
            let fail = self
                .failing_appends
                .fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok();
            if fail {
                return Err(anyhow::anyhow!("write timed out").into());
            }
            self.inner.append_events(aggregate_id, expected_version, events).await
        }

        async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<OrderEvent>>, StoreError> {
            self.inner.load_events(aggregate_id).await
        }

        async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
            self.inner.current_version(aggregate_id).await
        }
    }

    /// Reserved minus released, per item.
    async fn held_at_stock(h: &Harness, item_id: Uuid) -> Decimal {
        h.stock
            .movements()
            .await
            .iter()
            .filter(|m| m.item_id == item_id)
            .map(|m| match m.kind {
                MovementKind::Reserve => m.quantity,
                MovementKind::Release => -m.quantity,
            })
            .sum()
    }

    #[tokio::test]
    async fn test_failed_commit_hands_reservations_back() {
        let store = Arc::new(UnreliableStore::new());
        let h = harness_on(store.clone(), test_config(), RecordingStockRecorder::new(), InMemorySales::new());
        let order = separating_order(&h).await;

        store.fail_next_appends(1);
        let err = h.orchestrator.record_separation(order.id, full(&order)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);

        let current = h.orchestrator.get_order(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Separating);
        for item in &order.items {
            assert_eq!(held_at_stock(&h, item.item_id).await, Decimal::ZERO);
        }

        let separated = h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        assert_eq!(separated.status, OrderStatus::Separated);
        for item in &order.items {
            assert_eq!(held_at_stock(&h, item.item_id).await, item.quantity);
        }
    }

    #[tokio::test]
    async fn test_each_separation_reserves_under_its_own_key() {
        let h = harness();
        let order = separating_order(&h).await;
        let first = order.items[0].item_id;

        for quantity in [dec!(1), dec!(2)] {
            h.orchestrator
                .record_separation(order.id, vec![SeparationEntry { item_id: first, separated_quantity: quantity }])
                .await
                .unwrap();
        }

        let movements = h.stock.movements().await;
        assert_eq!(movements.len(), 2);
        assert_ne!(movements[0].key, movements[1].key);
        assert!(movements
            .iter()
            .all(|m| m.key.as_str().starts_with(&format!("{}:record_separation:", order.id))));
        assert_eq!(held_at_stock(&h, first).await, dec!(2));
    }

    #[tokio::test]
    async fn test_stock_failure_does_not_block_separation_by_default() {
        let h = harness();
        let order = separating_order(&h).await;
        h.stock.set_failing(true);

        let separated = h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();

        assert_eq!(separated.status, OrderStatus::Separated);
        assert_eq!(h.metrics.stock_notification_failures.get(), 2);
        // two items, two attempts each
        assert_eq!(
            h.metrics.retry_attempts_total.with_label_values(&["stock_reserve", "2"]).get(),
            2
        );
    }

    #[tokio::test]
    async fn test_stock_failure_blocks_separation_when_configured() {
        let config = FulfillmentConfig { block_on_stock_failure: true, ..test_config() };
        let h = harness_with(config, RecordingStockRecorder::new(), InMemorySales::new());
        let order = separating_order(&h).await;
        h.stock.set_failing(true);

        let err = h.orchestrator.record_separation(order.id, full(&order)).await.unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::CollaboratorFailure { collaborator: Collaborator::StockMovement, .. }
        ));
        let current = h.orchestrator.get_order(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Separating);
        assert!(current.items.iter().all(|i| i.separated_quantity == Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_cancel_releases_separated_quantities() {
        let h = harness();
        let order = separating_order(&h).await;
        let first = order.items[0].item_id;
        h.orchestrator
            .record_separation(order.id, vec![SeparationEntry { item_id: first, separated_quantity: dec!(2) }])
            .await
            .unwrap();

        let cancelled = h
            .orchestrator
            .cancel(order.id, "cliente desistiu da compra")
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("cliente desistiu da compra"));

        let releases: Vec<_> = h
            .stock
            .movements()
            .await
            .into_iter()
            .filter(|m| m.kind == MovementKind::Release)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].item_id, first);
        assert_eq!(releases[0].quantity, dec!(2));
    }

    #[tokio::test]
    async fn test_cancel_succeeds_when_stock_release_fails() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        h.stock.set_failing(true);

        let cancelled = h.orchestrator.cancel(order.id, "obra embargada pela prefeitura").await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.metrics.stock_notification_failures.get(), 2);
    }

    #[tokio::test]
    async fn test_invoice_links_sale_and_fiscal_document() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();

        let receipt = h.orchestrator.invoice(order.id, true).await.unwrap();

        assert_eq!(receipt.order.status, OrderStatus::Invoiced);
        assert_eq!(receipt.order.financial_sale_id, Some(receipt.sale_id));
        assert!(receipt.document_id.is_some());
        assert_eq!(receipt.order.fiscal_document_id, receipt.document_id);
        assert_eq!(h.sales.created_count(), 1);
        assert_eq!(h.fiscal.issued_count().await, 1);
    }

    #[tokio::test]
    async fn test_skipped_fiscal_document_still_invoices() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        h.fiscal.set_skipping(true);

        let receipt = h.orchestrator.invoice(order.id, true).await.unwrap();

        assert_eq!(receipt.order.status, OrderStatus::Invoiced);
        assert_eq!(receipt.document_id, None);
    }

    #[tokio::test]
    async fn test_fiscal_failure_leaves_order_unlinked_and_retry_reuses_sale() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        h.fiscal.fail_next(1);

        let err = h.orchestrator.invoice(order.id, true).await.unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::CollaboratorFailure { collaborator: Collaborator::FiscalDocument, .. }
        ));
        let current = h.orchestrator.get_order(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Separated);
        assert_eq!(current.financial_sale_id, None);

        let receipt = h.orchestrator.invoice(order.id, true).await.unwrap();
        assert_eq!(receipt.order.status, OrderStatus::Invoiced);
        // the idempotency key keeps the retried sale from being duplicated
        assert_eq!(h.sales.created_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_sale_times_out() {
        let h = harness_with(
            test_config(),
            RecordingStockRecorder::new(),
            InMemorySales::with_delay(Duration::from_millis(500)),
        );
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();

        let err = h.orchestrator.invoice(order.id, false).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CollaboratorFailure);
        assert_eq!(err.to_string(), "The financial sale service did not answer within 200 ms");
        let current = h.orchestrator.get_order(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Separated);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_invoice_fast() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        h.sales.fail_next(3);

        for _ in 0..3 {
            assert!(h.orchestrator.invoice(order.id, false).await.is_err());
        }
        let err = h.orchestrator.invoice(order.id, false).await.unwrap_err();

        assert!(err.to_string().contains("temporarily unavailable"));
        assert_eq!(
            h.metrics.circuit_breaker_state.with_label_values(&["financial_sale"]).get(),
            1
        );
        assert_eq!(h.sales.created_count(), 0);
    }

    #[tokio::test]
    async fn test_second_invoice_is_already_linked() {
        let h = harness();
        let order = separating_order(&h).await;
        h.orchestrator.record_separation(order.id, full(&order)).await.unwrap();
        let receipt = h.orchestrator.invoice(order.id, false).await.unwrap();

        let err = h.orchestrator.invoice(order.id, false).await.unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::Order(OrderError::AlreadyLinked { sale_id }) if sale_id == receipt.sale_id
        ));
        assert_eq!(h.sales.created_count(), 1);
    }

    #[tokio::test]
    async fn test_history_tags_events_with_transition() {
        let h = harness();
        let order = separating_order(&h).await;

        let history = h.orchestrator.history(order.id).await.unwrap();

        let types: Vec<&str> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["OrderCreated", "OrderConfirmed", "SeparationStarted"]);
        let transitions: Vec<&str> = history
            .iter()
            .filter_map(|e| e.metadata.get("transition").map(String::as_str))
            .collect();
        assert_eq!(transitions, vec!["create_order", "confirm", "start_separation"]);
        assert_ne!(history[1].correlation_id, history[2].correlation_id);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness();
        let id = Uuid::new_v4();

        assert!(matches!(h.orchestrator.get_order(id).await, Err(FulfillmentError::NotFound(x)) if x == id));
        assert!(matches!(h.orchestrator.confirm(id).await, Err(FulfillmentError::NotFound(_))));
        assert!(matches!(h.orchestrator.history(id).await, Err(FulfillmentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let h = harness();
        let order = h
            .orchestrator
            .create_order(OrderSource::Blank(new_order(DeliveryMode::Pickup, vec![])))
            .await
            .unwrap();

        assert!(h.orchestrator.dispatch(order.id).await.is_err());

        assert_eq!(
            h.metrics.transitions_total.with_label_values(&["dispatch", "rejected"]).get(),
            1
        );
        assert_eq!(
            h.metrics.transitions_total.with_label_values(&["create_order", "committed"]).get(),
            1
        );
    }
}
