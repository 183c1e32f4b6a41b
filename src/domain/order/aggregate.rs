use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::Aggregate;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::ledger::{Advance, QuantityLedger};
use super::money::{self, OrderTotals};
use super::state_machine::{ensure_allowed, next_status, OrderStatus, Transition, TransitionContext};
use super::value_objects::{
    CommercialTerms, DeliveryAddress, DeliveryMode, ItemInput, NewOrder, OrderCharges, OrderItem,
    SeparationEntry,
};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // References
    pub quotation_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub salesperson_id: Uuid,

    // Dates
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,

    // Delivery
    pub delivery_mode: DeliveryMode,
    pub delivery_address: Option<DeliveryAddress>,

    // Contents
    pub items: Vec<OrderItem>,
    pub charges: OrderCharges,
    pub terms: CommercialTerms,

    // Lifecycle
    pub status: OrderStatus,
    pub financial_sale_id: Option<Uuid>,
    pub fiscal_document_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderAggregate {
    pub fn totals(&self) -> Result<OrderTotals, OrderError> {
        money::compute_totals(&self.items, &self.charges)
    }

    pub fn ledger(&self) -> QuantityLedger {
        QuantityLedger::from_items(self.id, &self.items)
    }

    /// Checks `invoice` without needing the sale id yet, so the caller can
    /// reject before reaching out to the financial collaborator.
    pub fn ensure_invoiceable(&self) -> Result<(), OrderError> {
        if let Some(sale_id) = self.financial_sale_id {
            return Err(OrderError::AlreadyLinked { sale_id });
        }
        ensure_allowed(self.status, Transition::Invoice, self.context(false))
    }

    fn context(&self, fully_separated: bool) -> TransitionContext {
        TransitionContext {
            delivery_mode: self.delivery_mode,
            fully_separated,
        }
    }

    fn ensure(&self, transition: Transition) -> Result<(), OrderError> {
        ensure_allowed(self.status, transition, self.context(false))
    }

    /// Build lines from caller input and prove they price out.
    fn price_lines(inputs: &[ItemInput], charges: &OrderCharges) -> Result<Vec<OrderItem>, OrderError> {
        for input in inputs {
            validate_input(input)?;
        }
        let items: Vec<OrderItem> = inputs.iter().map(OrderItem::from_input).collect();
        money::compute_totals(&items, charges)?;
        Ok(items)
    }

    fn record_separation(&self, entries: &[SeparationEntry]) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure(Transition::RecordSeparation)?;

        if entries.is_empty() {
            return Err(OrderError::validation("entries", "at least one item must be reported"));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(e.item_id)) {
            return Err(OrderError::validation(
                "item_id",
                format!("item {} reported more than once", dup.item_id),
            ));
        }

        let mut ledger = self.ledger();
        let mut advanced = Vec::new();
        for entry in entries {
            if let Advance::Advanced { .. } = ledger.advance(entry.item_id, entry.separated_quantity)? {
                advanced.push(*entry);
            }
        }

        if advanced.is_empty() {
            return Ok(vec![]);
        }

        let completed = ledger.is_fully_separated();
        next_status(self.status, Transition::RecordSeparation, self.context(completed))?;

        Ok(vec![OrderEvent::SeparationRecorded(SeparationRecorded {
            entries: advanced,
            completed,
            recorded_at: Utc::now(),
        })])
    }
}

fn validate_input(input: &ItemInput) -> Result<(), OrderError> {
    if input.quantity <= Decimal::ZERO {
        return Err(OrderError::validation(
            "quantity",
            format!("must be greater than zero, got {}", input.quantity),
        ));
    }
    if input.unit_price <= Decimal::ZERO {
        return Err(OrderError::validation(
            "unit_price",
            format!("must be greater than zero, got {}", input.unit_price),
        ));
    }
    Ok(())
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for OrderAggregate {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    fn apply_first_event(event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            OrderEvent::Created(e) => Ok(Self {
                id: e.order_id,
                version: 0,
                quotation_id: e.quotation_id,
                customer_id: e.customer_id,
                salesperson_id: e.salesperson_id,
                order_date: e.order_date,
                expected_delivery_date: e.expected_delivery_date,
                actual_delivery_date: None,
                delivery_mode: e.delivery_mode,
                delivery_address: e.delivery_address.clone(),
                items: e.items.clone(),
                charges: e.charges.clone(),
                terms: e.terms.clone(),
                status: OrderStatus::Draft,
                financial_sale_id: None,
                fiscal_document_id: None,
                cancellation_reason: None,
                created_at: e.created_at,
                updated_at: e.created_at,
            }),
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            OrderEvent::Created(_) => {
                // First event already applied
            }
            OrderEvent::DraftUpdated(e) => {
                if let Some(items) = &e.items {
                    self.items = items.clone();
                }
                if let Some(charges) = &e.charges {
                    self.charges = charges.clone();
                }
                if let Some(mode) = e.delivery_mode {
                    self.delivery_mode = mode;
                }
                if let Some(address) = &e.delivery_address {
                    self.delivery_address = address.clone();
                }
                if let Some(date) = e.expected_delivery_date {
                    self.expected_delivery_date = date;
                }
                if let Some(terms) = &e.terms {
                    self.terms = terms.clone();
                }
            }
            OrderEvent::Confirmed(e) => {
                self.status = OrderStatus::Confirmed;
                self.updated_at = e.confirmed_at;
            }
            OrderEvent::SeparationStarted(e) => {
                self.status = OrderStatus::Separating;
                self.updated_at = e.started_at;
            }
            OrderEvent::SeparationRecorded(e) => {
                for entry in &e.entries {
                    let item = self
                        .items
                        .iter_mut()
                        .find(|i| i.item_id == entry.item_id)
                        .ok_or_else(|| {
                            OrderError::validation("item_id", format!("unknown item {}", entry.item_id))
                        })?;
                    item.separated_quantity = entry.separated_quantity;
                }
                if e.completed {
                    self.status = OrderStatus::Separated;
                }
                self.updated_at = e.recorded_at;
            }
            OrderEvent::Dispatched(e) => {
                self.status = OrderStatus::Delivering;
                self.updated_at = e.dispatched_at;
            }
            OrderEvent::Delivered(e) => {
                self.status = OrderStatus::Delivered;
                self.actual_delivery_date = Some(e.delivered_at);
                self.updated_at = e.delivered_at;
            }
            OrderEvent::Invoiced(e) => {
                self.status = OrderStatus::Invoiced;
                self.financial_sale_id = Some(e.sale_id);
                self.fiscal_document_id = e.fiscal_document_id;
                self.updated_at = e.invoiced_at;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
                self.updated_at = e.cancelled_at;
            }
        }

        Ok(())
    }

    fn handle_initial(command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder { order_id, quotation_id, order } => {
                let items = Self::price_lines(&order.items, &order.charges)?;

                Ok(vec![OrderEvent::Created(created_event(*order_id, *quotation_id, order, items))])
            }
            _ => Err(OrderError::NotInitialized),
        }
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder { .. } => Err(OrderError::validation(
                "order_id",
                format!("order {} already exists", self.id),
            )),

            OrderCommand::UpdateDraft { changes } => {
                self.ensure(Transition::UpdateDraft)?;

                let charges = changes.charges.as_ref().unwrap_or(&self.charges);
                let items = match &changes.items {
                    Some(inputs) => Some(Self::price_lines(inputs, charges)?),
                    None => {
                        money::compute_totals(&self.items, charges)?;
                        None
                    }
                };

                Ok(vec![OrderEvent::DraftUpdated(OrderDraftUpdated {
                    items,
                    charges: changes.charges.clone(),
                    delivery_mode: changes.delivery_mode,
                    delivery_address: changes.delivery_address.clone(),
                    expected_delivery_date: changes.expected_delivery_date,
                    terms: changes.terms.clone(),
                })])
            }

            OrderCommand::ConfirmOrder => {
                self.ensure(Transition::Confirm)?;

                if self.items.is_empty() {
                    return Err(OrderError::validation("items", "order must have at least one item"));
                }
                for item in &self.items {
                    if item.quantity <= Decimal::ZERO || item.unit_price <= Decimal::ZERO {
                        return Err(OrderError::InvalidLine {
                            item_id: item.item_id,
                            reason: "quantity and unit price must be greater than zero".to_string(),
                        });
                    }
                }
                self.totals()?;

                Ok(vec![OrderEvent::Confirmed(OrderConfirmed {
                    confirmed_at: Utc::now(),
                })])
            }

            OrderCommand::StartSeparation => {
                self.ensure(Transition::StartSeparation)?;

                Ok(vec![OrderEvent::SeparationStarted(SeparationStarted {
                    started_at: Utc::now(),
                })])
            }

            OrderCommand::RecordSeparation { entries } => self.record_separation(entries),

            OrderCommand::Dispatch => {
                self.ensure(Transition::Dispatch)?;

                if self.delivery_mode == DeliveryMode::Delivery && self.delivery_address.is_none() {
                    return Err(OrderError::validation(
                        "delivery_address",
                        "required when the delivery mode is delivery",
                    ));
                }

                Ok(vec![OrderEvent::Dispatched(OrderDispatched {
                    dispatched_at: Utc::now(),
                })])
            }

            OrderCommand::ConfirmDelivery { delivered_at } => {
                self.ensure(Transition::ConfirmDelivery)?;

                Ok(vec![OrderEvent::Delivered(OrderDelivered {
                    delivered_at: *delivered_at,
                })])
            }

            OrderCommand::Invoice { sale_id, fiscal_document_id } => {
                self.ensure_invoiceable()?;

                Ok(vec![OrderEvent::Invoiced(OrderInvoiced {
                    sale_id: *sale_id,
                    fiscal_document_id: *fiscal_document_id,
                    invoiced_at: Utc::now(),
                })])
            }

            OrderCommand::CancelOrder { reason, min_reason_len } => {
                self.ensure(Transition::Cancel)?;

                let reason = reason.trim();
                if reason.chars().count() < *min_reason_len {
                    return Err(OrderError::validation(
                        "reason",
                        format!("must be at least {} characters long", min_reason_len),
                    ));
                }

                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.to_string(),
                    previous_status: self.status,
                    cancelled_at: Utc::now(),
                })])
            }
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

fn created_event(
    order_id: Uuid,
    quotation_id: Option<Uuid>,
    order: &NewOrder,
    items: Vec<OrderItem>,
) -> OrderCreated {
    OrderCreated {
        order_id,
        quotation_id,
        customer_id: order.customer_id,
        salesperson_id: order.salesperson_id,
        order_date: order.order_date,
        expected_delivery_date: order.expected_delivery_date,
        delivery_mode: order.delivery_mode,
        delivery_address: order.delivery_address.clone(),
        items,
        charges: order.charges.clone(),
        terms: order.terms.clone(),
        created_at: Utc::now(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::value_objects::DraftChanges;
    use rust_decimal_macros::dec;

    fn input(quantity: Decimal, unit_price: Decimal) -> ItemInput {
        ItemInput {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            discount: Decimal::ZERO,
            note: None,
        }
    }

    fn new_order(items: Vec<ItemInput>, mode: DeliveryMode) -> NewOrder {
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

    fn create(order: NewOrder) -> OrderAggregate {
        let events = OrderAggregate::handle_initial(&OrderCommand::CreateOrder {
            order_id: Uuid::new_v4(),
            quotation_id: None,
            order,
        })
        .unwrap();
        OrderAggregate::apply_first_event(&events[0]).unwrap()
    }

    fn execute(aggregate: &mut OrderAggregate, command: OrderCommand) -> Result<(), OrderError> {
        for event in aggregate.handle_command(&command)? {
            aggregate.apply_event(&event)?;
        }
        Ok(())
    }

    fn separating(quantities: &[Decimal]) -> OrderAggregate {
        let items = quantities.iter().map(|q| input(*q, dec!(2.00))).collect();
        let mut order = create(new_order(items, DeliveryMode::Pickup));
        execute(&mut order, OrderCommand::ConfirmOrder).unwrap();
        execute(&mut order, OrderCommand::StartSeparation).unwrap();
        order
    }

    fn entry(order: &OrderAggregate, index: usize, qty: Decimal) -> SeparationEntry {
        SeparationEntry {
            item_id: order.items[index].item_id,
            separated_quantity: qty,
        }
    }

    #[test]
    fn test_created_order_is_draft() {
        let order = create(new_order(vec![input(dec!(1), dec!(1.00))], DeliveryMode::Pickup));

        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].separated_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_create_rejects_zero_quantity() {
        let result = OrderAggregate::handle_initial(&OrderCommand::CreateOrder {
            order_id: Uuid::new_v4(),
            quotation_id: None,
            order: new_order(vec![input(dec!(0), dec!(1.00))], DeliveryMode::Pickup),
        });

        assert!(matches!(result, Err(OrderError::Validation { field: "quantity", .. })));
    }

    #[test]
    fn test_create_rejects_discount_above_subtotal() {
        let mut order = new_order(vec![input(dec!(1), dec!(10.00))], DeliveryMode::Pickup);
        order.charges.discount = dec!(20.00);

        let result = OrderAggregate::handle_initial(&OrderCommand::CreateOrder {
            order_id: Uuid::new_v4(),
            quotation_id: None,
            order,
        });

        assert!(matches!(result, Err(OrderError::InvalidDiscount { .. })));
    }

    #[test]
    fn test_confirm_without_items_fails_then_succeeds_with_one() {
        let mut order = create(new_order(vec![], DeliveryMode::Pickup));

        let err = execute(&mut order, OrderCommand::ConfirmOrder).unwrap_err();
        assert!(matches!(err, OrderError::Validation { field: "items", .. }));
        assert_eq!(order.status, OrderStatus::Draft);

        execute(
            &mut order,
            OrderCommand::UpdateDraft {
                changes: DraftChanges {
                    items: Some(vec![input(dec!(1), dec!(1.00))]),
                    ..Default::default()
                },
            },
        )
        .unwrap();
        execute(&mut order, OrderCommand::ConfirmOrder).unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_items_are_frozen_after_confirm() {
        let mut order = create(new_order(vec![input(dec!(1), dec!(1.00))], DeliveryMode::Pickup));
        execute(&mut order, OrderCommand::ConfirmOrder).unwrap();

        let err = execute(
            &mut order,
            OrderCommand::UpdateDraft {
                changes: DraftChanges {
                    items: Some(vec![input(dec!(9), dec!(1.00))]),
                    ..Default::default()
                },
            },
        )
        .unwrap_err();

        assert!(matches!(err, OrderError::IllegalTransition { transition: Transition::UpdateDraft, .. }));
        assert_eq!(order.items[0].quantity, dec!(1));
    }

    #[test]
    fn test_update_draft_recomputes_totals() {
        let mut order = create(new_order(vec![input(dec!(2), dec!(10.00))], DeliveryMode::Pickup));
        assert_eq!(order.totals().unwrap().total, dec!(20.00));

        execute(
            &mut order,
            OrderCommand::UpdateDraft {
                changes: DraftChanges {
                    charges: Some(OrderCharges {
                        discount: dec!(5.00),
                        freight: dec!(12.50),
                        extras: dec!(1.00),
                    }),
                    ..Default::default()
                },
            },
        )
        .unwrap();

        let totals = order.totals().unwrap();
        assert_eq!(totals.subtotal, dec!(20.00));
        assert_eq!(totals.total, dec!(28.50));
    }

    #[test]
    fn test_partial_separation_stays_separating() {
        let mut order = separating(&[dec!(5), dec!(3)]);
        let first = entry(&order, 0, dec!(5));

        execute(&mut order, OrderCommand::RecordSeparation { entries: vec![first] }).unwrap();

        assert_eq!(order.status, OrderStatus::Separating);
        assert_eq!(order.items[0].separated_quantity, dec!(5));
        assert_eq!(order.items[1].separated_quantity, dec!(0));
    }

    #[test]
    fn test_full_separation_moves_to_separated() {
        let mut order = separating(&[dec!(5), dec!(3)]);
        let entries = vec![entry(&order, 0, dec!(5)), entry(&order, 1, dec!(3))];

        execute(&mut order, OrderCommand::RecordSeparation { entries }).unwrap();

        assert_eq!(order.status, OrderStatus::Separated);
    }

    #[test]
    fn test_resubmitting_separation_emits_nothing() {
        let mut order = separating(&[dec!(5), dec!(3)]);
        let entries = vec![entry(&order, 0, dec!(2))];
        execute(&mut order, OrderCommand::RecordSeparation { entries: entries.clone() }).unwrap();
        let before = order.clone();

        let events = order.handle_command(&OrderCommand::RecordSeparation { entries }).unwrap();

        assert!(events.is_empty());
        assert_eq!(order.items, before.items);
        assert_eq!(order.status, before.status);
    }

    #[test]
    fn test_separation_failure_applies_nothing() {
        let mut order = separating(&[dec!(5), dec!(3)]);
        let entries = vec![entry(&order, 0, dec!(5)), entry(&order, 1, dec!(4))];

        let err = execute(&mut order, OrderCommand::RecordSeparation { entries }).unwrap_err();

        assert!(matches!(err, OrderError::QuantityExceedsOrdered { .. }));
        assert_eq!(order.items[0].separated_quantity, dec!(0));
    }

    #[test]
    fn test_duplicate_separation_entries_rejected() {
        let order = separating(&[dec!(5)]);
        let entries = vec![entry(&order, 0, dec!(1)), entry(&order, 0, dec!(2))];

        let err = order.handle_command(&OrderCommand::RecordSeparation { entries }).unwrap_err();
        assert!(matches!(err, OrderError::Validation { field: "item_id", .. }));
    }

    #[test]
    fn test_dispatch_requires_address_for_delivery_mode() {
        let mut order = create(new_order(vec![input(dec!(1), dec!(1.00))], DeliveryMode::Delivery));
        execute(&mut order, OrderCommand::ConfirmOrder).unwrap();
        execute(&mut order, OrderCommand::StartSeparation).unwrap();
        let entries = vec![entry(&order, 0, dec!(1))];
        execute(&mut order, OrderCommand::RecordSeparation { entries }).unwrap();

        let err = execute(&mut order, OrderCommand::Dispatch).unwrap_err();

        assert!(matches!(err, OrderError::Validation { field: "delivery_address", .. }));
        assert_eq!(order.status, OrderStatus::Separated);
    }

    #[test]
    fn test_invoice_twice_reports_existing_link() {
        let mut order = separating(&[dec!(1)]);
        let entries = vec![entry(&order, 0, dec!(1))];
        execute(&mut order, OrderCommand::RecordSeparation { entries }).unwrap();
        let sale_id = Uuid::new_v4();

        execute(&mut order, OrderCommand::Invoice { sale_id, fiscal_document_id: None }).unwrap();
        let err = execute(
            &mut order,
            OrderCommand::Invoice { sale_id: Uuid::new_v4(), fiscal_document_id: None },
        )
        .unwrap_err();

        assert_eq!(err, OrderError::AlreadyLinked { sale_id });
        assert_eq!(order.financial_sale_id, Some(sale_id));
    }

    #[test]
    fn test_cancel_reason_length_is_enforced() {
        let mut order = separating(&[dec!(2)]);

        let err = execute(
            &mut order,
            OrderCommand::CancelOrder { reason: "   short   ".to_string(), min_reason_len: 10 },
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::Validation { field: "reason", .. }));
        assert_eq!(order.status, OrderStatus::Separating);

        execute(
            &mut order,
            OrderCommand::CancelOrder { reason: "client gave up".to_string(), min_reason_len: 10 },
        )
        .unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason.as_deref(), Some("client gave up"));
    }

    #[test]
    fn test_create_command_on_existing_order_is_rejected() {
        let order = create(new_order(vec![], DeliveryMode::Pickup));
        let err = order
            .handle_command(&OrderCommand::CreateOrder {
                order_id: order.id,
                quotation_id: None,
                order: new_order(vec![], DeliveryMode::Pickup),
            })
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation { field: "order_id", .. }));
    }

    #[test]
    fn test_switching_to_pickup_can_clear_address_and_date() {
        let mut draft = new_order(vec![input(dec!(1), dec!(1.00))], DeliveryMode::Delivery);
        draft.expected_delivery_date = NaiveDate::from_ymd_opt(2026, 3, 9);
        draft.delivery_address = Some(DeliveryAddress {
            street: "Rua das Pedras".to_string(),
            number: Some("120".to_string()),
            district: None,
            city: "Curitiba".to_string(),
            state: "PR".to_string(),
            postal_code: "80010-000".to_string(),
            reference: None,
        });
        let mut order = create(draft);

        let changes = DraftChanges {
            delivery_mode: Some(DeliveryMode::Pickup),
            delivery_address: Some(None),
            expected_delivery_date: Some(None),
            ..Default::default()
        };
        let events = order.handle_command(&OrderCommand::UpdateDraft { changes }).unwrap();

        // Replay goes through the stored JSON, so the clear must survive it.
        let json = serde_json::to_string(&events[0]).unwrap();
        let replayed: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(replayed, events[0]);

        order.apply_event(&replayed).unwrap();
        assert_eq!(order.delivery_mode, DeliveryMode::Pickup);
        assert!(order.delivery_address.is_none());
        assert!(order.expected_delivery_date.is_none());
    }

    #[test]
    fn test_absent_draft_field_keeps_current_value() {
        let mut draft = new_order(vec![input(dec!(1), dec!(1.00))], DeliveryMode::Pickup);
        draft.expected_delivery_date = NaiveDate::from_ymd_opt(2026, 3, 9);
        let mut order = create(draft);

        let changes: DraftChanges = serde_json::from_str(r#"{"delivery_mode": "delivery"}"#).unwrap();
        assert_eq!(changes.expected_delivery_date, None);
        execute(&mut order, OrderCommand::UpdateDraft { changes }).unwrap();

        assert_eq!(order.expected_delivery_date, NaiveDate::from_ymd_opt(2026, 3, 9));
    }
}
