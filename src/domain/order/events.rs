use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::DomainEvent;
use super::state_machine::OrderStatus;
use super::value_objects::{
    deserialize_change, CommercialTerms, DeliveryAddress, DeliveryMode, OrderCharges, OrderItem,
    SeparationEntry,
};

// ============================================================================
// Order Events - Domain Events for Order Aggregate
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created(OrderCreated),
    DraftUpdated(OrderDraftUpdated),
    Confirmed(OrderConfirmed),
    SeparationStarted(SeparationStarted),
    SeparationRecorded(SeparationRecorded),
    Dispatched(OrderDispatched),
    Delivered(OrderDelivered),
    Invoiced(OrderInvoiced),
    Cancelled(OrderCancelled),
}

impl DomainEvent for OrderEvent {
    fn event_type() -> &'static str { "OrderEvent" }

    fn name(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => OrderCreated::event_type(),
            OrderEvent::DraftUpdated(_) => OrderDraftUpdated::event_type(),
            OrderEvent::Confirmed(_) => OrderConfirmed::event_type(),
            OrderEvent::SeparationStarted(_) => SeparationStarted::event_type(),
            OrderEvent::SeparationRecorded(_) => SeparationRecorded::event_type(),
            OrderEvent::Dispatched(_) => OrderDispatched::event_type(),
            OrderEvent::Delivered(_) => OrderDelivered::event_type(),
            OrderEvent::Invoiced(_) => OrderInvoiced::event_type(),
            OrderEvent::Cancelled(_) => OrderCancelled::event_type(),
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Created - draft opened from a blank payload or a quotation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub quotation_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub salesperson_id: Uuid,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub delivery_mode: DeliveryMode,
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<OrderItem>,
    pub charges: OrderCharges,
    pub terms: CommercialTerms,
    pub created_at: DateTime<Utc>,
}

impl DomainEvent for OrderCreated {
    fn event_type() -> &'static str { "OrderCreated" }
    fn event_version() -> i32 { 1 }
}

/// Draft Updated - only the fields that changed are present.
/// `Some(None)` on the optional fields records that they were cleared.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDraftUpdated {
    pub items: Option<Vec<OrderItem>>,
    pub charges: Option<OrderCharges>,
    pub delivery_mode: Option<DeliveryMode>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_change")]
    pub delivery_address: Option<Option<DeliveryAddress>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_change")]
    pub expected_delivery_date: Option<Option<NaiveDate>>,
    pub terms: Option<CommercialTerms>,
}

impl DomainEvent for OrderDraftUpdated {
    fn event_type() -> &'static str { "OrderDraftUpdated" }
    fn event_version() -> i32 { 1 }
}

/// Order Confirmed - items and ordered quantities are frozen from here on
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderConfirmed {
    pub confirmed_at: DateTime<Utc>,
}

impl DomainEvent for OrderConfirmed {
    fn event_type() -> &'static str { "OrderConfirmed" }
    fn event_version() -> i32 { 1 }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SeparationStarted {
    pub started_at: DateTime<Utc>,
}

impl DomainEvent for SeparationStarted {
    fn event_type() -> &'static str { "SeparationStarted" }
    fn event_version() -> i32 { 1 }
}

/// Separation Recorded - carries only the entries that actually advanced
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SeparationRecorded {
    pub entries: Vec<SeparationEntry>,
    pub completed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl DomainEvent for SeparationRecorded {
    fn event_type() -> &'static str { "SeparationRecorded" }
    fn event_version() -> i32 { 1 }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDispatched {
    pub dispatched_at: DateTime<Utc>,
}

impl DomainEvent for OrderDispatched {
    fn event_type() -> &'static str { "OrderDispatched" }
    fn event_version() -> i32 { 1 }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDelivered {
    pub delivered_at: DateTime<Utc>,
}

impl DomainEvent for OrderDelivered {
    fn event_type() -> &'static str { "OrderDelivered" }
    fn event_version() -> i32 { 1 }
}

/// Order Invoiced - links the financial sale and, optionally, the fiscal document
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderInvoiced {
    pub sale_id: Uuid,
    pub fiscal_document_id: Option<Uuid>,
    pub invoiced_at: DateTime<Utc>,
}

impl DomainEvent for OrderInvoiced {
    fn event_type() -> &'static str { "OrderInvoiced" }
    fn event_version() -> i32 { 1 }
}

/// Order Cancelled - lifecycle ended; completed side effects are left in place
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub reason: String,
    pub previous_status: OrderStatus,
    pub cancelled_at: DateTime<Utc>,
}

impl DomainEvent for OrderCancelled {
    fn event_type() -> &'static str { "OrderCancelled" }
    fn event_version() -> i32 { 1 }
}
