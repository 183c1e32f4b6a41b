use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use super::errors::OrderError;
use super::state_machine::OrderStatus;
use super::value_objects::{CommercialTerms, DeliveryAddress, DeliveryMode, OrderCharges, OrderItem};

/// Read-only view of an order handed to callers and collaborators.
///
/// `subtotal` and `total` are recomputed from the items every time a snapshot
/// is taken; they are never read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub version: i64,
    pub quotation_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub salesperson_id: Uuid,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub delivery_mode: DeliveryMode,
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<OrderItem>,
    pub charges: OrderCharges,
    pub terms: CommercialTerms,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub financial_sale_id: Option<Uuid>,
    pub fiscal_document_id: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&OrderAggregate> for OrderSnapshot {
    type Error = OrderError;

    fn try_from(order: &OrderAggregate) -> Result<Self, Self::Error> {
        let totals = order.totals()?;

        Ok(Self {
            id: order.id,
            version: order.version,
            quotation_id: order.quotation_id,
            customer_id: order.customer_id,
            salesperson_id: order.salesperson_id,
            order_date: order.order_date,
            expected_delivery_date: order.expected_delivery_date,
            actual_delivery_date: order.actual_delivery_date,
            delivery_mode: order.delivery_mode,
            delivery_address: order.delivery_address.clone(),
            items: order.items.clone(),
            charges: order.charges.clone(),
            terms: order.terms.clone(),
            subtotal: totals.subtotal,
            total: totals.total,
            status: order.status,
            financial_sale_id: order.financial_sale_id,
            fiscal_document_id: order.fiscal_document_id,
            cancellation_reason: order.cancellation_reason.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}
