use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ============================================================================
// Order Value Objects
// ============================================================================

/// One line of a sales order.
///
/// Quantities are decimal: construction materials are sold by the cubic metre,
/// the kilogram and the linear metre as often as by the unit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub separated_quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub note: Option<String>,
}

impl OrderItem {
    /// Build a fresh line from caller input; nothing separated yet.
    pub fn from_input(input: &ItemInput) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            product_id: input.product_id,
            quantity: input.quantity,
            separated_quantity: Decimal::ZERO,
            unit_price: input.unit_price,
            discount: input.discount,
            note: input.note.clone(),
        }
    }

    pub fn is_fully_separated(&self) -> bool {
        self.separated_quantity == self.quantity
    }
}

/// Caller-supplied line, before the order assigns it an identity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemInput {
    pub product_id: Uuid,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

/// How the goods leave the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Customer collects at the counter
    Pickup,
    /// Own fleet delivers to the customer's address
    Delivery,
    /// Third-party carrier
    Carrier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub number: Option<String>,
    pub district: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub reference: Option<String>,
}

/// Order-level charges applied on top of the item subtotal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCharges {
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub freight: Decimal,
    #[serde(default)]
    pub extras: Decimal,
}

/// Commercial terms that travel with the order but do not affect fulfillment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommercialTerms {
    pub payment_terms_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub internal_notes: Option<String>,
}

/// Everything needed to open a blank draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub salesperson_id: Uuid,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub delivery_mode: DeliveryMode,
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<ItemInput>,
    #[serde(default)]
    pub charges: OrderCharges,
    #[serde(default)]
    pub terms: CommercialTerms,
}

/// Changes allowed while the order is still a draft. `None` leaves a field as is.
///
/// The optional fields take `Some(None)` to clear them, e.g. the address of
/// an order switched to pickup. On the wire an explicit `null` clears and an
/// absent key leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftChanges {
    pub items: Option<Vec<ItemInput>>,
    pub charges: Option<OrderCharges>,
    pub delivery_mode: Option<DeliveryMode>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_change")]
    pub delivery_address: Option<Option<DeliveryAddress>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_change")]
    pub expected_delivery_date: Option<Option<NaiveDate>>,
    pub terms: Option<CommercialTerms>,
}

/// A present key, `null` included, is a change. Pair with `#[serde(default)]`
/// so a missing key stays `None`.
pub(crate) fn deserialize_change<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// One `{item_id, separated_qty}` pair of a separation report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeparationEntry {
    pub item_id: Uuid,
    pub separated_quantity: Decimal,
}

// ============================================================================
// Unit Tests
// ============================================================================
