use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::{OrderCharges, OrderItem};

// ============================================================================
// Money Calculator - pure derivation of order totals
// ============================================================================
//
// The only legal source of subtotal and total. Nothing else in the crate adds
// up line amounts; every snapshot goes through `compute_totals`.
//
// ============================================================================

/// Presentation scale for monetary amounts.
const DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub total: Decimal,
}

/// `quantity * unit_price - discount`, rejecting a discount that would eat the whole line.
pub fn line_total(item: &OrderItem) -> Result<Decimal, OrderError> {
    if item.discount < Decimal::ZERO {
        return Err(OrderError::InvalidLine {
            item_id: item.item_id,
            reason: format!("discount must not be negative, got {}", item.discount),
        });
    }

    let gross = item.quantity * item.unit_price;
    if item.discount >= gross {
        return Err(OrderError::InvalidLine {
            item_id: item.item_id,
            reason: format!("discount {} must be below line amount {}", item.discount, gross),
        });
    }

    Ok(gross - item.discount)
}

pub fn compute_totals(items: &[OrderItem], charges: &OrderCharges) -> Result<OrderTotals, OrderError> {
    require_charge(charges.discount, "discount")?;
    require_charge(charges.freight, "freight")?;
    require_charge(charges.extras, "extras")?;

    // Charges are already at money scale, so only the subtotal needs rounding
    // and the total follows from it exactly.
    let subtotal = round_money(
        items
            .iter()
            .map(line_total)
            .sum::<Result<Decimal, _>>()?,
    );

    if charges.discount > subtotal {
        return Err(OrderError::InvalidDiscount {
            discount: charges.discount,
            subtotal,
        });
    }

    let total = subtotal - charges.discount + charges.freight + charges.extras;

    Ok(OrderTotals { subtotal, total })
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

fn require_charge(value: Decimal, field: &'static str) -> Result<(), OrderError> {
    if value < Decimal::ZERO {
        return Err(OrderError::validation(field, format!("must not be negative, got {}", value)));
    }
    if round_money(value) != value {
        return Err(OrderError::validation(
            field,
            format!("must have at most {} decimal places, got {}", DECIMAL_PLACES, value),
        ));
    }
    Ok(())
}
