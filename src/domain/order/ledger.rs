use rust_decimal::Decimal;
use uuid::Uuid;

use super::errors::OrderError;
use super::value_objects::OrderItem;

// ============================================================================
// Quantity Ledger - ordered vs. separated quantity per item
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerEntry {
    pub item_id: Uuid,
    pub ordered: Decimal,
    pub separated: Decimal,
}

/// Outcome of a single `advance` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advance {
    /// Same quantity was already recorded
    Unchanged,
    Advanced { from: Decimal, to: Decimal },
}

impl Advance {
    /// Quantity newly set aside by this advance.
    pub fn delta(&self) -> Decimal {
        match self {
            Advance::Unchanged => Decimal::ZERO,
            Advance::Advanced { from, to } => *to - *from,
        }
    }
}

/// Separation bookkeeping for the items of one order.
#[derive(Debug, Clone)]
pub struct QuantityLedger {
    order_id: Uuid,
    entries: Vec<LedgerEntry>,
}

impl QuantityLedger {
    pub fn from_items(order_id: Uuid, items: &[OrderItem]) -> Self {
        Self {
            order_id,
            entries: items
                .iter()
                .map(|item| LedgerEntry {
                    item_id: item.item_id,
                    ordered: item.quantity,
                    separated: item.separated_quantity,
                })
                .collect(),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Move an item's separated quantity forward to `new_separated`.
    pub fn advance(&mut self, item_id: Uuid, new_separated: Decimal) -> Result<Advance, OrderError> {
        if new_separated < Decimal::ZERO {
            return Err(OrderError::validation(
                "separated_quantity",
                format!("must not be negative, got {}", new_separated),
            ));
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.item_id == item_id)
            .ok_or_else(|| {
                OrderError::validation("item_id", format!("item {} is not part of this order", item_id))
            })?;

        if new_separated > entry.ordered {
            return Err(OrderError::QuantityExceedsOrdered {
                item_id,
                requested: new_separated,
                ordered: entry.ordered,
            });
        }

        if new_separated < entry.separated {
            return Err(OrderError::QuantityRegression {
                item_id,
                requested: new_separated,
                current: entry.separated,
            });
        }

        if new_separated == entry.separated {
            return Ok(Advance::Unchanged);
        }

        let from = entry.separated;
        entry.separated = new_separated;

        tracing::debug!(
            order_id = %self.order_id,
            item_id = %item_id,
            from = %from,
            to = %new_separated,
            "Advanced separated quantity"
        );

        Ok(Advance::Advanced { from, to: new_separated })
    }

    pub fn is_fully_separated(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.separated == e.ordered)
    }
}
