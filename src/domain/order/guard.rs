use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

/// Per-order in-flight markers. At most one transition per order holds one.
#[derive(Clone, Default)]
pub struct OrderGuards {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

/// Held for the duration of one transition; releases the order on drop.
#[must_use]
pub struct InFlight {
    order_id: Uuid,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl OrderGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another transition on the same order is still running.
    pub fn try_acquire(&self, order_id: Uuid) -> Option<InFlight> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(order_id) {
            return None;
        }
        Some(InFlight {
            order_id,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn is_held(&self, order_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&order_id)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}
