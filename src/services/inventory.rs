//! Stock reservation with all-or-nothing semantics.
//!
//! A reservation checks and decrements availability for every line item of an
//! order inside one critical section, so concurrent checkouts against the
//! same product can never oversell and a failure never leaves a partial
//! decrement behind. Release is the explicit compensating operation invoked
//! by rollback; reservations carry no TTL of their own.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::errors::ServiceError;

/// One product's share of a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationLine {
    pub product_id: String,
    pub quantity: u32,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Atomically verifies and decrements availability for every line, or
    /// fails without touching anything.
    async fn reserve(&self, lines: &[ReservationLine]) -> Result<(), ServiceError>;

    /// Compensating operation: returns previously reserved units.
    async fn release(&self, lines: &[ReservationLine]);

    /// Current availability, `None` for unknown products.
    async fn available(&self, product_id: &str) -> Option<i64>;

    /// Sets the available quantity for a product (receiving/adjustment path).
    async fn set_available(&self, product_id: &str, quantity: i64);
}

/// In-process inventory ledger. The single guarded map makes every
/// reservation linearizable with respect to all others.
#[derive(Default)]
pub struct InMemoryInventory {
    levels: Mutex<HashMap<String, i64>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventory {
    #[instrument(skip(self, lines))]
    async fn reserve(&self, lines: &[ReservationLine]) -> Result<(), ServiceError> {
        let mut levels = self.levels.lock().await;

        // Validate the whole set before decrementing anything.
        for line in lines {
            let available = *levels.get(&line.product_id).unwrap_or(&0);
            if available < i64::from(line.quantity) {
                return Err(ServiceError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }
        }

        for line in lines {
            if let Some(level) = levels.get_mut(&line.product_id) {
                *level -= i64::from(line.quantity);
            }
        }
        Ok(())
    }

    #[instrument(skip(self, lines))]
    async fn release(&self, lines: &[ReservationLine]) {
        let mut levels = self.levels.lock().await;
        for line in lines {
            *levels.entry(line.product_id.clone()).or_insert(0) += i64::from(line.quantity);
        }
        info!(count = lines.len(), "released reserved stock");
    }

    async fn available(&self, product_id: &str) -> Option<i64> {
        self.levels.lock().await.get(product_id).copied()
    }

    async fn set_available(&self, product_id: &str, quantity: i64) {
        self.levels
            .lock()
            .await
            .insert(product_id.to_string(), quantity);
    }
}
