//! Provisional order management: idempotent creation, completion, rollback.
//!
//! An order row is created before any gateway contact and acts as the
//! idempotent anchor for the whole flow. Creation is linearizable per
//! idempotency key: concurrent duplicate submissions converge on one row.
//! After creation, only the completion/rollback operations mutate the order;
//! rows are never deleted, failures stay behind for audit.

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{
    CheckoutState, GatewayKind, Order, OrderItem, OrderStatus, PaymentMetadata, PaymentStatus,
};
use crate::services::totals::TotalsBreakdown;

/// Everything the order manager needs to persist a provisional order.
#[derive(Debug, Clone)]
pub struct NewOrderContext {
    pub client_id: String,
    pub gateway: GatewayKind,
    pub idempotency_key: String,
    pub items: Vec<OrderItem>,
    pub breakdown: TotalsBreakdown,
    pub currency: String,
    /// Whether the caller already holds a stock reservation for these items
    pub stock_reserved: bool,
}

pub struct OrderService {
    orders: DashMap<Uuid, Order>,
    by_idempotency: DashMap<String, Uuid>,
    by_reference: DashMap<String, Uuid>,
    events: EventSender,
}

impl OrderService {
    pub fn new(events: EventSender) -> Self {
        Self {
            orders: DashMap::new(),
            by_idempotency: DashMap::new(),
            by_reference: DashMap::new(),
            events,
        }
    }

    /// Idempotently creates a provisional order.
    ///
    /// Returns the order plus whether this call created it. Repeated calls
    /// with the same idempotency key always return the same row; the entry
    /// lock on the key index makes concurrent duplicates converge.
    #[instrument(skip(self, ctx), fields(idempotency_key = %ctx.idempotency_key))]
    pub fn create_or_update(&self, ctx: NewOrderContext) -> Result<(Order, bool), ServiceError> {
        use dashmap::mapref::entry::Entry;

        match self.by_idempotency.entry(ctx.idempotency_key.clone()) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                let order = self
                    .orders
                    .get(&id)
                    .map(|o| o.clone())
                    .ok_or_else(|| ServiceError::InternalError("idempotency index desync".into()))?;
                info!(order_id = %id, "returning existing order for idempotency key");
                Ok((order, false))
            }
            Entry::Vacant(vacant) => {
                let now = Utc::now();
                let id = Uuid::new_v4();
                let order = Order {
                    id,
                    order_number: generate_order_number(),
                    client_id: ctx.client_id,
                    gateway: ctx.gateway,
                    items: ctx.items,
                    subtotal: ctx.breakdown.subtotal,
                    shipping_cost: ctx.breakdown.shipping_cost,
                    tax: ctx.breakdown.tax,
                    discount: ctx.breakdown.discount,
                    total: ctx.breakdown.total,
                    currency: ctx.currency,
                    status: OrderStatus::Pending,
                    payment_status: PaymentStatus::Pending,
                    checkout_state: CheckoutState::OrderCreated,
                    payment_reference: None,
                    payment_metadata: None,
                    failure_reason: None,
                    stock_reserved: ctx.stock_reserved,
                    idempotency_key: ctx.idempotency_key,
                    created_at: now,
                    updated_at: now,
                };
                debug_assert!(order.totals_consistent());

                self.orders.insert(id, order.clone());
                vacant.insert(id);

                info!(order_id = %id, order_number = %order.order_number, "provisional order created");
                self.events.send(Event::OrderCreated(id));
                Ok((order, true))
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn find_by_idempotency(&self, key: &str) -> Option<Order> {
        let id = *self.by_idempotency.get(key)?;
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<Order> {
        let id = *self.by_reference.get(reference)?;
        self.orders.get(&id).map(|o| o.clone())
    }

    /// Records the gateway-assigned reference and moves the order into the
    /// gateway-pending state. Legal from a fresh order or a retryable
    /// failure (re-initialize path).
    pub fn mark_gateway_pending(&self, id: Uuid, reference: &str) -> Result<Order, ServiceError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;

        if !order.checkout_state.can_transition(CheckoutState::GatewayPending) {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot begin gateway processing from state {:?}",
                order.checkout_state
            )));
        }

        order.checkout_state = CheckoutState::GatewayPending;
        order.payment_status = PaymentStatus::Pending;
        order.payment_reference = Some(reference.to_string());
        order.failure_reason = None;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        drop(order);

        self.by_reference.insert(reference.to_string(), id);
        Ok(snapshot)
    }

    /// Finalizes a successful capture.
    ///
    /// Idempotent: a second call with the same successful reference returns
    /// the already-completed order and reports `newly_completed = false`, so
    /// callers can gate side effects. A different reference against a paid
    /// order is refused.
    #[instrument(skip(self, metadata))]
    pub fn complete_success(
        &self,
        id: Uuid,
        reference: &str,
        metadata: PaymentMetadata,
    ) -> Result<(Order, bool), ServiceError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;

        if order.payment_status == PaymentStatus::Paid {
            if order.payment_reference.as_deref() == Some(reference) {
                return Ok((order.clone(), false));
            }
            return Err(ServiceError::InvalidOperation(
                "order is already paid with a different gateway reference".to_string(),
            ));
        }

        if order.checkout_state != CheckoutState::GatewayPending {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot capture payment from state {:?}",
                order.checkout_state
            )));
        }

        order.checkout_state = CheckoutState::Completed;
        order.payment_status = PaymentStatus::Paid;
        order.status = OrderStatus::Processing;
        order.payment_reference = Some(reference.to_string());
        order.payment_metadata = Some(metadata);
        order.failure_reason = None;
        // The reservation has been consumed by the sale; there is no hold
        // left to release.
        order.stock_reserved = false;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        drop(order);

        self.by_reference.insert(reference.to_string(), id);
        info!(order_id = %id, reference = %reference, "order completed");
        Ok((snapshot, true))
    }

    /// Records a terminal gateway decline.
    ///
    /// Returns whether this call performed the transition and whether the
    /// caller must release a held reservation; both are false when the order
    /// had already failed, so rollback side effects run at most once.
    #[instrument(skip(self))]
    pub fn complete_failure(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<(Order, bool), ServiceError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;

        if order.payment_status == PaymentStatus::Failed {
            return Ok((order.clone(), false));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(
                "cannot fail an order that is already paid".to_string(),
            ));
        }

        order.checkout_state = CheckoutState::Failed;
        order.payment_status = PaymentStatus::Failed;
        order.status = OrderStatus::Failed;
        order.failure_reason = Some(reason.to_string());
        let must_release = order.stock_reserved;
        order.stock_reserved = false;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        drop(order);

        warn!(order_id = %id, reason = %reason, "order failed");
        Ok((snapshot, must_release))
    }

    /// Records a transient gateway failure. The stock reservation is kept so
    /// the client can retry against the same provisional order through its
    /// idempotency key.
    #[instrument(skip(self))]
    pub fn mark_retryable(&self, id: Uuid, reason: &str) -> Result<Order, ServiceError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::OrderNotFound(id.to_string()))?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(
                "cannot mark a paid order retryable".to_string(),
            ));
        }

        order.checkout_state = CheckoutState::FailedRetryable;
        order.payment_status = PaymentStatus::FailedRetryable;
        order.failure_reason = Some(reason.to_string());
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        drop(order);

        warn!(order_id = %id, reason = %reason, "gateway attempt failed, order retryable");
        Ok(snapshot)
    }
}

/// Human-readable unique order number, e.g. `ORD-20260805-4F2A9C1B`.
fn generate_order_number() -> String {
    let timestamp = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or("00000000")
        .to_uppercase();
    format!("ORD-{}-{}", timestamp, suffix)
}
