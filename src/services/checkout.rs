//! Checkout orchestration.
//!
//! Drives a request through the full flow: fraud guard, authoritative total
//! recomputation, amount validation, atomic stock reservation, idempotent
//! provisional order creation, gateway initialize, and the verify/capture/
//! completion path with rollback. Every outbound gateway call runs under a
//! timeout; a timeout is a retryable failure, never an implicit success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{hash_token, GatewayKind, Order, PaymentMetadata, PaymentStatus};
use crate::services::attempts::PaymentAttemptLedger;
use crate::services::inventory::{InventoryStore, ReservationLine};
use crate::services::orders::{NewOrderContext, OrderService};
use crate::services::payments::{GatewayInit, GatewayRegistry, GatewayStatus};
use crate::services::totals::{amounts_match, OrderTotalCalculator};
use crate::shipping::DestinationAddress;

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    /// Allowed client/server total difference in minor units
    pub amount_tolerance: i64,
    pub gateway_timeout: Duration,
    pub fraud_max_failed_attempts: usize,
    pub fraud_window_secs: u64,
}

/// Validated initiate request, amounts in minor units.
#[derive(Debug, Clone)]
pub struct InitiateCommand {
    pub items: Vec<(String, u32)>,
    pub shipping_option: String,
    pub destination: DestinationAddress,
    pub client_total: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub order: Order,
    pub gateway_token: Option<String>,
    pub approval_url: Option<String>,
}

pub struct CheckoutService {
    calculator: OrderTotalCalculator,
    inventory: Arc<dyn InventoryStore>,
    orders: Arc<OrderService>,
    gateways: GatewayRegistry,
    ledger: Arc<PaymentAttemptLedger>,
    events: EventSender,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        calculator: OrderTotalCalculator,
        inventory: Arc<dyn InventoryStore>,
        orders: Arc<OrderService>,
        gateways: GatewayRegistry,
        ledger: Arc<PaymentAttemptLedger>,
        events: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            calculator,
            inventory,
            orders,
            gateways,
            ledger,
            events,
            settings,
        }
    }

    /// Converts a submitted cart into a provisional order and begins the
    /// gateway-side transaction. Idempotent per the client idempotency key.
    #[instrument(skip(self, command), fields(gateway = %gateway, client_id = %client_id))]
    pub async fn initiate(
        &self,
        gateway: GatewayKind,
        command: InitiateCommand,
        client_id: &str,
    ) -> Result<InitiateOutcome, ServiceError> {
        self.fraud_guard(client_id).await?;

        // Device-attested payments fail closed before any resources are
        // committed when the merchant identity is absent.
        if gateway == GatewayKind::ApplePay && !self.gateways.apple_pay.is_ready() {
            return Err(ServiceError::MerchantValidation(
                "merchant identity is not configured for device-attested payments".to_string(),
            ));
        }

        // Idempotent replay: the same key always resolves to the same order.
        if let Some(existing) = self.orders.find_by_idempotency(&command.idempotency_key) {
            return self.resume_existing(existing, gateway, client_id).await;
        }

        let (breakdown, items) = self
            .calculator
            .calculate(
                &command.items,
                &command.shipping_option,
                &command.destination,
                client_id,
            )
            .await?;

        if !amounts_match(
            command.client_total,
            breakdown.total,
            self.settings.amount_tolerance,
        ) {
            // Tampering signal: record it, never silently correct it.
            self.ledger
                .record(
                    client_id,
                    gateway,
                    command.client_total,
                    false,
                    None,
                    Some("amount mismatch".to_string()),
                )
                .await;
            self.events.send(Event::AmountMismatchRejected {
                client_id: client_id.to_string(),
                client_total: command.client_total,
                server_total: breakdown.total,
            });
            return Err(ServiceError::AmountMismatch {
                client_total: command.client_total,
                server_total: breakdown.total,
            });
        }

        let lines = reservation_lines(&items);
        self.inventory.reserve(&lines).await?;

        let (order, created) = match self.orders.create_or_update(NewOrderContext {
            client_id: client_id.to_string(),
            gateway,
            idempotency_key: command.idempotency_key.clone(),
            items,
            breakdown,
            currency: self.settings.currency.clone(),
            stock_reserved: true,
        }) {
            Ok(result) => result,
            Err(e) => {
                // No order row may keep stock held.
                self.inventory.release(&lines).await;
                return Err(e);
            }
        };

        if !created {
            // Lost a concurrent race on the same key; the winning request
            // holds its own reservation.
            self.inventory.release(&lines).await;
            return self.resume_existing(order, gateway, client_id).await;
        }

        self.events.send(Event::CheckoutInitiated {
            order_id: order.id,
            gateway,
            total: order.total,
        });

        self.begin_gateway(order, client_id).await
    }

    /// Completes a checkout after the client (or the gateway redirect) comes
    /// back with a reference. Re-verifies with the gateway before trusting
    /// anything.
    #[instrument(skip(self, attestation_token), fields(order_id = %order_id))]
    pub async fn complete(
        &self,
        gateway: GatewayKind,
        order_id: Uuid,
        gateway_reference: &str,
        attestation_token: Option<&str>,
    ) -> Result<Order, ServiceError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.gateway != gateway {
            return Err(ServiceError::ValidationError(format!(
                "order {} was initiated via {}, not {}",
                order_id, order.gateway, gateway
            )));
        }

        if order.payment_status == PaymentStatus::Paid {
            if order.payment_reference.as_deref() == Some(gateway_reference) {
                return Ok(order);
            }
            return Err(ServiceError::ValidationError(
                "order is already paid with a different gateway reference".to_string(),
            ));
        }

        if order.payment_reference.as_deref() != Some(gateway_reference) {
            return Err(ServiceError::ValidationError(
                "gateway reference does not match this order".to_string(),
            ));
        }

        let attestation = match gateway {
            GatewayKind::ApplePay => {
                let token = attestation_token.map(str::trim).unwrap_or_default();
                if token.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "attestation token is required for device-attested payments".to_string(),
                    ));
                }
                Some(token.to_string())
            }
            _ => None,
        };

        self.settle(order, gateway_reference.to_string(), attestation)
            .await
    }

    /// Server-side half of the redirect completion contract. The redirect
    /// parameters only identify the transaction; payment truth comes from
    /// re-verifying with the gateway.
    #[instrument(skip(self))]
    pub async fn handle_return(
        &self,
        gateway: GatewayKind,
        token: &str,
    ) -> Result<Order, ServiceError> {
        if gateway != GatewayKind::Paypal {
            return Err(ServiceError::InvalidOperation(format!(
                "{} does not use a redirect completion flow",
                gateway
            )));
        }

        let order = self
            .orders
            .find_by_reference(token)
            .ok_or_else(|| ServiceError::OrderNotFound(format!("reference {}", token)))?;

        if order.payment_status == PaymentStatus::Paid {
            return Ok(order);
        }

        self.settle(order, token.to_string(), None).await
    }

    pub fn get_order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(id)
    }

    async fn fraud_guard(&self, client_id: &str) -> Result<(), ServiceError> {
        let failed = self
            .ledger
            .failed_attempts_since(client_id, self.settings.fraud_window_secs)
            .await;
        if failed >= self.settings.fraud_max_failed_attempts {
            warn!(client_id = %client_id, failed, "refusing checkout after repeated failed attempts");
            return Err(ServiceError::ValidationError(
                "too many failed payment attempts; please try again later".to_string(),
            ));
        }
        Ok(())
    }

    /// Re-entry path for an idempotency key that already maps to an order.
    async fn resume_existing(
        &self,
        order: Order,
        gateway: GatewayKind,
        client_id: &str,
    ) -> Result<InitiateOutcome, ServiceError> {
        if order.gateway != gateway {
            return Err(ServiceError::ValidationError(format!(
                "idempotency key was used with gateway {}",
                order.gateway
            )));
        }

        match order.payment_status {
            PaymentStatus::Paid => Ok(InitiateOutcome {
                gateway_token: order.payment_reference.clone(),
                approval_url: None,
                order,
            }),
            PaymentStatus::Failed => Err(ServiceError::InvalidOperation(
                "this checkout already failed; submit a new request".to_string(),
            )),
            PaymentStatus::Pending if order.payment_reference.is_some() => {
                // The earlier attempt already holds a live gateway
                // transaction; hand the same session back instead of opening
                // a second one.
                let reference = order.payment_reference.clone();
                let approval_url = match gateway {
                    GatewayKind::Paypal => reference
                        .as_deref()
                        .map(|r| self.gateways.paypal.approval_url_for(r)),
                    _ => None,
                };
                info!(order_id = %order.id, "returning existing gateway session for idempotent retry");
                Ok(InitiateOutcome {
                    gateway_token: reference,
                    approval_url,
                    order,
                })
            }
            PaymentStatus::Pending | PaymentStatus::FailedRetryable => {
                self.begin_gateway(order, client_id).await
            }
        }
    }

    /// Initializes the gateway-side transaction for a provisional order.
    async fn begin_gateway(
        &self,
        order: Order,
        client_id: &str,
    ) -> Result<InitiateOutcome, ServiceError> {
        let adapter = self.gateways.adapter(order.gateway);

        let init: GatewayInit = match self
            .with_gateway_timeout(adapter.initialize(&order))
            .await
        {
            Ok(init) => init,
            Err(ServiceError::GatewayDeclined(reason)) => {
                return Err(self.rollback(order.id, order.gateway, client_id, reason).await);
            }
            Err(e) => {
                let reason = e.response_message();
                self.orders.mark_retryable(order.id, &reason)?;
                self.ledger
                    .record(
                        client_id,
                        order.gateway,
                        order.total,
                        false,
                        None,
                        Some(reason.clone()),
                    )
                    .await;
                self.events.send(Event::PaymentFailed {
                    order_id: order.id,
                    gateway: order.gateway,
                    reason,
                    retryable: true,
                });
                return Err(e);
            }
        };

        let order = self.orders.mark_gateway_pending(order.id, &init.reference)?;
        self.ledger
            .record(
                client_id,
                order.gateway,
                order.total,
                true,
                init.token.as_deref(),
                None,
            )
            .await;

        Ok(InitiateOutcome {
            gateway_token: init.token,
            approval_url: init.approval_url,
            order,
        })
    }

    /// Verify, capture, and finalize one gateway attempt.
    async fn settle(
        &self,
        order: Order,
        reference: String,
        attestation: Option<String>,
    ) -> Result<Order, ServiceError> {
        let adapter = self.gateways.adapter(order.gateway);
        let client_id = order.client_id.clone();

        let status = match self.with_gateway_timeout(adapter.verify(&reference)).await {
            Ok(status) => status,
            Err(ServiceError::GatewayTransient(reason)) => {
                return Err(self
                    .transient_failure(order.id, order.gateway, &client_id, reason)
                    .await);
            }
            Err(e) => return Err(e),
        };

        match status {
            GatewayStatus::Pending => Err(ServiceError::InvalidOperation(
                "payment has not been approved by the gateway yet".to_string(),
            )),
            GatewayStatus::Failed => Err(self
                .rollback(
                    order.id,
                    order.gateway,
                    &client_id,
                    "payment was declined by the gateway".to_string(),
                )
                .await),
            GatewayStatus::Succeeded => {
                let capture = match self.with_gateway_timeout(adapter.capture(&reference)).await {
                    Ok(capture) => capture,
                    Err(ServiceError::GatewayDeclined(reason)) => {
                        return Err(self
                            .rollback(order.id, order.gateway, &client_id, reason)
                            .await);
                    }
                    Err(ServiceError::GatewayTransient(reason)) => {
                        return Err(self
                            .transient_failure(order.id, order.gateway, &client_id, reason)
                            .await);
                    }
                    Err(e) => return Err(e),
                };

                let metadata = build_metadata(order.gateway, &capture.reference, attestation.as_deref());
                let (completed, newly) =
                    self.orders
                        .complete_success(order.id, &capture.reference, metadata)?;

                if newly {
                    self.ledger
                        .record(
                            &client_id,
                            completed.gateway,
                            completed.total,
                            true,
                            attestation.as_deref(),
                            None,
                        )
                        .await;
                    // Analytics only after the paid state is committed, and
                    // only once per order.
                    self.events.send(Event::PaymentCaptured {
                        order_id: completed.id,
                        gateway: completed.gateway,
                        reference: capture.reference.clone(),
                        amount: capture.amount,
                    });
                    self.events.send(Event::OrderCompleted {
                        order_id: completed.id,
                        order_number: completed.order_number.clone(),
                        gateway: completed.gateway,
                        total: completed.total,
                    });
                }
                Ok(completed)
            }
        }
    }

    /// Terminal gateway failure: fail the order, release its reservation
    /// exactly once, and report the decline.
    async fn rollback(
        &self,
        order_id: Uuid,
        gateway: GatewayKind,
        client_id: &str,
        reason: String,
    ) -> ServiceError {
        match self.orders.complete_failure(order_id, &reason) {
            Ok((failed, must_release)) => {
                if must_release {
                    self.inventory.release(&reservation_lines(&failed.items)).await;
                    self.events.send(Event::StockReleased { order_id });
                }
                self.ledger
                    .record(
                        client_id,
                        gateway,
                        failed.total,
                        false,
                        None,
                        Some(reason.clone()),
                    )
                    .await;
                self.events.send(Event::PaymentFailed {
                    order_id,
                    gateway,
                    reason: reason.clone(),
                    retryable: false,
                });
                ServiceError::GatewayDeclined(reason)
            }
            Err(e) => e,
        }
    }

    /// Transient gateway failure: keep the reservation, allow a retry via the
    /// idempotency key.
    async fn transient_failure(
        &self,
        order_id: Uuid,
        gateway: GatewayKind,
        client_id: &str,
        reason: String,
    ) -> ServiceError {
        if let Err(e) = self.orders.mark_retryable(order_id, &reason) {
            return e;
        }
        let total = self.orders.get(order_id).map(|o| o.total).unwrap_or(0);
        self.ledger
            .record(client_id, gateway, total, false, None, Some(reason.clone()))
            .await;
        self.events.send(Event::PaymentFailed {
            order_id,
            gateway,
            reason: reason.clone(),
            retryable: true,
        });
        ServiceError::GatewayTransient(reason)
    }

    async fn with_gateway_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        call_with_timeout(self.settings.gateway_timeout, call).await
    }
}

/// Bounds an outbound gateway call. Elapsing the deadline is a transient
/// failure: the money may or may not have moved, so it is never treated as
/// success.
async fn call_with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::GatewayTransient(
            "gateway call timed out".to_string(),
        )),
    }
}

fn reservation_lines(items: &[crate::models::OrderItem]) -> Vec<ReservationLine> {
    items
        .iter()
        .map(|item| ReservationLine {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        })
        .collect()
}

fn build_metadata(
    gateway: GatewayKind,
    reference: &str,
    attestation: Option<&str>,
) -> PaymentMetadata {
    match gateway {
        GatewayKind::Card => PaymentMetadata::Card {
            charge_id: reference.to_string(),
            network: "card".to_string(),
        },
        GatewayKind::Paypal => PaymentMetadata::Paypal {
            capture_id: format!("CAP-{}", reference),
            approval_token: reference.to_string(),
        },
        GatewayKind::ApplePay => PaymentMetadata::ApplePay {
            transaction_id: reference.to_string(),
            attestation_hash: attestation.map(hash_token).unwrap_or_default(),
        },
    }
}
