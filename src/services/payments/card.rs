//! Direct-charge card/wallet network adapter.

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{GatewayKind, Order};

use super::{
    sandbox_declines, CaptureOutcome, GatewayAdapter, GatewayInit, GatewayStatus, SandboxLedger,
};

/// Card network adapter. Authorization happens at initialize time; capture
/// finalizes the already-authorized charge.
#[derive(Default)]
pub struct CardGateway {
    ledger: SandboxLedger,
}

impl CardGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GatewayAdapter for CardGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Card
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn initialize(&self, order: &Order) -> Result<GatewayInit, ServiceError> {
        let reference = format!("ch_{}", Uuid::new_v4().simple());

        let status = if sandbox_declines(order.total) {
            GatewayStatus::Failed
        } else {
            GatewayStatus::Succeeded
        };
        self.ledger.insert(&reference, order.total, status);

        info!(reference = %reference, amount = order.total, "card charge authorized");
        Ok(GatewayInit {
            token: Some(reference.clone()),
            approval_url: None,
            reference,
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayStatus, ServiceError> {
        self.ledger.status(reference)
    }

    #[instrument(skip(self))]
    async fn capture(&self, reference: &str) -> Result<CaptureOutcome, ServiceError> {
        self.ledger.capture(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckoutState, OrderStatus, PaymentStatus};
    use chrono::Utc;

    fn order(total: i64) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST".into(),
            client_id: "c".into(),
            gateway: GatewayKind::Card,
            items: vec![],
            subtotal: total,
            shipping_cost: 0,
            tax: 0,
            discount: 0,
            total,
            currency: "USD".into(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            checkout_state: CheckoutState::OrderCreated,
            payment_reference: None,
            payment_metadata: None,
            failure_reason: None,
            stock_reserved: true,
            idempotency_key: "k".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn initialize_then_verify_then_capture() {
        let gateway = CardGateway::new();
        let init = gateway.initialize(&order(1_400)).await.unwrap();
        assert!(init.token.is_some());
        assert!(init.approval_url.is_none());

        assert_eq!(
            gateway.verify(&init.reference).await.unwrap(),
            GatewayStatus::Succeeded
        );

        let capture = gateway.capture(&init.reference).await.unwrap();
        assert!(!capture.already_captured);
        assert_eq!(capture.amount, 1_400);
    }

    #[tokio::test]
    async fn repeat_capture_is_detected() {
        let gateway = CardGateway::new();
        let init = gateway.initialize(&order(1_400)).await.unwrap();
        gateway.capture(&init.reference).await.unwrap();

        let second = gateway.capture(&init.reference).await.unwrap();
        assert!(second.already_captured);
    }

    #[tokio::test]
    async fn decline_amounts_fail_verification_and_capture() {
        let gateway = CardGateway::new();
        let init = gateway.initialize(&order(1_499)).await.unwrap();

        assert_eq!(
            gateway.verify(&init.reference).await.unwrap(),
            GatewayStatus::Failed
        );
        assert!(matches!(
            gateway.capture(&init.reference).await.unwrap_err(),
            ServiceError::GatewayDeclined(_)
        ));
    }
}
