//! Redirect-based approval flow adapter.
//!
//! Initialize hands back an approval URL the buyer is sent to; the gateway
//! later redirects them to our return endpoint carrying the token. The
//! redirect parameters are never trusted on their own — callers must
//! re-verify against this adapter before treating the payment as approved.

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{GatewayKind, Order};

use super::{
    sandbox_declines, CaptureOutcome, GatewayAdapter, GatewayInit, GatewayStatus, SandboxLedger,
};

pub struct PaypalGateway {
    ledger: SandboxLedger,
    approval_base_url: String,
}

impl PaypalGateway {
    pub fn new(approval_base_url: String) -> Self {
        Self {
            ledger: SandboxLedger::default(),
            approval_base_url,
        }
    }

    /// Sandbox hook standing in for the buyer approving the payment on the
    /// gateway's own pages. Approving a transaction that is not pending is a
    /// no-op, so declined transactions stay declined.
    pub fn sandbox_approve(&self, reference: &str) -> Result<(), ServiceError> {
        if self.ledger.status(reference)? != GatewayStatus::Pending {
            return Ok(());
        }
        self.ledger.set_status(reference, GatewayStatus::Succeeded)
    }

    /// Buyer approval URL for an existing transaction, used when an
    /// idempotent retry needs the same session handed back.
    pub fn approval_url_for(&self, reference: &str) -> String {
        format!(
            "{}/checkoutnow?token={}",
            self.approval_base_url.trim_end_matches('/'),
            reference
        )
    }
}

#[async_trait]
impl GatewayAdapter for PaypalGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Paypal
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn initialize(&self, order: &Order) -> Result<GatewayInit, ServiceError> {
        let reference = format!("PAYID-{}", Uuid::new_v4().simple().to_string().to_uppercase());

        let status = if sandbox_declines(order.total) {
            GatewayStatus::Failed
        } else {
            GatewayStatus::Pending
        };
        self.ledger.insert(&reference, order.total, status);

        let approval_url = self.approval_url_for(&reference);
        info!(reference = %reference, "redirect payment initialized");
        Ok(GatewayInit {
            token: Some(reference.clone()),
            approval_url: Some(approval_url),
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
