//! Payment gateway adapters.
//!
//! Every gateway family implements the same initialize/verify/capture
//! contract so the orchestration layer stays gateway-agnostic; the concrete
//! adapter is selected from [`GatewayKind`] through the registry. Adapters
//! keep their transactions in a sandbox ledger, which makes non-production
//! flows deterministic; capture is safe to call more than once and
//! short-circuits on an already-captured reference.

pub mod apple_pay;
pub mod card;
pub mod paypal;

pub use apple_pay::{ApplePayGateway, MerchantDomainValidator, MerchantIdentity};
pub use card::CardGateway;
pub use paypal::PaypalGateway;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ServiceError;
use crate::models::{GatewayKind, Order};

/// Amounts whose minor units end in this value are declined by the sandbox,
/// mirroring the magic-amount convention of real gateway sandboxes.
pub(crate) const SANDBOX_DECLINE_SUFFIX: i64 = 99;

/// The gateway's authoritative view of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Result of beginning a gateway-side transaction.
#[derive(Debug, Clone)]
pub struct GatewayInit {
    /// Gateway-assigned reference for verify/capture
    pub reference: String,
    /// Client-side token, when the gateway hands the client one
    pub token: Option<String>,
    /// Buyer approval URL, for redirect-based flows
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub reference: String,
    /// Captured amount in minor units
    pub amount: i64,
    /// True when this reference had already been captured before the call
    pub already_captured: bool,
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Begins the gateway-side transaction for the order's server-computed
    /// total. Client-supplied amounts never reach this call.
    async fn initialize(&self, order: &Order) -> Result<GatewayInit, ServiceError>;

    /// Reads the gateway's authoritative state for a reference.
    async fn verify(&self, reference: &str) -> Result<GatewayStatus, ServiceError>;

    /// Finalizes funds movement. Capturing an already-captured reference is
    /// detected and short-circuited rather than charged again.
    async fn capture(&self, reference: &str) -> Result<CaptureOutcome, ServiceError>;
}

/// Sandbox transaction store shared by the adapter implementations.
#[derive(Default)]
pub(crate) struct SandboxLedger {
    transactions: DashMap<String, SandboxTransaction>,
}

#[derive(Debug, Clone)]
pub(crate) struct SandboxTransaction {
    pub amount: i64,
    pub status: GatewayStatus,
    pub captured: bool,
}

impl SandboxLedger {
    pub fn insert(&self, reference: &str, amount: i64, status: GatewayStatus) {
        self.transactions.insert(
            reference.to_string(),
            SandboxTransaction {
                amount,
                status,
                captured: false,
            },
        );
    }

    pub fn status(&self, reference: &str) -> Result<GatewayStatus, ServiceError> {
        self.transactions
            .get(reference)
            .map(|t| t.status)
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!("unknown gateway reference: {}", reference))
            })
    }

    pub fn set_status(&self, reference: &str, status: GatewayStatus) -> Result<(), ServiceError> {
        let mut txn = self.transactions.get_mut(reference).ok_or_else(|| {
            ServiceError::InvalidOperation(format!("unknown gateway reference: {}", reference))
        })?;
        txn.status = status;
        Ok(())
    }

    pub fn capture(&self, reference: &str) -> Result<CaptureOutcome, ServiceError> {
        let mut txn = self.transactions.get_mut(reference).ok_or_else(|| {
            ServiceError::InvalidOperation(format!("unknown gateway reference: {}", reference))
        })?;

        if txn.captured {
            return Ok(CaptureOutcome {
                reference: reference.to_string(),
                amount: txn.amount,
                already_captured: true,
            });
        }

        match txn.status {
            GatewayStatus::Failed => Err(ServiceError::GatewayDeclined(
                "payment was declined by the gateway".to_string(),
            )),
            GatewayStatus::Pending => Err(ServiceError::InvalidOperation(
                "payment has not been approved yet".to_string(),
            )),
            GatewayStatus::Succeeded => {
                txn.captured = true;
                Ok(CaptureOutcome {
                    reference: reference.to_string(),
                    amount: txn.amount,
                    already_captured: false,
                })
            }
        }
    }
}

pub(crate) fn sandbox_declines(amount: i64) -> bool {
    amount % 100 == SANDBOX_DECLINE_SUFFIX
}

/// Adapter lookup by gateway family.
#[derive(Clone)]
pub struct GatewayRegistry {
    pub card: Arc<CardGateway>,
    pub paypal: Arc<PaypalGateway>,
    pub apple_pay: Arc<ApplePayGateway>,
}

impl GatewayRegistry {
    pub fn adapter(&self, kind: GatewayKind) -> Arc<dyn GatewayAdapter> {
        match kind {
            GatewayKind::Card => self.card.clone(),
            GatewayKind::Paypal => self.paypal.clone(),
            GatewayKind::ApplePay => self.apple_pay.clone(),
        }
    }
}
