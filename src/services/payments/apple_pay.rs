//! Device-attested wallet adapter and merchant domain validation.
//!
//! Before a device-attested payment may be initialized, the merchant session
//! must be validated: the validation URL supplied by the client has to belong
//! to the payment network's own domains, and the requesting domain has to
//! match the configured merchant domain. Both checks fail closed and are
//! never bypassed; only the outbound session fetch is stubbed outside
//! production.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{GatewayKind, Order};

use super::{
    sandbox_declines, CaptureOutcome, GatewayAdapter, GatewayInit, GatewayStatus, SandboxLedger,
};

/// Merchant identity for the device-attested gateway.
#[derive(Debug, Clone)]
pub struct MerchantIdentity {
    pub merchant_id: Option<String>,
    pub domain: Option<String>,
    pub display_name: String,
    /// Domain suffixes a validation URL may resolve to
    pub network_domains: Vec<String>,
    pub production: bool,
}

pub struct MerchantDomainValidator {
    identity: MerchantIdentity,
    http: reqwest::Client,
}

impl MerchantDomainValidator {
    pub fn new(identity: MerchantIdentity, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { identity, http })
    }

    pub fn is_configured(&self) -> bool {
        self.identity.merchant_id.is_some() && self.identity.domain.is_some()
    }

    /// Validates the session request and, in production, fetches the merchant
    /// session from the payment network. The domain checks always run.
    #[instrument(skip(self))]
    pub async fn validate_session(
        &self,
        validation_url: &str,
        requesting_domain: &str,
    ) -> Result<Value, ServiceError> {
        if !self.is_configured() {
            return Err(ServiceError::MerchantNotConfigured);
        }

        let url = Url::parse(validation_url).map_err(|_| {
            ServiceError::MerchantValidation("malformed validation URL".to_string())
        })?;
        if url.scheme() != "https" {
            return Err(ServiceError::MerchantValidation(
                "validation URL must use https".to_string(),
            ));
        }
        let host = url.host_str().ok_or_else(|| {
            ServiceError::MerchantValidation("validation URL has no host".to_string())
        })?;
        if !self.host_belongs_to_network(host) {
            warn!(host = %host, "validation URL outside the payment network");
            return Err(ServiceError::MerchantValidation(format!(
                "validation URL host {} does not belong to the payment network",
                host
            )));
        }

        let merchant_domain = self.identity.domain.as_deref().unwrap_or_default();
        if !requesting_domain.eq_ignore_ascii_case(merchant_domain) {
            warn!(requested = %requesting_domain, configured = %merchant_domain, "merchant domain mismatch");
            return Err(ServiceError::MerchantValidation(format!(
                "domain {} does not match the configured merchant domain",
                requesting_domain
            )));
        }

        let merchant_id = self.identity.merchant_id.as_deref().unwrap_or_default();
        if self.identity.production {
            let payload = json!({
                "merchantIdentifier": merchant_id,
                "domainName": merchant_domain,
                "displayName": self.identity.display_name,
            });
            let response = self
                .http
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| ServiceError::GatewayTransient(format!("merchant session: {}", e)))?;
            if !response.status().is_success() {
                return Err(ServiceError::GatewayTransient(format!(
                    "merchant session request returned {}",
                    response.status()
                )));
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| ServiceError::GatewayTransient(format!("merchant session: {}", e)))
        } else {
            info!("issuing stub merchant session outside production");
            Ok(json!({
                "merchantIdentifier": merchant_id,
                "domainName": merchant_domain,
                "displayName": self.identity.display_name,
                "epochTimestamp": chrono::Utc::now().timestamp_millis(),
                "nonce": Uuid::new_v4().simple().to_string(),
                "merchantSessionIdentifier": format!("mss_{}", Uuid::new_v4().simple()),
            }))
        }
    }

    /// Exact match or dot-separated suffix match, so `evil-apple.com` never
    /// passes an `apple.com` allowlist.
    fn host_belongs_to_network(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.identity
            .network_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
    }
}

/// Device-attested wallet adapter.
pub struct ApplePayGateway {
    ledger: SandboxLedger,
    validator: std::sync::Arc<MerchantDomainValidator>,
}

impl ApplePayGateway {
    pub fn new(validator: std::sync::Arc<MerchantDomainValidator>) -> Self {
        Self {
            ledger: SandboxLedger::default(),
            validator,
        }
    }

    /// Whether the merchant identity required for device-attested payments is
    /// present. Callers check this before committing any resources.
    pub fn is_ready(&self) -> bool {
        self.validator.is_configured()
    }
}

#[async_trait]
impl GatewayAdapter for ApplePayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::ApplePay
    }

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn initialize(&self, order: &Order) -> Result<GatewayInit, ServiceError> {
        // Fail closed: without a merchant identity no device-attested payment
        // may begin.
        if !self.validator.is_configured() {
            return Err(ServiceError::MerchantValidation(
                "merchant identity is not configured for device-attested payments".to_string(),
            ));
        }

        let reference = format!("ap_{}", Uuid::new_v4().simple());
        let status = if sandbox_declines(order.total) {
            GatewayStatus::Failed
        } else {
            GatewayStatus::Succeeded
        };
        self.ledger.insert(&reference, order.total, status);

        info!(reference = %reference, "device-attested payment initialized");
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
    use std::sync::Arc;

    fn identity(configured: bool) -> MerchantIdentity {
        MerchantIdentity {
            merchant_id: configured.then(|| "merchant.com.example.shop".to_string()),
            domain: configured.then(|| "shop.example.com".to_string()),
            display_name: "Example Shop".to_string(),
            network_domains: vec!["apple.com".to_string()],
            production: false,
        }
    }

    fn validator(configured: bool) -> MerchantDomainValidator {
        MerchantDomainValidator::new(identity(configured), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn unconfigured_merchant_is_not_implemented() {
        let err = validator(false)
            .validate_session(
                "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "shop.example.com",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MerchantNotConfigured));
    }

    #[tokio::test]
    async fn foreign_validation_url_is_rejected() {
        let err = validator(true)
            .validate_session("https://evil.example.net/startSession", "shop.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MerchantValidation(_)));
    }

    #[tokio::test]
    async fn lookalike_host_suffix_is_rejected() {
        let err = validator(true)
            .validate_session("https://evil-apple.com/startSession", "shop.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MerchantValidation(_)));
    }

    #[tokio::test]
    async fn plain_http_is_rejected() {
        let err = validator(true)
            .validate_session(
                "http://apple-pay-gateway.apple.com/startSession",
                "shop.example.com",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MerchantValidation(_)));
    }

    #[tokio::test]
    async fn wrong_merchant_domain_is_rejected() {
        let err = validator(true)
            .validate_session(
                "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "someone-else.example.com",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MerchantValidation(_)));
    }

    #[tokio::test]
    async fn valid_request_yields_a_session_outside_production() {
        let session = validator(true)
            .validate_session(
                "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "shop.example.com",
            )
            .await
            .unwrap();
        assert_eq!(session["domainName"], "shop.example.com");
        assert!(session["merchantSessionIdentifier"]
            .as_str()
            .unwrap()
            .starts_with("mss_"));
    }

    #[tokio::test]
    async fn initialize_fails_closed_without_merchant_identity() {
        let gateway = ApplePayGateway::new(Arc::new(validator(false)));
        let order = crate::models::Order {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST".into(),
            client_id: "c".into(),
            gateway: GatewayKind::ApplePay,
            items: vec![],
            subtotal: 1_000,
            shipping_cost: 0,
            tax: 0,
            discount: 0,
            total: 1_000,
            currency: "USD".into(),
            status: crate::models::OrderStatus::Pending,
            payment_status: crate::models::PaymentStatus::Pending,
            checkout_state: crate::models::CheckoutState::OrderCreated,
            payment_reference: None,
            payment_metadata: None,
            failure_reason: None,
            stock_reserved: true,
            idempotency_key: "k".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let err = gateway.initialize(&order).await.unwrap_err();
        assert!(matches!(err, ServiceError::MerchantValidation(_)));
    }
}
