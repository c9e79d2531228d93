//! Checkout payment-orchestration core for a multi-vendor marketplace.
//!
//! Converts client-submitted carts into authoritative orders, re-validates
//! price and stock against trusted data, and coordinates payment capture
//! across card, redirect, and device-attested gateways with idempotency and
//! fraud-resistant bookkeeping.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod rate_limiter;
pub mod services;
pub mod shipping;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::catalog::{CatalogProvider, InMemoryCatalog, NoPromotions, PromotionProvider};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::rate_limiter::{CheckoutRateLimiter, RateLimitPolicy};
use crate::services::attempts::PaymentAttemptLedger;
use crate::services::checkout::{CheckoutService, CheckoutSettings};
use crate::services::inventory::{InMemoryInventory, InventoryStore};
use crate::services::orders::OrderService;
use crate::services::payments::{
    ApplePayGateway, CardGateway, GatewayRegistry, MerchantDomainValidator, MerchantIdentity,
    PaypalGateway,
};
use crate::services::totals::OrderTotalCalculator;
use crate::shipping::{FlatRateShipping, ShippingQuoter, TaxRates};

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<InMemoryCatalog>,
    pub inventory: Arc<InMemoryInventory>,
    pub orders: Arc<OrderService>,
    pub checkout: Arc<CheckoutService>,
    pub rate_limiter: Arc<CheckoutRateLimiter>,
    pub merchant_validator: Arc<MerchantDomainValidator>,
    pub attempt_ledger: Arc<PaymentAttemptLedger>,
    pub gateways: GatewayRegistry,
    pub event_sender: EventSender,
}

/// Wires up the service graph from configuration. The caller owns the event
/// receiver side and is expected to spawn [`events::process_events`].
pub fn build_state(
    config: AppConfig,
    event_sender: EventSender,
) -> Result<Arc<AppState>, ServiceError> {
    let catalog = Arc::new(InMemoryCatalog::new());
    let inventory = Arc::new(InMemoryInventory::new());

    let shipping: Arc<dyn ShippingQuoter> = Arc::new(FlatRateShipping {
        standard_rate: config.shipping_standard_minor,
        express_rate: config.shipping_express_minor,
        free_threshold: config.free_shipping_threshold_minor,
    });
    let promotions: Arc<dyn PromotionProvider> = Arc::new(NoPromotions);
    let catalog_provider: Arc<dyn CatalogProvider> = catalog.clone();

    let calculator = OrderTotalCalculator::new(
        catalog_provider,
        shipping,
        promotions,
        TaxRates {
            domestic_bps: config.tax_domestic_bps,
            regional_bps: config.tax_regional_bps,
            international_bps: config.tax_international_bps,
        },
        config.home_country.clone(),
        config.regional_country_list(),
    );

    let gateway_timeout = Duration::from_secs(config.gateway_timeout_secs);
    let merchant_validator = Arc::new(MerchantDomainValidator::new(
        MerchantIdentity {
            merchant_id: config.apple_merchant_id.clone(),
            domain: config.apple_merchant_domain.clone(),
            display_name: config.apple_display_name.clone(),
            network_domains: config.apple_network_domain_list(),
            production: config.is_production(),
        },
        gateway_timeout,
    )?);

    let gateways = GatewayRegistry {
        card: Arc::new(CardGateway::new()),
        paypal: Arc::new(PaypalGateway::new(config.paypal_base_url.clone())),
        apple_pay: Arc::new(ApplePayGateway::new(merchant_validator.clone())),
    };

    let orders = Arc::new(OrderService::new(event_sender.clone()));
    let attempt_ledger = Arc::new(PaymentAttemptLedger::new());

    let inventory_store: Arc<dyn InventoryStore> = inventory.clone();
    let checkout = Arc::new(CheckoutService::new(
        calculator,
        inventory_store,
        orders.clone(),
        gateways.clone(),
        attempt_ledger.clone(),
        event_sender.clone(),
        CheckoutSettings {
            currency: config.currency.clone(),
            amount_tolerance: config.amount_tolerance_minor,
            gateway_timeout,
            fraud_max_failed_attempts: config.fraud_max_failed_attempts,
            fraud_window_secs: config.fraud_window_secs,
        },
    ));

    let window = Duration::from_secs(config.rate_limit_window_secs);
    let rate_limiter = Arc::new(CheckoutRateLimiter::new(
        RateLimitPolicy {
            max_requests: config.rate_limit_initiate_per_window,
            window,
        },
        RateLimitPolicy {
            max_requests: config.rate_limit_complete_per_window,
            window,
        },
        RateLimitPolicy {
            max_requests: config.rate_limit_merchant_per_window,
            window,
        },
    ));

    Ok(Arc::new(AppState {
        config,
        catalog,
        inventory,
        orders,
        checkout,
        rate_limiter,
        merchant_validator,
        attempt_ledger,
        gateways,
        event_sender,
    }))
}

/// Builds the HTTP router over the shared state.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .merge(handlers::checkout::checkout_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
