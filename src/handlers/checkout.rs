//! HTTP surface of the checkout core.
//!
//! All amounts in request and response bodies are integer minor currency
//! units. The gateway path segment selects the adapter; unknown gateways are
//! a validation error before any work happens.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ApiError;
use crate::handlers::common::{
    created_response, extract_client_key, map_service_error, success_response, validate_input,
};
use crate::models::{GatewayKind, Order};
use crate::rate_limiter::EndpointClass;
use crate::services::checkout::InitiateCommand;
use crate::shipping::DestinationAddress;
use crate::AppState;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout/:gateway/initiate", post(initiate_checkout))
        .route("/checkout/:gateway/complete", post(complete_checkout))
        .route("/checkout/:gateway/return", get(gateway_return))
        .route("/checkout/:gateway/validate-merchant", post(validate_merchant))
        .route("/checkout/orders/:id", get(get_order))
}

// Request/Response DTOs

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineItemRequest {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutRequest {
    #[validate(length(min = 1, message = "At least one line item is required"))]
    pub items: Vec<LineItemRequest>,
    #[validate(length(min = 1))]
    pub shipping_option: String,
    #[validate]
    pub destination_address: DestinationAddress,
    /// Client-declared total in minor units; compared, never trusted
    pub client_total: i64,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCheckoutRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub gateway_reference: String,
    #[serde(default)]
    pub attestation_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCheckoutResponse {
    pub order_id: Uuid,
    pub status: crate::models::OrderStatus,
    pub payment_status: crate::models::PaymentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ValidateMerchantRequest {
    #[serde(rename = "validationURL")]
    #[validate(length(min = 1))]
    pub validation_url: String,
    #[validate(length(min = 1))]
    pub domain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateMerchantResponse {
    pub merchant_session: serde_json::Value,
}

fn parse_gateway(raw: &str) -> Result<GatewayKind, ApiError> {
    GatewayKind::from_str(raw).map_err(ApiError::BadRequest)
}

/// Initiate a checkout: recompute totals, reserve stock, create the
/// provisional order, and open the gateway transaction.
async fn initiate_checkout(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<InitiateCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = parse_gateway(&gateway)?;
    let client_key = extract_client_key(&headers);
    state
        .rate_limiter
        .check(&client_key, EndpointClass::Initiate)?;

    validate_input(&payload)?;
    for item in &payload.items {
        validate_input(item)?;
    }

    let command = InitiateCommand {
        items: payload
            .items
            .iter()
            .map(|item| (item.product_id.clone(), item.quantity))
            .collect(),
        shipping_option: payload.shipping_option,
        destination: payload.destination_address,
        client_total: payload.client_total,
        idempotency_key: payload.idempotency_key,
    };

    let outcome = state
        .checkout
        .initiate(gateway, command, &client_key)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(InitiateCheckoutResponse {
        order_id: outcome.order.id,
        order_number: outcome.order.order_number.clone(),
        gateway_token: outcome.gateway_token,
        approval_url: outcome.approval_url,
    }))
}

/// Complete a checkout attempt with a gateway reference. The gateway is
/// re-queried; the reference alone proves nothing.
async fn complete_checkout(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CompleteCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = parse_gateway(&gateway)?;
    let client_key = extract_client_key(&headers);
    state
        .rate_limiter
        .check(&client_key, EndpointClass::Complete)?;

    validate_input(&payload)?;

    let order = state
        .checkout
        .complete(
            gateway,
            payload.order_id,
            &payload.gateway_reference,
            payload.attestation_token.as_deref(),
        )
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CompleteCheckoutResponse {
        order_id: order.id,
        status: order.status,
        payment_status: order.payment_status,
    }))
}

/// Return leg of the redirect flow. Always answers with a redirect; payment
/// truth is established server-side before the confirmation page is chosen.
async fn gateway_return(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ReturnParams>,
) -> Result<Redirect, ApiError> {
    let gateway = parse_gateway(&gateway)?;
    let client_key = extract_client_key(&headers);
    state
        .rate_limiter
        .check(&client_key, EndpointClass::Complete)?;

    let base = state.config.frontend_base_url.trim_end_matches('/');
    match state.checkout.handle_return(gateway, &params.token).await {
        Ok(order) => Ok(Redirect::to(&format!(
            "{}/checkout/confirmation?order={}",
            base, order.order_number
        ))),
        Err(err) => {
            let reason = match &err {
                crate::errors::ServiceError::OrderNotFound(_) => "unknown_order",
                crate::errors::ServiceError::GatewayDeclined(_) => "payment_declined",
                crate::errors::ServiceError::GatewayTransient(_) => "gateway_unavailable",
                _ => "payment_incomplete",
            };
            Ok(Redirect::to(&format!(
                "{}/checkout/error?reason={}",
                base, reason
            )))
        }
    }
}

/// Merchant session validation for device-attested gateways.
async fn validate_merchant(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ValidateMerchantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = parse_gateway(&gateway)?;
    if gateway != GatewayKind::ApplePay {
        return Err(ApiError::BadRequest(format!(
            "{} does not use merchant validation",
            gateway
        )));
    }

    let client_key = extract_client_key(&headers);
    state
        .rate_limiter
        .check(&client_key, EndpointClass::MerchantValidate)?;

    validate_input(&payload)?;

    let session = state
        .merchant_validator
        .validate_session(&payload.validation_url, &payload.domain)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ValidateMerchantResponse {
        merchant_session: session,
    }))
}

/// Order snapshot lookup.
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    state
        .checkout
        .get_order(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", id)))
}
