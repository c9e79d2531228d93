use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error payload returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details (validation errors in dev mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: i64,
    },

    #[error("Order total mismatch: client declared {client_total}, server computed {server_total}")]
    AmountMismatch {
        client_total: i64,
        server_total: i64,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Merchant validation failed: {0}")]
    MerchantValidation(String),

    #[error("Merchant credentials not configured")]
    MerchantNotConfigured,

    #[error("Gateway error: {0}")]
    GatewayTransient(String),

    #[error("Payment declined: {0}")]
    GatewayDeclined(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_)
            | Self::ProductNotFound(_)
            | Self::InsufficientStock { .. }
            | Self::AmountMismatch { .. }
            | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MerchantValidation(_) => StatusCode::FORBIDDEN,
            Self::MerchantNotConfigured => StatusCode::NOT_IMPLEMENTED,
            Self::GatewayTransient(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Gateway and infrastructure errors are reduced to generic messages in
    /// release builds; business-rule errors always carry their full message.
    pub fn response_message(&self) -> String {
        match self {
            Self::GatewayTransient(_) if !cfg!(debug_assertions) => {
                "Payment gateway temporarily unavailable".to_string()
            }
            Self::InternalError(_) if !cfg!(debug_assertions) => {
                "Internal server error".to_string()
            }
            Self::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        service_error_response(&self)
    }
}

/// API error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::ServiceError(service_error) => return service_error_response(service_error),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

fn service_error_response(error: &ServiceError) -> Response {
    let status = error.status_code();
    let err = ErrorResponse {
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        message: error.response_message(),
        details: None,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let mut response = (status, Json(err)).into_response();
    if let ServiceError::RateLimitExceeded { retry_after_secs } = error {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
