pub mod checkout;
pub mod common;

use axum::{response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe, excluded from rate limiting.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
