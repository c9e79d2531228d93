//! Integration tests for the device-attested gateway: merchant domain
//! validation and the attested checkout path.

mod common;

use common::{initiate_payload, response_json, TestApp};

use checkout_api::config::AppConfig;
use serde_json::json;

fn configured() -> AppConfig {
    let mut config = AppConfig::default();
    config.apple_merchant_id = Some("merchant.com.example.shop".to_string());
    config.apple_merchant_domain = Some("shop.example.com".to_string());
    config
}

#[tokio::test]
async fn validate_merchant_without_credentials_is_501() {
    let app = TestApp::new().await;

    let response = app
        .post_json(
            "/checkout/applepay/validate-merchant",
            json!({
                "validationURL": "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "domain": "shop.example.com"
            }),
            "buyer-ap1",
        )
        .await;
    assert_eq!(response.status(), 501);
}

#[tokio::test]
async fn validate_merchant_rejects_foreign_domains() {
    let app = TestApp::with_config(configured()).await;

    // Wrong requesting domain.
    let response = app
        .post_json(
            "/checkout/applepay/validate-merchant",
            json!({
                "validationURL": "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "domain": "attacker.example.net"
            }),
            "buyer-ap2",
        )
        .await;
    assert_eq!(response.status(), 403);

    // Validation URL outside the payment network.
    let response = app
        .post_json(
            "/checkout/applepay/validate-merchant",
            json!({
                "validationURL": "https://evil-apple.com/paymentservices/startSession",
                "domain": "shop.example.com"
            }),
            "buyer-ap2",
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn validate_merchant_issues_a_session() {
    let app = TestApp::with_config(configured()).await;

    let response = app
        .post_json(
            "/checkout/applepay/validate-merchant",
            json!({
                "validationURL": "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "domain": "shop.example.com"
            }),
            "buyer-ap3",
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["merchantSession"]["domainName"], "shop.example.com");
    assert_eq!(
        body["merchantSession"]["merchantIdentifier"],
        "merchant.com.example.shop"
    );
}

#[tokio::test]
async fn validate_merchant_only_exists_for_device_attested_gateways() {
    let app = TestApp::with_config(configured()).await;

    let response = app
        .post_json(
            "/checkout/card/validate-merchant",
            json!({
                "validationURL": "https://apple-pay-gateway.apple.com/paymentservices/startSession",
                "domain": "shop.example.com"
            }),
            "buyer-ap4",
        )
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn attested_checkout_requires_merchant_credentials() {
    let app = TestApp::new().await;
    app.seed_product("A", "Widget", 500, 5).await;

    let response = app
        .post_json(
            "/checkout/applepay/initiate",
            initiate_payload("A", 1, 850, "ap-key-1"),
            "buyer-ap5",
        )
        .await;
    assert_eq!(response.status(), 403);
    assert_eq!(app.stock("A").await, Some(5));
}

#[tokio::test]
async fn attested_checkout_round_trip() {
    let app = TestApp::with_config(configured()).await;
    app.seed_product("A", "Widget", 500, 5).await;

    let body = response_json(
        app.post_json(
            "/checkout/applepay/initiate",
            initiate_payload("A", 2, 1_400, "ap-key-2"),
            "buyer-ap6",
        )
        .await,
    )
    .await;
    let order_id = body["orderId"].as_str().unwrap().to_string();
    let token = body["gatewayToken"].as_str().unwrap().to_string();

    // The attestation token from the device is mandatory.
    let missing = app
        .post_json(
            "/checkout/applepay/complete",
            json!({"orderId": order_id, "gatewayReference": token}),
            "buyer-ap6",
        )
        .await;
    assert_eq!(missing.status(), 400);

    let response = app
        .post_json(
            "/checkout/applepay/complete",
            json!({
                "orderId": order_id,
                "gatewayReference": token,
                "attestationToken": "device-payment-blob"
            }),
            "buyer-ap6",
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["paymentStatus"], "paid");

    // The ledger kept a hash of the attestation token, never the raw value.
    let attempts = app
        .state
        .attempt_ledger
        .attempts_for_client("client:buyer-ap6")
        .await;
    let success = attempts.iter().find(|a| a.success && a.token_hash.is_some());
    let hash = success
        .and_then(|a| a.token_hash.as_deref())
        .expect("hashed attestation");
    assert_ne!(hash, "device-payment-blob");
    assert!(!hash.contains("device"));
}
