#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use checkout_api::{
    app, build_state,
    catalog::CatalogProduct,
    config::AppConfig,
    events::{process_events, AnalyticsSink, EventSender, RecordingSink},
    services::inventory::InventoryStore,
    AppState,
};

/// Fully wired application over in-process stores, driven through the router.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub sink: Arc<RecordingSink>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let sender = EventSender::new(tx);
        let sink = Arc::new(RecordingSink::new());
        let dyn_sink: Arc<dyn AnalyticsSink> = sink.clone();
        tokio::spawn(process_events(rx, dyn_sink));

        let state = build_state(config, sender).expect("state");
        Self {
            router: app(state.clone()),
            state,
            sink,
        }
    }

    pub async fn seed_product(&self, id: &str, name: &str, unit_price: i64, stock: i64) {
        self.state.catalog.upsert(CatalogProduct {
            id: id.to_string(),
            name: name.to_string(),
            unit_price,
            image_url: None,
        });
        self.state.inventory.set_available(id, stock).await;
    }

    pub async fn stock(&self, id: &str) -> Option<i64> {
        self.state.inventory.available(id).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, client: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-client-id", client)
            .body(Body::from(body.to_string()))
            .expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }

    pub async fn get(&self, uri: &str, client: &str) -> Response {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("x-client-id", client)
            .body(Body::empty())
            .expect("request");
        self.router.clone().oneshot(request).await.expect("response")
    }

    /// Lets the spawned event worker drain before sink assertions.
    pub async fn settle_events(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Standard initiate payload for the reference scenario.
pub fn initiate_payload(product_id: &str, quantity: u32, client_total: i64, key: &str) -> Value {
    serde_json::json!({
        "items": [{"productId": product_id, "quantity": quantity}],
        "shippingOption": "standard",
        "destinationAddress": {
            "line1": "1 Main St",
            "city": "Springfield",
            "region": "CA",
            "postalCode": "90210",
            "country": "US"
        },
        "clientTotal": client_total,
        "idempotencyKey": key
    })
}
