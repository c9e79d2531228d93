//! Domain events and the analytics dispatch boundary.
//!
//! Services emit events through an mpsc-backed [`EventSender`] after their
//! state change is committed; a spawned [`process_events`] task drains the
//! channel into an injectable [`AnalyticsSink`]. Sink failures never roll
//! back or delay the request that produced the event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::GatewayKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CheckoutInitiated {
        order_id: Uuid,
        gateway: GatewayKind,
        total: i64,
    },
    OrderCreated(Uuid),
    PaymentCaptured {
        order_id: Uuid,
        gateway: GatewayKind,
        reference: String,
        amount: i64,
    },
    PaymentFailed {
        order_id: Uuid,
        gateway: GatewayKind,
        reason: String,
        retryable: bool,
    },
    OrderCompleted {
        order_id: Uuid,
        order_number: String,
        gateway: GatewayKind,
        total: i64,
    },
    StockReleased {
        order_id: Uuid,
    },
    AmountMismatchRejected {
        client_id: String,
        client_total: i64,
        server_total: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Hands the event to the dispatch task. A full or closed channel is
    /// logged and dropped; reporting must not fail the payment path.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "dropping analytics event");
        }
    }
}

/// Conversion/analytics reporting collaborator.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn report(&self, event: &Event);
}

/// Default sink: structured log lines only.
#[derive(Default)]
pub struct TracingSink;

#[async_trait]
impl AnalyticsSink for TracingSink {
    async fn report(&self, event: &Event) {
        info!(event = ?event, "analytics event");
    }
}

/// Test sink that records every event it sees.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn count_matching(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn report(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Drains the event channel into the sink until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, sink: std::sync::Arc<dyn AnalyticsSink>) {
    while let Some(event) = rx.recv().await {
        sink.report(&event).await;
    }
}
