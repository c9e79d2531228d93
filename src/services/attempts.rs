//! Append-only payment attempt ledger.
//!
//! Every initiation and completion attempt is recorded here with any payment
//! token reduced to a one-way hash. The fraud guard and rate-limit tooling
//! read it; nothing mutates or deletes rows within the request lifecycle
//! (retention is an external concern).

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::models::{hash_token, GatewayKind, PaymentAttempt};

#[derive(Default)]
pub struct PaymentAttemptLedger {
    attempts: RwLock<Vec<PaymentAttempt>>,
}

impl PaymentAttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one attempt. `raw_token` is hashed before it is stored; the
    /// raw value never reaches the ledger.
    #[instrument(skip(self, raw_token, failure_reason))]
    pub async fn record(
        &self,
        client_id: &str,
        gateway: GatewayKind,
        amount: i64,
        success: bool,
        raw_token: Option<&str>,
        failure_reason: Option<String>,
    ) {
        let attempt = PaymentAttempt {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            gateway,
            amount,
            success,
            token_hash: raw_token.map(hash_token),
            failure_reason,
            created_at: Utc::now(),
        };
        self.attempts.write().await.push(attempt);
    }

    /// Failed attempts by this client within the lookback window.
    pub async fn failed_attempts_since(&self, client_id: &str, window_secs: u64) -> usize {
        let cutoff = Utc::now() - Duration::seconds(window_secs as i64);
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.client_id == client_id && !a.success && a.created_at >= cutoff)
            .count()
    }

    /// Full attempt history for a client, oldest first.
    pub async fn attempts_for_client(&self, client_id: &str) -> Vec<PaymentAttempt> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.client_id == client_id)
            .cloned()
            .collect()
    }
}
