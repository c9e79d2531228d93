use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::order::GatewayKind;

/// One payment attempt, as recorded in the append-only ledger. Sensitive
/// payment tokens are stored only as a one-way hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub client_id: String,
    pub gateway: GatewayKind,
    /// Attempted amount in minor currency units
    pub amount: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 hex digest of a raw payment token.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_deterministic_and_opaque() {
        let raw = "tok_4242424242424242";
        let a = hash_token(raw);
        let b = hash_token(raw);
        assert_eq!(a, b);
        assert_ne!(a, raw);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("4242"));
    }

    #[test]
    fn different_tokens_hash_differently() {
        assert_ne!(hash_token("tok_a"), hash_token("tok_b"));
    }
}
