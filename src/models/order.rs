use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment gateway families supported by the checkout core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Direct-charge card/wallet network
    Card,
    /// Redirect-based approval flow
    Paypal,
    /// Device-attested wallet requiring merchant domain validation
    ApplePay,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Card => "card",
            GatewayKind::Paypal => "paypal",
            GatewayKind::ApplePay => "applepay",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "card" => Ok(GatewayKind::Card),
            "paypal" => Ok(GatewayKind::Paypal),
            "applepay" | "apple_pay" => Ok(GatewayKind::ApplePay),
            other => Err(format!("unknown payment gateway: {}", other)),
        }
    }
}

/// Fulfillment lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    /// Payment captured, ready for fulfillment
    Processing,
    Completed,
    Failed,
}

/// Money lifecycle of an order, independent of fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    /// A transient gateway failure; the same provisional order may be retried
    FailedRetryable,
}

/// Progress of a single checkout attempt against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Initiated,
    Validated,
    OrderCreated,
    GatewayPending,
    Captured,
    Completed,
    Declined,
    Failed,
    FailedRetryable,
}

impl CheckoutState {
    /// Whether `next` is a legal successor of the current state.
    pub fn can_transition(self, next: CheckoutState) -> bool {
        use CheckoutState::*;
        matches!(
            (self, next),
            (Initiated, Validated)
                | (Validated, OrderCreated)
                | (OrderCreated, GatewayPending)
                | (OrderCreated, FailedRetryable)
                | (GatewayPending, Captured)
                | (GatewayPending, Declined)
                | (GatewayPending, FailedRetryable)
                | (Captured, Completed)
                | (Declined, Failed)
                | (FailedRetryable, GatewayPending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CheckoutState::Completed | CheckoutState::Failed)
    }
}

/// Gateway-specific completion details, one closed variant per gateway so the
/// completion path is exhaustively checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gateway", rename_all = "snake_case")]
pub enum PaymentMetadata {
    Card {
        charge_id: String,
        network: String,
    },
    Paypal {
        capture_id: String,
        approval_token: String,
    },
    ApplePay {
        transaction_id: String,
        attestation_hash: String,
    },
}

/// A line item frozen at order creation; later catalog changes never alter it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    /// Unit price in minor currency units
    pub unit_price: i64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// An order record. Created by the provisional order manager before any
/// gateway contact; mutated only by completion/rollback afterwards; never
/// deleted (failures are retained for audit).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub client_id: String,
    pub gateway: GatewayKind,
    pub items: Vec<OrderItem>,
    /// All amounts in minor currency units
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub discount: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub checkout_state: CheckoutState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_metadata: Option<PaymentMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Whether this order currently holds a stock reservation
    pub stock_reserved: bool,
    #[serde(skip)]
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The monetary identity every order must satisfy from creation onwards.
    pub fn totals_consistent(&self) -> bool {
        self.total == self.subtotal + self.shipping_cost + self.tax - self.discount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_kind_round_trips_from_path_segment() {
        assert_eq!(GatewayKind::from_str("card").unwrap(), GatewayKind::Card);
        assert_eq!(
            GatewayKind::from_str("paypal").unwrap(),
            GatewayKind::Paypal
        );
        assert_eq!(
            GatewayKind::from_str("applepay").unwrap(),
            GatewayKind::ApplePay
        );
        assert_eq!(
            GatewayKind::from_str("APPLEPAY").unwrap(),
            GatewayKind::ApplePay
        );
        assert!(GatewayKind::from_str("bitcoin").is_err());
    }

    #[test]
    fn checkout_state_allows_happy_path() {
        use CheckoutState::*;
        let path = [
            Initiated,
            Validated,
            OrderCreated,
            GatewayPending,
            Captured,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{:?} -> {:?} should be legal",
                pair[0],
                pair[1]
            );
        }
        assert!(Completed.is_terminal());
    }

    #[test]
    fn checkout_state_allows_retry_after_transient_failure() {
        use CheckoutState::*;
        assert!(GatewayPending.can_transition(FailedRetryable));
        assert!(FailedRetryable.can_transition(GatewayPending));
        assert!(!FailedRetryable.is_terminal());
    }

    #[test]
    fn checkout_state_rejects_skips_and_reversals() {
        use CheckoutState::*;
        assert!(!Initiated.can_transition(GatewayPending));
        assert!(!Completed.can_transition(GatewayPending));
        assert!(!Declined.can_transition(Captured));
        assert!(!Failed.can_transition(GatewayPending));
    }

    #[test]
    fn line_total_multiplies_price_by_quantity() {
        let item = OrderItem {
            product_id: "A".into(),
            name: "Widget".into(),
            unit_price: 500,
            quantity: 2,
            image_url: None,
        };
        assert_eq!(item.line_total(), 1000);
    }
}
