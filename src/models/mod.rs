pub mod attempt;
pub mod order;

pub use attempt::{hash_token, PaymentAttempt};
pub use order::{
    CheckoutState, GatewayKind, Order, OrderItem, OrderStatus, PaymentMetadata, PaymentStatus,
};
