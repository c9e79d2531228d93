//! Catalog and promotion collaborators.
//!
//! The checkout core never trusts client-supplied prices; it re-reads the
//! authoritative price for every line item through [`CatalogProvider`]. The
//! storage engine behind the catalog is out of scope, so the contract is a
//! trait with an in-process implementation used by tests and single-node
//! deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Authoritative product data as the catalog currently knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    /// Current unit price in minor currency units
    pub unit_price: i64,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Looks up a product by id; `Ok(None)` means the id is unknown.
    async fn get_product(&self, product_id: &str) -> Result<Option<CatalogProduct>, ServiceError>;
}

/// In-process catalog keyed by product id.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: DashMap<String, CatalogProduct>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product: CatalogProduct) {
        self.products.insert(product.id.clone(), product);
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn get_product(&self, product_id: &str) -> Result<Option<CatalogProduct>, ServiceError> {
        Ok(self.products.get(product_id).map(|p| p.clone()))
    }
}

/// Active promotion/coupon context; absent promotions mean zero discount.
#[async_trait]
pub trait PromotionProvider: Send + Sync {
    /// Discount in minor units for this client and computed subtotal.
    async fn discount(&self, client_id: &str, subtotal: i64) -> Result<i64, ServiceError>;
}

/// The no-promotions default.
#[derive(Default)]
pub struct NoPromotions;

#[async_trait]
impl PromotionProvider for NoPromotions {
    async fn discount(&self, _client_id: &str, _subtotal: i64) -> Result<i64, ServiceError> {
        Ok(0)
    }
}
