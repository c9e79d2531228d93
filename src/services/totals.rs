//! Order total recomputation from authoritative data.
//!
//! The calculator is a pure function over the catalog, shipping, and
//! promotion collaborators: it holds no state of its own, so it is safe to
//! run at both initiation and completion time. Client-declared amounts never
//! enter the computation; they are only compared afterwards.

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::catalog::{CatalogProvider, PromotionProvider};
use crate::errors::ServiceError;
use crate::models::OrderItem;
use crate::shipping::{zone_for, DestinationAddress, ShippingQuoter, TaxRates};

/// Server-computed money breakdown, all in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsBreakdown {
    pub subtotal: i64,
    pub shipping_cost: i64,
    pub tax: i64,
    pub discount: i64,
    pub total: i64,
}

pub struct OrderTotalCalculator {
    catalog: Arc<dyn CatalogProvider>,
    shipping: Arc<dyn ShippingQuoter>,
    promotions: Arc<dyn PromotionProvider>,
    tax_rates: TaxRates,
    home_country: String,
    regional_countries: Vec<String>,
}

impl OrderTotalCalculator {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        shipping: Arc<dyn ShippingQuoter>,
        promotions: Arc<dyn PromotionProvider>,
        tax_rates: TaxRates,
        home_country: String,
        regional_countries: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            shipping,
            promotions,
            tax_rates,
            home_country,
            regional_countries,
        }
    }

    /// Recomputes the breakdown for the requested line items and returns the
    /// frozen item snapshots alongside it. Fails with `ProductNotFound` for
    /// any unknown product id.
    #[instrument(skip(self, items, destination))]
    pub async fn calculate(
        &self,
        items: &[(String, u32)],
        shipping_option: &str,
        destination: &DestinationAddress,
        client_id: &str,
    ) -> Result<(TotalsBreakdown, Vec<OrderItem>), ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one line item is required".to_string(),
            ));
        }

        let mut snapshots = Vec::with_capacity(items.len());
        let mut subtotal: i64 = 0;

        for (product_id, quantity) in items {
            if *quantity == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity must be at least 1 for product {}",
                    product_id
                )));
            }
            let product = self
                .catalog
                .get_product(product_id)
                .await?
                .ok_or_else(|| ServiceError::ProductNotFound(product_id.clone()))?;

            let item = OrderItem {
                product_id: product.id,
                name: product.name,
                unit_price: product.unit_price,
                quantity: *quantity,
                image_url: product.image_url,
            };
            subtotal += item.line_total();
            snapshots.push(item);
        }

        let zone = zone_for(destination, &self.home_country, &self.regional_countries);
        let shipping_cost = self.shipping.quote(shipping_option, zone, subtotal).await?;
        let tax = self.tax_rates.tax_for(zone, subtotal);
        let discount = self.promotions.discount(client_id, subtotal).await?;

        let breakdown = TotalsBreakdown {
            subtotal,
            shipping_cost,
            tax,
            discount,
            total: subtotal + shipping_cost + tax - discount,
        };
        Ok((breakdown, snapshots))
    }
}

/// Compares the client-declared total against the server-computed one.
///
/// The tolerance exists only to absorb benign minor-unit rounding; anything
/// beyond it is treated by callers as a tampering signal, never silently
/// corrected.
pub fn amounts_match(client_total: i64, server_total: i64, tolerance: i64) -> bool {
    (client_total - server_total).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogProduct, InMemoryCatalog, NoPromotions};
    use crate::shipping::FlatRateShipping;

    fn calculator() -> OrderTotalCalculator {
        let catalog = InMemoryCatalog::new();
        catalog.upsert(CatalogProduct {
            id: "A".into(),
            name: "Widget".into(),
            unit_price: 500,
            image_url: Some("https://cdn.example/widget.png".into()),
        });
        OrderTotalCalculator::new(
            Arc::new(catalog),
            Arc::new(FlatRateShipping {
                standard_rate: 300,
                express_rate: 1_500,
                free_threshold: 10_000,
            }),
            Arc::new(NoPromotions),
            TaxRates {
                domestic_bps: 1_000,
                regional_bps: 650,
                international_bps: 0,
            },
            "US".into(),
            vec!["ca".into(), "mx".into()],
        )
    }

    fn us_address() -> DestinationAddress {
        DestinationAddress {
            line1: "1 Main St".into(),
            line2: None,
            city: "Springfield".into(),
            region: Some("CA".into()),
            postal_code: "90210".into(),
            country: "US".into(),
        }
    }

    #[tokio::test]
    async fn computes_the_reference_breakdown() {
        let calc = calculator();
        let (breakdown, items) = calc
            .calculate(&[("A".into(), 2)], "standard", &us_address(), "client-1")
            .await
            .unwrap();

        assert_eq!(breakdown.subtotal, 1_000);
        assert_eq!(breakdown.shipping_cost, 300);
        assert_eq!(breakdown.tax, 100);
        assert_eq!(breakdown.discount, 0);
        assert_eq!(breakdown.total, 1_400);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Widget");
        assert_eq!(items[0].unit_price, 500);
    }

    #[tokio::test]
    async fn unknown_product_fails() {
        let calc = calculator();
        let err = calc
            .calculate(&[("MISSING".into(), 1)], "standard", &us_address(), "c")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ProductNotFound(id) if id == "MISSING"));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let calc = calculator();
        let err = calc
            .calculate(&[("A".into(), 0)], "standard", &us_address(), "c")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let calc = calculator();
        let err = calc
            .calculate(&[], "standard", &us_address(), "c")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn amount_validation_respects_tolerance() {
        assert!(amounts_match(1_400, 1_400, 0));
        assert!(amounts_match(1_399, 1_400, 1));
        assert!(amounts_match(1_401, 1_400, 1));
        assert!(!amounts_match(1_300, 1_400, 1));
        assert!(!amounts_match(1_402, 1_400, 1));
    }
}
