//! Shipping-quote collaborator and destination zone rules.
//!
//! Quotes are keyed by shipping option and destination zone; the
//! free-shipping threshold is applied here, not by callers. Tax is a
//! zone-detection rule over the destination address, expressed in basis
//! points of the subtotal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::ServiceError;

/// Destination address as submitted with the checkout request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DestinationAddress {
    #[validate(length(min = 1))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    #[validate(length(min = 1))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShippingZone {
    Domestic,
    Regional,
    International,
}

/// Zone detection applied to the destination address.
pub fn zone_for(address: &DestinationAddress, home_country: &str, regional: &[String]) -> ShippingZone {
    let country = address.country.to_ascii_lowercase();
    if country == home_country.to_ascii_lowercase() {
        ShippingZone::Domestic
    } else if regional.iter().any(|c| *c == country) {
        ShippingZone::Regional
    } else {
        ShippingZone::International
    }
}

/// Tax rates in basis points of the subtotal, selected by zone.
#[derive(Debug, Clone, Copy)]
pub struct TaxRates {
    pub domestic_bps: i64,
    pub regional_bps: i64,
    pub international_bps: i64,
}

impl TaxRates {
    pub fn tax_for(&self, zone: ShippingZone, subtotal: i64) -> i64 {
        let bps = match zone {
            ShippingZone::Domestic => self.domestic_bps,
            ShippingZone::Regional => self.regional_bps,
            ShippingZone::International => self.international_bps,
        };
        subtotal * bps / 10_000
    }
}

#[async_trait]
pub trait ShippingQuoter: Send + Sync {
    /// Shipping cost in minor units for the option, zone, and subtotal.
    async fn quote(
        &self,
        option: &str,
        zone: ShippingZone,
        subtotal: i64,
    ) -> Result<i64, ServiceError>;
}

/// Flat-rate quoter with zone multipliers and a free-shipping threshold.
pub struct FlatRateShipping {
    pub standard_rate: i64,
    pub express_rate: i64,
    pub free_threshold: i64,
}

#[async_trait]
impl ShippingQuoter for FlatRateShipping {
    async fn quote(
        &self,
        option: &str,
        zone: ShippingZone,
        subtotal: i64,
    ) -> Result<i64, ServiceError> {
        let base = match option {
            "standard" => self.standard_rate,
            "express" => self.express_rate,
            other => {
                return Err(ServiceError::ValidationError(format!(
                    "unknown shipping option: {}",
                    other
                )))
            }
        };

        if subtotal >= self.free_threshold {
            return Ok(0);
        }

        let cost = match zone {
            ShippingZone::Domestic => base,
            ShippingZone::Regional => base * 2,
            ShippingZone::International => base * 4,
        };
        Ok(cost)
    }
}
