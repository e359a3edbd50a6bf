//! # Rate Quote Entity
//!
//! A normalized shipping rate offered by one provider.
//!
//! Quotes are immutable once built. The aggregator ranks them by
//! [`RateQuote::amount`] and caches them per provider and request fingerprint.
//!
//! # Examples
//!
//! ```
//! use ship_quote::domain::entities::rate_quote::RateQuote;
//! use ship_quote::domain::value_objects::{Money, ProviderId};
//!
//! let price = Money::new(1250, "USD").unwrap();
//! let quote = RateQuote::builder(ProviderId::new("easypost"), "rate_1", "shp_1", price)
//!     .carrier("USPS")
//!     .service("Priority")
//!     .estimated_delivery_days(2)
//!     .build();
//!
//! assert_eq!(quote.amount(), 1250);
//! assert_eq!(quote.currency(), "USD");
//! ```

use crate::domain::value_objects::{Money, ProviderId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A rate quote from a single provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuote {
    provider: ProviderId,
    carrier: String,
    service: String,
    rate_id: String,
    shipment_id: String,
    price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_delivery_days: Option<u32>,
}

impl RateQuote {
    /// Starts building a quote with its identifying fields and price.
    #[must_use]
    pub fn builder(
        provider: ProviderId,
        rate_id: impl Into<String>,
        shipment_id: impl Into<String>,
        price: Money,
    ) -> RateQuoteBuilder {
        RateQuoteBuilder::new(provider, rate_id, shipment_id, price)
    }

    /// Returns the provider that produced this quote.
    #[inline]
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Returns the carrier name (`"UPS"`, `"Royal Mail"`).
    #[inline]
    #[must_use]
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// Returns the service level name.
    #[inline]
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the provider's rate identifier, used when purchasing.
    #[inline]
    #[must_use]
    pub fn rate_id(&self) -> &str {
        &self.rate_id
    }

    /// Returns the provider's shipment identifier.
    #[inline]
    #[must_use]
    pub fn shipment_id(&self) -> &str {
        &self.shipment_id
    }

    /// Returns the price.
    #[inline]
    #[must_use]
    pub fn price(&self) -> &Money {
        &self.price
    }

    /// Returns the amount in minor currency units.
    #[inline]
    #[must_use]
    pub fn amount(&self) -> i64 {
        self.price.minor_units()
    }

    /// Returns the currency code.
    #[inline]
    #[must_use]
    pub fn currency(&self) -> &str {
        self.price.currency()
    }

    /// Returns the estimated transit time in days, if known.
    #[inline]
    #[must_use]
    pub fn estimated_delivery_days(&self) -> Option<u32> {
        self.estimated_delivery_days
    }
}

impl fmt::Display for RateQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RateQuote({} {} {} @ {})",
            self.provider, self.carrier, self.service, self.price
        )
    }
}

/// Builder for [`RateQuote`].
#[derive(Debug, Clone)]
pub struct RateQuoteBuilder {
    provider: ProviderId,
    carrier: String,
    service: String,
    rate_id: String,
    shipment_id: String,
    price: Money,
    estimated_delivery_days: Option<u32>,
}

impl RateQuoteBuilder {
    /// Creates a builder with identifying fields and price.
    #[must_use]
    pub fn new(
        provider: ProviderId,
        rate_id: impl Into<String>,
        shipment_id: impl Into<String>,
        price: Money,
    ) -> Self {
        Self {
            provider,
            carrier: String::new(),
            service: String::new(),
            rate_id: rate_id.into(),
            shipment_id: shipment_id.into(),
            price,
            estimated_delivery_days: None,
        }
    }

    /// Sets the carrier name.
    #[must_use]
    pub fn carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = carrier.into();
        self
    }

    /// Sets the service level.
    #[must_use]
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the estimated transit time.
    #[must_use]
    pub fn estimated_delivery_days(mut self, days: u32) -> Self {
        self.estimated_delivery_days = Some(days);
        self
    }

    /// Builds the quote.
    #[must_use]
    pub fn build(self) -> RateQuote {
        RateQuote {
            provider: self.provider,
            carrier: self.carrier,
            service: self.service,
            rate_id: self.rate_id,
            shipment_id: self.shipment_id,
            price: self.price,
            estimated_delivery_days: self.estimated_delivery_days,
        }
    }
}
