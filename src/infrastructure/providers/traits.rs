//! # Provider Adapter Trait
//!
//! Port definition for carrier integrations.
//!
//! Adapters are opaque: they receive a normalized shipment or purchase choice
//! and return normalized quotes or labels. Carrier-specific mapping lives
//! behind this trait; resilience (caching, rate limiting, circuit breaking,
//! timeouts) lives in the aggregator around it.
//!
//! # Examples
//!
//! ```
//! use ship_quote::domain::entities::RequestField;
//! use ship_quote::infrastructure::providers::traits::ProviderRequirements;
//!
//! let veeqo = ProviderRequirements::none()
//!     .with_purchase([RequestField::AllocationId, RequestField::ServiceType]);
//! assert!(veeqo.quote.is_empty());
//! assert_eq!(veeqo.purchase.len(), 2);
//! ```

use crate::application::context::CallContext;
use crate::domain::entities::{NormalizedShipment, PurchaseChoice, PurchaseResult, RateQuote, RequestField};
use crate::domain::value_objects::ProviderId;
use crate::infrastructure::providers::error::AdapterResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional request identifiers an adapter needs per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequirements {
    /// Fields the quote request must carry.
    #[serde(default)]
    pub quote: Vec<RequestField>,
    /// Fields the purchase choice must carry.
    #[serde(default)]
    pub purchase: Vec<RequestField>,
}

impl ProviderRequirements {
    /// No requirements.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the quote requirements.
    #[must_use]
    pub fn with_quote(mut self, fields: impl IntoIterator<Item = RequestField>) -> Self {
        self.quote = fields.into_iter().collect();
        self
    }

    /// Sets the purchase requirements.
    #[must_use]
    pub fn with_purchase(mut self, fields: impl IntoIterator<Item = RequestField>) -> Self {
        self.purchase = fields.into_iter().collect();
        self
    }

    /// Returns the first quote requirement the shipment lacks.
    #[must_use]
    pub fn missing_for_quote(&self, shipment: &NormalizedShipment) -> Option<RequestField> {
        self.quote.iter().copied().find(|field| {
            let value = match field {
                RequestField::AllocationId => shipment.allocation_id(),
                RequestField::ServiceType => shipment.service_type(),
                // Shipments get their id from the provider; config rejects this.
                RequestField::ShipmentId => None,
            };
            value.is_none()
        })
    }

    /// Returns the first purchase requirement the choice lacks.
    #[must_use]
    pub fn missing_for_purchase(&self, choice: &PurchaseChoice) -> Option<RequestField> {
        self.purchase
            .iter()
            .copied()
            .find(|field| choice.field(*field).is_none())
    }
}

/// A carrier integration.
///
/// Implementations must be safe to call concurrently. They report raw
/// failures as [`AdapterError`](super::error::AdapterError); classification
/// happens in the aggregator.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + fmt::Debug {
    /// Returns the provider this adapter talks to.
    fn provider_id(&self) -> &ProviderId;

    /// Returns the identifiers this adapter needs per operation.
    fn requirements(&self) -> ProviderRequirements {
        ProviderRequirements::none()
    }

    /// Requests rates for a shipment.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`](super::error::AdapterError) describing
    /// the transport, status or decode failure.
    async fn quote(
        &self,
        shipment: &NormalizedShipment,
        ctx: &CallContext,
    ) -> AdapterResult<Vec<RateQuote>>;

    /// Buys the chosen rate.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`](super::error::AdapterError) describing
    /// the transport, status or decode failure.
    async fn buy(&self, choice: &PurchaseChoice, ctx: &CallContext) -> AdapterResult<PurchaseResult>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{Address, Parcel, ShipmentInput};

    fn shipment(allocation: Option<&str>) -> NormalizedShipment {
        let address = Address::new("1 Main St", "Leeds", "ls1 1aa", "gb");
        let mut input = ShipmentInput::new(address.clone(), address, Parcel::new(10.0, 10.0, 10.0, 500.0));
        if let Some(id) = allocation {
            input = input.with_allocation_id(id);
        }
        input.normalize().unwrap()
    }

    #[test]
    fn quote_requirements() {
        let reqs = ProviderRequirements::none().with_quote([RequestField::AllocationId]);
        assert_eq!(reqs.missing_for_quote(&shipment(None)), Some(RequestField::AllocationId));
        assert_eq!(reqs.missing_for_quote(&shipment(Some("alloc-1"))), None);
    }

    #[test]
    fn purchase_requirements_report_first_missing_field() {
        let reqs = ProviderRequirements::none()
            .with_purchase([RequestField::AllocationId, RequestField::ServiceType]);
        let choice = PurchaseChoice::new(ProviderId::new("veeqo"), "r1");
        assert_eq!(reqs.missing_for_purchase(&choice), Some(RequestField::AllocationId));

        let choice = choice.with_allocation_id("a1");
        assert_eq!(reqs.missing_for_purchase(&choice), Some(RequestField::ServiceType));

        let choice = choice.with_service_type("standard");
        assert_eq!(reqs.missing_for_purchase(&choice), None);
    }
}
