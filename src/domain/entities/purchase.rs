//! # Purchase Entities
//!
//! The caller's choice of rate to buy and the label that comes back.
//!
//! [`RequestField`] names the optional identifiers some providers insist on
//! (allocation-based warehouse integrations need an allocation id and a
//! service type); adapters declare them and the aggregator checks them before
//! any network call is made.

use crate::domain::value_objects::ProviderId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An optional request identifier a provider may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestField {
    /// Provider-side shipment identifier.
    ShipmentId,
    /// Warehouse allocation reference.
    AllocationId,
    /// Service level / type.
    ServiceType,
}

impl RequestField {
    /// Returns the wire name of the field.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ShipmentId => "shipment_id",
            Self::AllocationId => "allocation_id",
            Self::ServiceType => "service_type",
        }
    }
}

impl fmt::Display for RequestField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The rate a caller wants to buy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseChoice {
    /// Provider that issued the rate.
    pub provider: ProviderId,
    /// Rate identifier from the chosen [`RateQuote`](super::rate_quote::RateQuote).
    pub rate_id: String,
    /// Provider-side shipment identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
    /// Warehouse allocation reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    /// Service level / type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl PurchaseChoice {
    /// Creates a choice with only the provider and rate id.
    #[must_use]
    pub fn new(provider: ProviderId, rate_id: impl Into<String>) -> Self {
        Self {
            provider,
            rate_id: rate_id.into(),
            shipment_id: None,
            allocation_id: None,
            service_type: None,
        }
    }

    /// Sets the shipment id.
    #[must_use]
    pub fn with_shipment_id(mut self, id: impl Into<String>) -> Self {
        self.shipment_id = Some(id.into());
        self
    }

    /// Sets the allocation id.
    #[must_use]
    pub fn with_allocation_id(mut self, id: impl Into<String>) -> Self {
        self.allocation_id = Some(id.into());
        self
    }

    /// Sets the service type.
    #[must_use]
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Returns the non-blank value of an optional field.
    #[must_use]
    pub fn field(&self, field: RequestField) -> Option<&str> {
        let value = match field {
            RequestField::ShipmentId => self.shipment_id.as_deref(),
            RequestField::AllocationId => self.allocation_id.as_deref(),
            RequestField::ServiceType => self.service_type.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// A purchased label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    /// Provider that sold the label.
    pub provider: ProviderId,
    /// Provider-side shipment identifier.
    pub shipment_id: String,
    /// Where the label document can be downloaded.
    pub label_url: String,
    /// Carrier tracking code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    /// Public tracking page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,
}

impl fmt::Display for PurchaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PurchaseResult({} {})", self.provider, self.shipment_id)?;
        if let Some(code) = &self.tracking_code {
            write!(f, " tracking={}", code)?;
        }
        Ok(())
    }
}
