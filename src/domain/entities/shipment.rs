//! # Shipment Input
//!
//! The caller-facing quote request and its normalized form.
//!
//! [`ShipmentInput`] is what the route layer hands to the aggregator.
//! [`ShipmentInput::normalize`] validates it and produces a
//! [`NormalizedShipment`], the only shape providers ever see and the source
//! of the cache fingerprint.
//!
//! # Examples
//!
//! ```
//! use ship_quote::domain::entities::shipment::{Address, Parcel, ShipmentInput};
//!
//! let input = ShipmentInput::new(
//!     Address::new("1 Main St", "Springfield", " 12345 ", "us"),
//!     Address::new("9 High St", "London", "sw1a 1aa", "GB"),
//!     Parcel::new(30.0, 20.0, 10.0, 1500.0),
//! );
//!
//! let normalized = input.normalize().unwrap();
//! assert_eq!(normalized.from().country(), "US");
//! assert_eq!(normalized.to().postal_code(), "SW1A 1AA");
//! assert_eq!(normalized.fingerprint().len(), 64);
//! ```

use crate::domain::errors::{ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// A postal address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient or sender name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Street line.
    pub street1: String,
    /// City or locality.
    pub city: String,
    /// State, province or region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Postal or ZIP code.
    pub postal_code: String,
    /// ISO-3166 alpha-2 country code.
    pub country: String,
}

impl Address {
    /// Creates an address with the required fields.
    #[must_use]
    pub fn new(
        street1: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            street1: street1.into(),
            city: city.into(),
            state: None,
            postal_code: postal_code.into(),
            country: country.into(),
        }
    }

    /// Sets the state or region.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the contact name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the postal code.
    #[must_use]
    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    /// Returns the country code.
    #[must_use]
    pub fn country(&self) -> &str {
        &self.country
    }

    fn normalize(&self, prefix: &str) -> ValidationResult<Self> {
        let street1 = required(&self.street1, prefix, "street1")?;
        let city = required(&self.city, prefix, "city")?;
        let postal_code = required(&self.postal_code, prefix, "postal_code")?.to_ascii_uppercase();
        let country = required(&self.country, prefix, "country")?.to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::new(
                format!("{prefix}.country"),
                "must be an ISO-3166 alpha-2 code",
            ));
        }

        Ok(Self {
            name: optional(self.name.as_deref()),
            street1,
            city,
            state: optional(self.state.as_deref()).map(|s| s.to_ascii_uppercase()),
            postal_code,
            country,
        })
    }
}

/// Package dimensions (centimetres) and weight (grams).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    /// Length in centimetres.
    pub length_cm: f64,
    /// Width in centimetres.
    pub width_cm: f64,
    /// Height in centimetres.
    pub height_cm: f64,
    /// Weight in grams.
    pub weight_g: f64,
}

impl Parcel {
    /// Creates a parcel.
    #[must_use]
    pub fn new(length_cm: f64, width_cm: f64, height_cm: f64, weight_g: f64) -> Self {
        Self {
            length_cm,
            width_cm,
            height_cm,
            weight_g,
        }
    }

    fn normalize(&self) -> ValidationResult<Self> {
        Ok(Self {
            length_cm: positive(self.length_cm, "parcel.length_cm")?,
            width_cm: positive(self.width_cm, "parcel.width_cm")?,
            height_cm: positive(self.height_cm, "parcel.height_cm")?,
            weight_g: positive(self.weight_g, "parcel.weight_g")?,
        })
    }
}

/// A quote request as received from the route layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentInput {
    /// Origin address.
    pub from: Address,
    /// Destination address.
    pub to: Address,
    /// Package being shipped.
    pub parcel: Parcel,
    /// Warehouse allocation reference, required by allocation-based providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    /// Preferred service level, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

impl ShipmentInput {
    /// Creates a shipment input without optional identifiers.
    #[must_use]
    pub fn new(from: Address, to: Address, parcel: Parcel) -> Self {
        Self {
            from,
            to,
            parcel,
            allocation_id: None,
            service_type: None,
        }
    }

    /// Sets the allocation identifier.
    #[must_use]
    pub fn with_allocation_id(mut self, allocation_id: impl Into<String>) -> Self {
        self.allocation_id = Some(allocation_id.into());
        self
    }

    /// Sets the preferred service type.
    #[must_use]
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Validates and normalizes the request.
    ///
    /// Text fields are trimmed, country/postal/state codes upper-cased and
    /// parcel measurements rounded to two decimals.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first malformed field.
    pub fn normalize(&self) -> ValidationResult<NormalizedShipment> {
        Ok(NormalizedShipment {
            from: self.from.normalize("from")?,
            to: self.to.normalize("to")?,
            parcel: self.parcel.normalize()?,
            allocation_id: optional(self.allocation_id.as_deref()),
            service_type: optional(self.service_type.as_deref()),
        })
    }
}

/// A validated, canonical shipment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedShipment {
    from: Address,
    to: Address,
    parcel: Parcel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_type: Option<String>,
}

impl NormalizedShipment {
    /// Returns the origin address.
    #[must_use]
    pub fn from(&self) -> &Address {
        &self.from
    }

    /// Returns the destination address.
    #[must_use]
    pub fn to(&self) -> &Address {
        &self.to
    }

    /// Returns the parcel.
    #[must_use]
    pub fn parcel(&self) -> &Parcel {
        &self.parcel
    }

    /// Returns the allocation identifier, if present.
    #[must_use]
    pub fn allocation_id(&self) -> Option<&str> {
        self.allocation_id.as_deref()
    }

    /// Returns the requested service type, if present.
    #[must_use]
    pub fn service_type(&self) -> Option<&str> {
        self.service_type.as_deref()
    }

    /// Deterministic hex SHA-256 over the canonical JSON encoding.
    ///
    /// Two inputs that normalize to the same shipment share a fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        // Serializing plain strings and finite floats cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        digest
            .iter()
            .fold(String::with_capacity(64), |mut out, byte| {
                let _ = write!(out, "{byte:02x}");
                out
            })
    }
}

fn required(value: &str, prefix: &str, field: &str) -> ValidationResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::new(
            format!("{prefix}.{field}"),
            "must not be empty",
        ))
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn positive(value: f64, field: &str) -> ValidationResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok((value * 100.0).round() / 100.0)
    } else {
        Err(ValidationError::new(field, "must be a positive number"))
    }
}
