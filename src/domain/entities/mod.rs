//! # Domain Entities
//!
//! Request and result shapes exchanged with the route layer and providers.
//!
//! - [`ShipmentInput`] / [`NormalizedShipment`]: quote request
//! - [`RateQuote`]: normalized rate from one provider
//! - [`PurchaseChoice`] / [`PurchaseResult`]: label purchase

pub mod purchase;
pub mod rate_quote;
pub mod shipment;

pub use purchase::{PurchaseChoice, PurchaseResult, RequestField};
pub use rate_quote::{RateQuote, RateQuoteBuilder};
pub use shipment::{Address, NormalizedShipment, Parcel, ShipmentInput};
