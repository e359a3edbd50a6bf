//! # Value Objects
//!
//! Immutable types with validation and domain semantics.
//!
//! - [`ProviderId`], [`CorrelationId`]: string-based identifiers
//! - [`Money`]: integer minor-unit amount plus currency
//! - [`Timestamp`]: UTC instant

pub mod ids;
pub mod money;
pub mod timestamp;

pub use ids::{CorrelationId, ProviderId};
pub use money::{Money, MoneyError};
pub use timestamp::Timestamp;
