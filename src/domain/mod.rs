//! # Domain Layer
//!
//! Pure data types with validation and no I/O.
//!
//! - [`value_objects`]: identifiers, money, timestamps
//! - [`entities`]: shipment requests, rate quotes, purchases
//! - [`errors`]: input validation failures

pub mod entities;
pub mod errors;
pub mod value_objects;
