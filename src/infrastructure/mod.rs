//! # Infrastructure Layer
//!
//! Adapters to external systems.
//!
//! - [`providers`]: HTTP carrier adapters and the provider registry
//! - [`cache`]: in-memory and Redis key/value stores

pub mod cache;
pub mod providers;
