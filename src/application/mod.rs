//! # Application Layer
//!
//! Resilience services and the aggregation engine that composes them.
//!
//! - [`context`]: correlation ids carried through every provider call
//! - [`error`]: classified provider failures
//! - [`clock`]: injectable time source
//! - [`services`]: circuit breaker, rate limiter, cache manager, aggregator

pub mod clock;
pub mod context;
pub mod error;
pub mod maintenance;
pub mod services;
