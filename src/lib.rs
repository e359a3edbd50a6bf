//! # ship-quote
//!
//! Shipping rate aggregation across multiple carrier APIs, with per-provider
//! circuit breaking, local rate limiting and quote caching.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 QuoteAggregationEngine                   │
//! │   quote_all ──▶ one task per eligible provider           │
//! │   purchase  ──▶ exactly one provider                     │
//! └──────┬──────────────┬───────────────┬──────────────┬─────┘
//!        │              │               │              │
//!   CacheManager   RateLimiter   CircuitBreaker   ProviderAdapter
//!        │         (sliding       (per provider)   (HTTP / custom)
//!   CacheStore      window)
//!   memory | redis
//! ```
//!
//! - [`domain`]: shipments, rate quotes, purchases, ids and money
//! - [`application`]: resilience services, error taxonomy, the engine
//! - [`infrastructure`]: provider adapters and cache stores
//! - [`config`]: layered configuration and engine wiring
//! - [`telemetry`]: `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use ship_quote::application::context::RequestContext;
//! use ship_quote::config::AppConfig;
//! use ship_quote::domain::entities::{Address, Parcel, ShipmentInput};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! let engine = config.build_engine().await?;
//!
//! let shipment = ShipmentInput::new(
//!     Address::new("1 Main St", "Austin", "78701", "US"),
//!     Address::new("9 Elm St", "Denver", "80202", "US"),
//!     Parcel::new(20.0, 15.0, 10.0, 1_200.0),
//! );
//! let quotes = engine.quote_all(&shipment, &RequestContext::generate()).await?;
//! if let Some(best) = quotes.first() {
//!     println!("{} {} via {}", best.amount(), best.currency(), best.provider());
//! }
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;

pub use application::context::RequestContext;
pub use application::error::{ErrorKind, ProviderError, ProviderResult};
pub use application::services::QuoteAggregationEngine;
pub use config::AppConfig;
