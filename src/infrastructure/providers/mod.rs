//! # Provider Integrations
//!
//! Carrier adapters and the registry the aggregator draws from.
//!
//! - [`traits`]: the [`ProviderAdapter`] port
//! - [`error`]: raw adapter failures prior to classification
//! - [`http_client`]: shared reqwest wrapper
//! - [`http_provider`]: generic JSON adapter
//! - [`registry`]: ordered provider settings and adapters

pub mod error;
pub mod http_client;
pub mod http_provider;
pub mod registry;
pub mod traits;

pub use error::{AdapterError, AdapterResult};
pub use http_client::HttpClient;
pub use http_provider::HttpProviderAdapter;
pub use registry::{ProviderRegistry, ProviderSettings, RegisteredProvider};
pub use traits::{ProviderAdapter, ProviderRequirements};
