//! # Provider Registry
//!
//! Ordered set of configured providers and their adapters.
//!
//! Registration order is the order quotes are merged in before ranking, so
//! ties in price resolve deterministically.

use crate::domain::entities::RequestField;
use crate::domain::value_objects::ProviderId;
use crate::infrastructure::providers::error::AdapterResult;
use crate::infrastructure::providers::http_provider::HttpProviderAdapter;
use crate::infrastructure::providers::traits::ProviderAdapter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Static configuration of one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider identifier.
    pub id: ProviderId,
    /// API root, e.g. `https://api.example.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer credential.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Disabled providers are never called.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Optional providers are queried only when credentialed.
    #[serde(default)]
    pub optional: bool,
    /// Per-call timeout; falls back to the aggregation default.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Identifiers the provider needs to quote.
    #[serde(default)]
    pub quote_requires: Vec<RequestField>,
    /// Identifiers the provider needs to sell a label.
    #[serde(default)]
    pub purchase_requires: Vec<RequestField>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderSettings {
    /// Creates enabled, non-optional settings with no endpoint.
    #[must_use]
    pub fn new(id: impl Into<ProviderId>) -> Self {
        Self {
            id: id.into(),
            base_url: None,
            api_key: None,
            enabled: true,
            optional: false,
            timeout_ms: None,
            quote_requires: Vec::new(),
            purchase_requires: Vec::new(),
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Enables or disables the provider.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marks the provider optional.
    #[must_use]
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the purchase requirements.
    #[must_use]
    pub fn with_purchase_requires(mut self, fields: impl IntoIterator<Item = RequestField>) -> Self {
        self.purchase_requires = fields.into_iter().collect();
        self
    }

    /// Sets the quote requirements.
    #[must_use]
    pub fn with_quote_requires(mut self, fields: impl IntoIterator<Item = RequestField>) -> Self {
        self.quote_requires = fields.into_iter().collect();
        self
    }

    /// Returns the API key if it is non-blank.
    #[must_use]
    pub fn credentials(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Returns true if a non-blank API key is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }
}

// Keeps the API key out of logs.
impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .field("optional", &self.optional)
            .field("timeout_ms", &self.timeout_ms)
            .field("quote_requires", &self.quote_requires)
            .field("purchase_requires", &self.purchase_requires)
            .finish()
    }
}

/// A provider's settings together with its adapter.
#[derive(Debug, Clone)]
pub struct RegisteredProvider {
    settings: ProviderSettings,
    adapter: Arc<dyn ProviderAdapter>,
}

impl RegisteredProvider {
    /// Returns the provider id.
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.settings.id
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Returns the adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }
}

/// Providers in registration order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an [`HttpProviderAdapter`] for every provider with a base URL.
    ///
    /// Providers without a base URL are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn from_settings(
        settings: impl IntoIterator<Item = ProviderSettings>,
        default_timeout_ms: u64,
    ) -> AdapterResult<Self> {
        let mut registry = Self::new();
        for provider in settings {
            if provider.base_url.is_none() {
                tracing::warn!(provider = %provider.id, "provider has no base_url, skipping");
                continue;
            }
            let adapter = HttpProviderAdapter::new(provider.clone(), default_timeout_ms)?;
            registry.register(provider, Arc::new(adapter));
        }
        Ok(registry)
    }

    /// Adds a provider, replacing any existing entry with the same id in place.
    pub fn register(&mut self, settings: ProviderSettings, adapter: Arc<dyn ProviderAdapter>) {
        let entry = RegisteredProvider { settings, adapter };
        match self.providers.iter_mut().find(|p| p.id() == entry.id()) {
            Some(existing) => *existing = entry,
            None => self.providers.push(entry),
        }
    }

    /// Looks up a provider.
    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Iterates providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.iter()
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
