//! # HTTP Provider Adapter
//!
//! Generic JSON adapter for providers exposing the normalized rate API.
//!
//! # Wire Format
//!
//! ```text
//! POST {base_url}/rates      {"shipment": NormalizedShipment}
//!   200 {"rates": [{"id", "shipment_id", "carrier", "service",
//!                   "amount": "12.50", "currency": "USD", "delivery_days"?}]}
//!
//! POST {base_url}/purchases  PurchaseChoice
//!   200 {"shipment_id", "label_url", "tracking_code"?, "tracking_url"?}
//! ```
//!
//! Amounts arrive as decimal major units and are converted to integer minor
//! units. Requests carry `Authorization: Bearer <api_key>` when configured
//! and the caller's `X-Correlation-Id`.

use crate::application::context::CallContext;
use crate::domain::entities::{NormalizedShipment, PurchaseChoice, PurchaseResult, RateQuote};
use crate::domain::value_objects::{Money, ProviderId};
use crate::infrastructure::providers::error::{AdapterError, AdapterResult};
use crate::infrastructure::providers::http_client::HttpClient;
use crate::infrastructure::providers::registry::ProviderSettings;
use crate::infrastructure::providers::traits::{ProviderAdapter, ProviderRequirements};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct RatesRequest<'a> {
    shipment: &'a NormalizedShipment,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: Vec<WireRate>,
}

#[derive(Debug, Deserialize)]
struct WireRate {
    id: String,
    shipment_id: String,
    #[serde(default)]
    carrier: String,
    #[serde(default)]
    service: String,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    delivery_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PurchaseResponse {
    shipment_id: String,
    label_url: String,
    #[serde(default)]
    tracking_code: Option<String>,
    #[serde(default)]
    tracking_url: Option<String>,
}

/// Adapter speaking the normalized JSON rate API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProviderAdapter {
    settings: ProviderSettings,
    base_url: String,
    client: HttpClient,
}

impl HttpProviderAdapter {
    /// Creates an adapter from provider settings.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Other` if the settings lack a base URL or the
    /// HTTP client cannot be created.
    pub fn new(settings: ProviderSettings, default_timeout_ms: u64) -> AdapterResult<Self> {
        let base_url = settings
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                AdapterError::other(format!("provider {} has no base_url", settings.id))
            })?;
        let client = HttpClient::new(settings.timeout_ms.unwrap_or(default_timeout_ms))?;
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    /// Returns the API root requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn to_quote(&self, rate: WireRate) -> AdapterResult<RateQuote> {
        let price = Money::from_major(rate.amount, &rate.currency)
            .map_err(|e| AdapterError::decode(format!("rate {}: {e}", rate.id)))?;
        let mut builder = RateQuote::builder(self.settings.id.clone(), rate.id, rate.shipment_id, price)
            .carrier(rate.carrier)
            .service(rate.service);
        if let Some(days) = rate.delivery_days {
            builder = builder.estimated_delivery_days(days);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    fn provider_id(&self) -> &ProviderId {
        &self.settings.id
    }

    fn requirements(&self) -> ProviderRequirements {
        ProviderRequirements::none()
            .with_quote(self.settings.quote_requires.iter().copied())
            .with_purchase(self.settings.purchase_requires.iter().copied())
    }

    async fn quote(
        &self,
        shipment: &NormalizedShipment,
        ctx: &CallContext,
    ) -> AdapterResult<Vec<RateQuote>> {
        let url = format!("{}/rates", self.base_url);
        tracing::debug!(
            provider = %self.settings.id,
            correlation_id = %ctx.correlation_id(),
            %url,
            "requesting rates"
        );
        let response: RatesResponse = self
            .client
            .post_json(
                &url,
                &RatesRequest { shipment },
                self.settings.credentials(),
                ctx.correlation_id(),
            )
            .await?;

        response
            .rates
            .into_iter()
            .map(|rate| self.to_quote(rate))
            .collect()
    }

    async fn buy(&self, choice: &PurchaseChoice, ctx: &CallContext) -> AdapterResult<PurchaseResult> {
        let url = format!("{}/purchases", self.base_url);
        tracing::debug!(
            provider = %self.settings.id,
            correlation_id = %ctx.correlation_id(),
            rate_id = %choice.rate_id,
            "purchasing label"
        );
        let response: PurchaseResponse = self
            .client
            .post_json(&url, choice, self.settings.credentials(), ctx.correlation_id())
            .await?;

        Ok(PurchaseResult {
            provider: self.settings.id.clone(),
            shipment_id: response.shipment_id,
            label_url: response.label_url,
            tracking_code: response.tracking_code,
            tracking_url: response.tracking_url,
        })
    }
}
