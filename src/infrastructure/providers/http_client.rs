//! # HTTP Client Utilities
//!
//! Shared HTTP client for provider adapters.
//!
//! This module provides a reqwest wrapper with:
//! - A per-provider request timeout
//! - Bearer credentials and `X-Correlation-Id` propagation
//! - JSON serialization/deserialization
//! - Failures reported as [`AdapterError`], including `Retry-After` hints
//!
//! # Examples
//!
//! ```
//! use ship_quote::infrastructure::providers::http_client::HttpClient;
//!
//! let client = HttpClient::new(5_000).unwrap();
//! assert_eq!(client.timeout_ms(), 5_000);
//! ```

use crate::domain::value_objects::CorrelationId;
use crate::infrastructure::providers::error::{AdapterError, AdapterResult};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Header carrying the caller's correlation id to the provider.
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP client wrapper for provider adapters.
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client.
    client: Client,
    /// Request timeout in milliseconds.
    timeout_ms: u64,
}

impl HttpClient {
    /// Creates a new HTTP client with the specified timeout.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Other` if the client cannot be created.
    pub fn new(timeout_ms: u64) -> AdapterResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AdapterError::other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, timeout_ms })
    }

    /// Returns the configured timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Makes a POST request with a JSON body and deserializes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Transport` if the request fails,
    /// `AdapterError::Status` for non-2xx responses and
    /// `AdapterError::Decode` if the response cannot be parsed.
    pub async fn post_json<T, B>(
        &self,
        url: &str,
        body: &B,
        api_key: Option<&str>,
        correlation_id: &CorrelationId,
    ) -> AdapterResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .post(url)
            .header(CORRELATION_HEADER, correlation_id.as_str())
            .json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        handle_response(response).await
    }
}

/// Checks the status and deserializes the JSON body.
async fn handle_response<T: DeserializeOwned>(response: Response) -> AdapterResult<T> {
    let status = response.status();

    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| AdapterError::decode(format!("failed to parse response: {e}")));
    }

    let retry_after_ms = retry_after_ms(response.headers(), Utc::now());
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.chars().take(MAX_ERROR_BODY_CHARS).collect()
    };

    Err(match retry_after_ms {
        Some(ms) => AdapterError::status_with_retry(status.as_u16(), message, ms),
        None => AdapterError::status(status.as_u16(), message),
    })
}

/// Maps a reqwest error to an AdapterError.
fn map_reqwest_error(error: reqwest::Error) -> AdapterError {
    if error.is_timeout() {
        AdapterError::timed_out(format!("request timed out: {error}"))
    } else if error.is_connect() {
        AdapterError::connect_failed(format!("connection failed: {error}"))
    } else if error.is_decode() {
        AdapterError::decode(error.to_string())
    } else {
        AdapterError::transport(format!("HTTP request failed: {error}"))
    }
}

/// Parses `Retry-After` as delay-seconds or an HTTP date.
fn retry_after_ms(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs.saturating_mul(1_000));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(now).num_milliseconds();
    Some(u64::try_from(wait).unwrap_or(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn new_client() {
        let client = HttpClient::new(5000);
        assert!(client.is_ok());
        assert_eq!(client.unwrap().timeout_ms(), 5000);
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(retry_after_ms(&headers("3"), Utc::now()), Some(3_000));
        assert_eq!(retry_after_ms(&HeaderMap::new(), Utc::now()), None);
        assert_eq!(retry_after_ms(&headers("soon"), Utc::now()), None);
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let value = headers("Thu, 01 Jan 2026 12:00:05 GMT");
        assert_eq!(retry_after_ms(&value, now), Some(5_000));

        let past = headers("Thu, 01 Jan 2026 11:59:00 GMT");
        assert_eq!(retry_after_ms(&past, now), Some(0));
    }
}
