//! # Sliding Window Rate Limiter
//!
//! Admits at most `max_requests` per key within any trailing `window_ms`.
//!
//! Each key owns a [`RateWindow`] of `(timestamp, count)` entries in
//! non-decreasing timestamp order. An entry is counted while
//! `now - timestamp < window_ms`. Admissions at the same millisecond are
//! coalesced into one entry.
//!
//! Windows live in a [`DashMap`]; the read-then-append of one check runs
//! under the key's shard lock, so concurrent checks on one key serialize
//! while other shards proceed in parallel.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use ship_quote::application::clock::ManualClock;
//! use ship_quote::application::services::rate_limiter::{
//!     RateLimitConfig, RateLimitKey, SlidingWindowRateLimiter,
//! };
//!
//! let limiter = SlidingWindowRateLimiter::new(
//!     RateLimitConfig::new(1_000, 2),
//!     Arc::new(ManualClock::new(0)),
//! );
//! let key = RateLimitKey::provider("shippo");
//!
//! assert!(limiter.is_allowed(&key).allowed);
//! assert!(limiter.is_allowed(&key).allowed);
//! let denied = limiter.is_allowed(&key);
//! assert!(!denied.allowed);
//! assert_eq!(denied.retry_after_secs, Some(1));
//! ```

use crate::application::clock::Clock;
use crate::application::maintenance::MaintenanceHandle;
use crate::domain::value_objects::Timestamp;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Sliding window limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per window.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

impl RateLimitConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }
}

/// Key a rate window is tracked under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Outbound calls to one provider.
    #[must_use]
    pub fn provider(id: impl fmt::Display) -> Self {
        Self(format!("provider:{id}"))
    }

    /// Requests from one client.
    #[must_use]
    pub fn client(id: impl fmt::Display) -> Self {
        Self(format!("client:{id}"))
    }

    /// Requests to one route.
    #[must_use]
    pub fn route(path: impl fmt::Display) -> Self {
        Self(format!("route:{path}"))
    }

    /// Returns the key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Configured maximum per window.
    pub limit: u32,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// When the oldest counted request leaves the window.
    pub reset_time: Timestamp,
    /// Whole seconds to wait before retrying; set only when denied.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitInfo {
    /// Returns the retry hint in milliseconds.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_secs.map(|secs| secs.saturating_mul(1_000))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowEntry {
    timestamp_ms: u64,
    count: u32,
}

/// Admissions recorded for one key.
#[derive(Debug, Default)]
pub struct RateWindow {
    entries: VecDeque<WindowEntry>,
}

impl RateWindow {
    fn prune(&mut self, now: u64, max_age_ms: u64) {
        while self
            .entries
            .front()
            .is_some_and(|e| now.saturating_sub(e.timestamp_ms) >= max_age_ms)
        {
            self.entries.pop_front();
        }
    }

    fn live<'a>(&'a self, now: u64, window_ms: u64) -> impl Iterator<Item = &'a WindowEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| now.saturating_sub(e.timestamp_ms) < window_ms)
    }

    fn count(&self, now: u64, window_ms: u64) -> u32 {
        self.live(now, window_ms).map(|e| e.count).sum()
    }

    fn oldest(&self, now: u64, window_ms: u64) -> Option<u64> {
        self.live(now, window_ms).map(|e| e.timestamp_ms).next()
    }

    fn record(&mut self, now: u64) {
        match self.entries.back_mut() {
            Some(last) if last.timestamp_ms == now => last.count += 1,
            _ => self.entries.push_back(WindowEntry {
                timestamp_ms: now,
                count: 1,
            }),
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-key sliding window rate limiter.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: DashMap<String, RateWindow>,
}

impl SlidingWindowRateLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: DashMap::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Checks the key and records the request if admitted.
    pub fn is_allowed(&self, key: &RateLimitKey) -> RateLimitInfo {
        let now = self.clock.now_ms();
        let window_ms = self.config.window_ms;
        let max = self.config.max_requests;

        let mut window = self.windows.entry(key.as_str().to_owned()).or_default();
        window.prune(now, window_ms);
        let count = window.count(now, window_ms);

        if count < max {
            window.record(now);
            let oldest = window.oldest(now, window_ms).unwrap_or(now);
            RateLimitInfo {
                allowed: true,
                limit: max,
                remaining: max.saturating_sub(count).saturating_sub(1),
                reset_time: Timestamp::from_clock_millis(oldest.saturating_add(window_ms)),
                retry_after_secs: None,
            }
        } else {
            let oldest = window.oldest(now, window_ms).unwrap_or(now);
            let reset_at = oldest.saturating_add(window_ms);
            let wait_ms = reset_at.saturating_sub(now);
            RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                reset_time: Timestamp::from_clock_millis(reset_at),
                retry_after_secs: Some(wait_ms.div_ceil(1_000).max(1)),
            }
        }
    }

    /// Reports the key's state without recording anything.
    #[must_use]
    pub fn info(&self, key: &RateLimitKey) -> RateLimitInfo {
        let now = self.clock.now_ms();
        let window_ms = self.config.window_ms;
        let max = self.config.max_requests;

        let (count, oldest) = self
            .windows
            .get(key.as_str())
            .map(|w| (w.count(now, window_ms), w.oldest(now, window_ms)))
            .unwrap_or((0, None));
        let reset_at = oldest.unwrap_or(now).saturating_add(window_ms);
        let allowed = count < max;

        RateLimitInfo {
            allowed,
            limit: max,
            remaining: max.saturating_sub(count),
            reset_time: Timestamp::from_clock_millis(reset_at),
            retry_after_secs: (!allowed)
                .then(|| reset_at.saturating_sub(now).div_ceil(1_000).max(1)),
        }
    }

    /// Forgets every admission recorded for the key.
    pub fn reset(&self, key: &RateLimitKey) {
        self.windows.remove(key.as_str());
    }

    /// Drops entries older than twice the window and any emptied keys.
    ///
    /// Returns the number of keys removed.
    pub fn compact(&self) -> usize {
        let now = self.clock.now_ms();
        let max_age = self.config.window_ms.saturating_mul(2);
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.prune(now, max_age);
            !window.is_empty()
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "compacted rate limit windows");
        }
        removed
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Runs [`compact`](Self::compact) every `window_ms` until the handle is
    /// dropped or the limiter is gone.
    #[must_use]
    pub fn spawn_compaction(self: &Arc<Self>) -> MaintenanceHandle {
        let period = Duration::from_millis(self.config.window_ms.max(1));
        let limiter: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.compact();
                    }
                    None => break,
                }
            }
        });
        MaintenanceHandle::new("rate_limit_compaction", handle)
    }
}
