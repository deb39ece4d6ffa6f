//! Rate-limit headers.

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Wait suggested when a throttled response carries no usable header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Rate limit information from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed in the window.
    pub limit: Option<u32>,
    /// Requests left in the current window.
    pub remaining: Option<u32>,
    /// Unix timestamp when the window resets.
    pub reset: Option<u64>,
    /// `Retry-After`, in seconds.
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };
        Self {
            limit: number("x-rate-limit-limit").and_then(|v: u64| u32::try_from(v).ok()),
            remaining: number("x-rate-limit-remaining").and_then(|v: u64| u32::try_from(v).ok()),
            reset: number("x-rate-limit-reset"),
            retry_after: number("retry-after"),
        }
    }

    /// Whether the window is used up (`remaining == 0`).
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// How long to wait before retrying: `Retry-After` if present, else the
    /// time until the window resets, else [`DEFAULT_RETRY_AFTER`].
    pub fn retry_after(&self) -> Duration {
        if let Some(secs) = self.retry_after {
            return Duration::from_secs(secs);
        }
        self.time_until_reset().unwrap_or(DEFAULT_RETRY_AFTER)
    }

    fn time_until_reset(&self) -> Option<Duration> {
        let reset = self.reset?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs();
        (reset > now).then(|| Duration::from_secs(reset - now))
    }
}
