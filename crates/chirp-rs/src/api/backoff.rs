//! Retry delays for reconnects and throttled requests.
//!
//! [`BackoffPolicy::next`] is a pure function of the consecutive-failure
//! count and the kind of failure. It never decides when to give up; the
//! search client and the stream session each keep their own ceiling.

use std::time::Duration;

/// How a failure should be backed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network fault or server error.
    Transient,
    /// Throttled; carries the server's retry-after hint.
    RateLimited(Duration),
}

/// How the delay grows between consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    /// `initial + step * (attempt - 1)`.
    Linear(Duration),
    /// `initial * factor^(attempt - 1)`. Factors below 1.0 are treated as 1.0.
    Exponential(f64),
}

/// Configuration for retry delays.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for transient delays.
    pub max: Duration,
    /// Growth between attempts.
    pub growth: Growth,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::rest()
    }
}

impl BackoffPolicy {
    /// Exponential backoff with the given bounds (factor 2).
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            growth: Growth::Exponential(2.0),
        }
    }

    /// Linear backoff with the given step and cap.
    pub fn linear(step: Duration, max: Duration) -> Self {
        Self {
            initial: step,
            max,
            growth: Growth::Linear(step),
        }
    }

    /// REST retries: 500ms doubling up to 8s.
    pub fn rest() -> Self {
        Self::exponential(Duration::from_millis(500), Duration::from_secs(8))
    }

    /// TCP/IP level stream faults: +250ms per attempt up to 16s.
    pub fn network() -> Self {
        Self::linear(Duration::from_millis(250), Duration::from_secs(16))
    }

    /// HTTP errors on the stream endpoint: 5s doubling up to 320s.
    pub fn http_error() -> Self {
        Self::exponential(Duration::from_secs(5), Duration::from_secs(320))
    }

    /// Stream rate limiting: 60s doubling up to 16 minutes.
    pub fn rate_limit() -> Self {
        Self::exponential(Duration::from_secs(60), Duration::from_secs(960))
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    pub fn next(&self, attempt: u32, kind: FailureKind) -> Duration {
        let computed = self.growth_delay(attempt);
        match kind {
            FailureKind::Transient => computed,
            FailureKind::RateLimited(hint) => computed.max(hint),
        }
    }

    fn growth_delay(&self, attempt: u32) -> Duration {
        let steps = attempt.max(1) - 1;
        let cap = self.max.max(self.initial);
        let delay = match self.growth {
            Growth::Linear(step) => step
                .checked_mul(steps)
                .and_then(|extra| self.initial.checked_add(extra))
                .unwrap_or(cap),
            Growth::Exponential(factor) => {
                let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
                let secs = self.initial.as_secs_f64() * factor.powf(f64::from(steps));
                if secs.is_finite() && secs < cap.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    cap
                }
            }
        };
        delay.min(cap)
    }
}
