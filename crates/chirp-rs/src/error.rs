//! Error taxonomy shared by the authorization flow, search client and
//! stream session.
//!
//! Retry decisions are made inside [`SearchClient`](crate::api::search::SearchClient)
//! and [`StreamSession`](crate::api::stream::StreamSession). What reaches the
//! caller is either a terminal "give up" ([`ChirpError::RateLimitExceeded`],
//! [`ChirpError::TransientNetwork`], [`ChirpError::StreamExhausted`]) or a
//! signal that new credentials are needed ([`ChirpError::needs_new_credentials`]).

use std::time::Duration;

use thiserror::Error;

/// Errors produced by `chirp-rs`.
#[derive(Error, Debug)]
pub enum ChirpError {
    /// Missing or invalid configuration (empty credential field, empty
    /// filter, misuse of a session). Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote service rejected the credential (401/403).
    #[error("credential rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// The remote service throttled the request.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Still throttled after the configured number of retries. `attempts`
    /// is that configured bound, as for the other give-up errors.
    #[error("rate limit still in effect after {attempts} retries")]
    RateLimitExceeded { attempts: u32 },

    /// Network faults (timeouts, resets, 5xx) persisted past the configured
    /// retry bound (`attempts`).
    #[error("network failure persisted after {attempts} retries: {message}")]
    TransientNetwork { attempts: u32, message: String },

    /// The stream could not be re-established within the reconnect bound.
    #[error("stream gave up after {attempts} consecutive failed reconnects")]
    StreamExhausted { attempts: u32 },

    /// The user cancelled the PIN authorization (empty PIN or a quit word).
    #[error("authorization cancelled by user")]
    AuthCancelled,

    /// The PIN exchange with the remote service failed.
    #[error("PIN exchange failed: {0}")]
    AuthExchange(String),

    /// Any other non-success response from the remote service.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// HTTP client failure that was not classified as transient.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local I/O failure (credential files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChirpError {
    /// Whether the failure is worth retrying after a delay.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// Whether the caller should obtain new credentials rather than retry.
    #[must_use]
    pub fn needs_new_credentials(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::AuthExchange(_))
    }

    /// Server-suggested wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for `chirp-rs` operations.
pub type ChirpResult<T> = Result<T, ChirpError>;
