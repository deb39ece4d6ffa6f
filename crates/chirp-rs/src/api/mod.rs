//! API interaction layer: search, filtered streaming, retry and backoff.
//!
//! - [`search`]: [`SearchClient`] producing lazily paginated
//!   [`SearchResults`]. Throttling and network faults are retried internally.
//! - [`stream`]: [`StreamSession`], a long-lived filtered stream that
//!   reconnects with backoff and hands every event to a [`StreamHandler`].
//! - [`backoff`]: [`BackoffPolicy`], monotone delay schedules shared by both.
//! - [`framing`]: splits the stream body into records and keep-alives.
//! - [`rate_limit`]: `x-rate-limit-*` and `Retry-After` headers.
//! - [`types`]: queries, filters, results and stream events.

pub mod backoff;
pub mod framing;
pub mod rate_limit;
pub mod search;
pub mod stream;
pub mod types;

pub use backoff::{BackoffPolicy, FailureKind};
pub use rate_limit::RateLimitInfo;
pub use search::{SearchClient, SearchConfig, SearchResults};
pub use stream::{FnHandler, SessionHandle, StreamConfig, StreamHandler, StreamSession, StreamTask};
pub use types::{
    ConnectionState, Decision, Query, ResultRecord, Status, StreamEvent, StreamFilter,
};
