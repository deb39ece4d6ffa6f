//! Resilient client core for the Twitter v1.1 API.
//!
//! `chirp-rs` covers the three things a small tweet-watching program needs:
//! obtaining a user credential through the PIN-based OAuth flow, running a
//! search whose pages are fetched lazily, and holding a filtered stream open
//! for hours while riding out throttling, network drops and server errors.
//!
//! # Getting started
//!
//! ```ignore
//! use chirp_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> ChirpResult<()> {
//!     let credential = Credential::from_env()?;
//!
//!     // Search: pages are fetched one at a time as results are pulled.
//!     let client = SearchClient::new(SearchConfig::default())?;
//!     let mut results = client.search(Query::new(["rustlang"]).with_language("en"), &credential)?;
//!     while let Some(record) = results.next().await? {
//!         println!("{} {}: {}", record.id, record.screen_name, record.message);
//!     }
//!
//!     // Stream: the handler decides when to stop.
//!     let session = StreamSession::new(credential, StreamConfig::default())?;
//!     session
//!         .open(
//!             &StreamFilter::track(["rustlang"]),
//!             FnHandler::new(|event: &StreamEvent| match event {
//!                 StreamEvent::Status(status) => {
//!                     println!("{}: {}", status.author, status.text);
//!                     Decision::Continue
//!                 }
//!                 e if e.is_rate_limit() => Decision::Stop,
//!                 _ => Decision::Continue,
//!             }),
//!         )
//!         .await
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Credentials:** [`Credential`](auth::Credential) loads from the
//!   environment or a JSON file and is shared read-only by every component.
//!   [`AuthorizationFlow`](auth::AuthorizationFlow) produces one from a PIN.
//!
//! - **Search:** [`SearchClient`](api::SearchClient) and
//!   [`SearchResults`](api::SearchResults). Retries for 420/429 and network
//!   faults happen inside `next()`; only terminal errors come out.
//!
//! - **Streaming:** [`StreamSession`](api::StreamSession) with a
//!   [`StreamHandler`](api::StreamHandler). Use
//!   [`SessionHandle`](api::SessionHandle) to observe the
//!   [`ConnectionState`](api::ConnectionState) or close the session from
//!   another task.
//!
//! - **Retry timing:** [`BackoffPolicy`](api::BackoffPolicy) presets for REST
//!   calls, network drops, HTTP errors and rate limiting.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Credential, OAuth 1.0a signing, PIN authorization flow |
//! | [`api`] | Search, filtered stream, backoff, framing, rate-limit headers |
//! | [`error`] | [`ChirpError`](error::ChirpError) and its retry classification |

pub mod api;
pub mod auth;
pub mod error;
pub mod prelude;

pub use error::{ChirpError, ChirpResult};

/// REST API host.
pub const API_URL: &str = "https://api.twitter.com";

/// Streaming API host.
pub const STREAM_URL: &str = "https://stream.twitter.com";

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("chirp-rs/", env!("CARGO_PKG_VERSION"));

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "CHIRP_LOG";
