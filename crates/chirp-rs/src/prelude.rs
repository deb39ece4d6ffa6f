//! Convenience re-exports for common `chirp-rs` types.
//!
//! ```ignore
//! use chirp_rs::prelude::*;
//! ```
//!
//! Framing, rate-limit parsing and the raw OAuth signer are left out; import
//! those from their modules when needed.

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ChirpError, ChirpResult};

// ── Auth ────────────────────────────────────────────────────────────
pub use crate::auth::{AuthorizationFlow, Credential, is_cancellation};

// ── Search ──────────────────────────────────────────────────────────
pub use crate::api::{Query, ResultRecord, SearchClient, SearchConfig, SearchResults};

// ── Streaming ───────────────────────────────────────────────────────
pub use crate::api::{
    ConnectionState, Decision, FnHandler, SessionHandle, Status, StreamConfig, StreamEvent,
    StreamFilter, StreamHandler, StreamSession, StreamTask,
};

// ── Retry ───────────────────────────────────────────────────────────
pub use crate::api::{BackoffPolicy, FailureKind};
