//! Credentials and OAuth 1.0a.
//!
//! - [`credential`]: the immutable [`Credential`] every request is signed with.
//! - [`oauth`]: HMAC-SHA1 request signing and form encoding helpers.
//! - [`flow`]: the PIN-based [`AuthorizationFlow`] that produces a credential.

pub mod credential;
pub mod flow;
pub mod oauth;

pub use credential::Credential;
pub use flow::{AuthorizationFlow, is_cancellation};
pub use oauth::OAuthSigner;
