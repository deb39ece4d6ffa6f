//! Immutable OAuth 1.0a user credential.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChirpError, ChirpResult};

/// Environment variable holding the consumer (API) key.
pub const ENV_CONSUMER_KEY: &str = "CHIRP_CONSUMER_KEY";
/// Environment variable holding the consumer (API) secret.
pub const ENV_CONSUMER_SECRET: &str = "CHIRP_CONSUMER_SECRET";
/// Environment variable holding the user access token.
pub const ENV_ACCESS_TOKEN: &str = "CHIRP_ACCESS_TOKEN";
/// Environment variable holding the user access token secret.
pub const ENV_ACCESS_TOKEN_SECRET: &str = "CHIRP_ACCESS_TOKEN_SECRET";

/// Consumer key pair plus user access token pair.
///
/// Fields are private and there are no setters: once built, a credential is
/// shared read-only between the search client and stream sessions. Call
/// [`validate`](Self::validate) (the clients do it for you) before any
/// network use.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    consumer_key: String,
    consumer_secret: String,
    access_token: String,
    access_token_secret: String,
}

impl Credential {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        access_token: impl Into<String>,
        access_token_secret: impl Into<String>,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: access_token.into(),
            access_token_secret: access_token_secret.into(),
        }
    }

    /// Read all four fields from the `CHIRP_*` environment variables.
    ///
    /// Unset variables become empty fields and are reported by
    /// [`validate`](Self::validate), so the error names every missing value
    /// at once.
    pub fn from_env() -> ChirpResult<Self> {
        let read = |name: &str| std::env::var(name).unwrap_or_default();
        let credential = Self::new(
            read(ENV_CONSUMER_KEY),
            read(ENV_CONSUMER_SECRET),
            read(ENV_ACCESS_TOKEN),
            read(ENV_ACCESS_TOKEN_SECRET),
        );
        credential.validate()?;
        Ok(credential)
    }

    /// Load a credential previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> ChirpResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let credential: Self = serde_json::from_str(&text)?;
        credential.validate()?;
        Ok(credential)
    }

    /// Write the credential as pretty-printed JSON.
    ///
    /// On Unix the file is readable by its owner only (mode `0600`), also
    /// when it already existed with wider permissions.
    pub fn save(&self, path: impl AsRef<Path>) -> ChirpResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path.as_ref())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Fail with [`ChirpError::Config`] naming every empty field.
    pub fn validate(&self) -> ChirpResult<()> {
        let missing: Vec<&str> = [
            ("consumer key", &self.consumer_key),
            ("consumer secret", &self.consumer_secret),
            ("access token", &self.access_token),
            ("access token secret", &self.access_token_secret),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ChirpError::Config(format!(
                "credential is missing: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    pub fn consumer_secret(&self) -> &str {
        &self.consumer_secret
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn access_token_secret(&self) -> &str {
        &self.access_token_secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("access_token", &self.access_token)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}
