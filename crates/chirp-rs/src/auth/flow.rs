//! Three-legged PIN ("out of band") authorization.
//!
//! ```ignore
//! let mut flow = AuthorizationFlow::new()?;
//! let url = flow.begin(consumer_key, consumer_secret).await?;
//! println!("Open {url} and enter the PIN:");
//! let credential = flow.complete(&read_line()?).await?;
//! ```
//!
//! Showing the URL (or opening a browser) is up to the caller; the flow only
//! talks to the service's `request_token` and `access_token` endpoints.

use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info};

use crate::API_URL;
use crate::auth::credential::Credential;
use crate::auth::oauth::{OAuthSigner, parse_form};
use crate::error::{ChirpError, ChirpResult};

/// Words that abandon the flow instead of being sent as a PIN.
const CANCEL_WORDS: [&str; 3] = ["q", "quit", "exit"];

/// Whether `pin` means "give up" rather than a code to exchange.
pub fn is_cancellation(pin: &str) -> bool {
    let pin = pin.trim();
    pin.is_empty() || CANCEL_WORDS.iter().any(|w| pin.eq_ignore_ascii_case(w))
}

/// Temporary request token issued by [`AuthorizationFlow::begin`].
#[derive(Debug, Clone)]
struct PendingAuthorization {
    consumer_key: String,
    consumer_secret: String,
    request_token: String,
    request_token_secret: String,
}

/// PIN-based OAuth 1.0a authorization.
#[derive(Debug)]
pub struct AuthorizationFlow {
    client: reqwest::Client,
    base_url: String,
    pending: Option<PendingAuthorization>,
}

impl AuthorizationFlow {
    /// Flow against the production API host.
    pub fn new() -> ChirpResult<Self> {
        Self::with_base_url(API_URL)
    }

    /// Flow against a different host (tests, proxies).
    pub fn with_base_url(base_url: impl Into<String>) -> ChirpResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pending: None,
        })
    }

    /// Obtain a request token and return the URL the user must visit.
    pub async fn begin(
        &mut self,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> ChirpResult<Url> {
        if consumer_key.trim().is_empty() || consumer_secret.trim().is_empty() {
            return Err(ChirpError::Config(
                "consumer key and consumer secret are required".into(),
            ));
        }

        let mut authorization_url = Url::parse(&format!("{}/oauth/authorize", self.base_url))
            .map_err(|e| ChirpError::Config(format!("invalid API URL {}: {e}", self.base_url)))?;

        let url = format!("{}/oauth/request_token", self.base_url);
        let header = OAuthSigner::new(consumer_key, consumer_secret).sign_with(
            "POST",
            &url,
            &[],
            &[("oauth_callback", "oob")],
        )?;

        debug!("Requesting OAuth request token");
        let resp = self
            .client
            .post(&url)
            .header("Authorization", header)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ChirpError::Auth {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(ChirpError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let fields = parse_form(&body);
        let request_token = field(&fields, "oauth_token").ok_or_else(|| ChirpError::Api {
            status: status.as_u16(),
            message: format!("request token missing from response: {body}"),
        })?;
        let request_token_secret = field(&fields, "oauth_token_secret").unwrap_or_default();

        authorization_url
            .query_pairs_mut()
            .append_pair("oauth_token", &request_token);

        self.pending = Some(PendingAuthorization {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            request_token,
            request_token_secret,
        });

        Ok(authorization_url)
    }

    /// Exchange the PIN the user copied from the authorization page for an
    /// access token pair.
    ///
    /// An empty PIN or a quit word returns [`ChirpError::AuthCancelled`]
    /// without contacting the service.
    pub async fn complete(&self, pin: &str) -> ChirpResult<Credential> {
        if is_cancellation(pin) {
            info!("Authorization cancelled");
            return Err(ChirpError::AuthCancelled);
        }
        let pending = self
            .pending
            .as_ref()
            .ok_or_else(|| ChirpError::Config("complete() called before begin()".into()))?;

        let url = format!("{}/oauth/access_token", self.base_url);
        let header = OAuthSigner::new(&pending.consumer_key, &pending.consumer_secret)
            .with_token(&pending.request_token, &pending.request_token_secret)
            .sign_with("POST", &url, &[], &[("oauth_verifier", pin.trim())])?;

        debug!("Exchanging PIN for access token");
        let resp = self
            .client
            .post(&url)
            .header("Authorization", header)
            .send()
            .await
            .map_err(|e| ChirpError::AuthExchange(format!("request failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ChirpError::AuthExchange(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(ChirpError::AuthExchange(format!("HTTP {status}: {body}")));
        }

        let fields = parse_form(&body);
        let (Some(token), Some(secret)) = (
            field(&fields, "oauth_token"),
            field(&fields, "oauth_token_secret"),
        ) else {
            return Err(ChirpError::AuthExchange(format!(
                "access token missing from response: {body}"
            )));
        };

        if let Some(name) = field(&fields, "screen_name") {
            info!(screen_name = %name, "Authorized");
        }

        let credential =
            Credential::new(&pending.consumer_key, &pending.consumer_secret, token, secret);
        credential
            .validate()
            .map_err(|e| ChirpError::AuthExchange(e.to_string()))?;
        Ok(credential)
    }
}

fn field(fields: &[(String, String)], name: &str) -> Option<String> {
    fields
        .iter()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.clone())
}
