//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! Every user-context request (search, stream, and the PIN flow itself)
//! carries an `Authorization: OAuth ...` header built here. The signature
//! covers the method, the URL without its query, and every query and form
//! parameter.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use rand::RngCore;
use sha1::Sha1;

use crate::auth::credential::Credential;
use crate::error::{ChirpError, ChirpResult};

/// RFC 3986 unreserved characters stay literal; everything else is encoded.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Signs requests for one consumer, optionally on behalf of a user token.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    consumer_key: String,
    consumer_secret: String,
    token: Option<(String, String)>,
}

impl OAuthSigner {
    /// Consumer-only signer, used before a user token exists.
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            token: None,
        }
    }

    /// Attach a (request or access) token pair.
    pub fn with_token(mut self, token: impl Into<String>, secret: impl Into<String>) -> Self {
        self.token = Some((token.into(), secret.into()));
        self
    }

    /// Signer for a complete user credential.
    pub fn for_credential(credential: &Credential) -> Self {
        Self::new(credential.consumer_key(), credential.consumer_secret())
            .with_token(credential.access_token(), credential.access_token_secret())
    }

    /// Build the `Authorization` header value for a request.
    pub fn sign(&self, method: &str, url: &str, params: &[(String, String)]) -> ChirpResult<String> {
        self.sign_with(method, url, params, &[])
    }

    /// Like [`sign`](Self::sign), with extra `oauth_*` protocol parameters
    /// such as `oauth_callback` or `oauth_verifier`.
    pub fn sign_with(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        oauth_extra: &[(&str, &str)],
    ) -> ChirpResult<String> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| ChirpError::Config(format!("system clock before epoch: {e}")))?
            .as_secs()
            .to_string();
        self.sign_at(method, url, params, oauth_extra, &timestamp, &generate_nonce())
    }

    fn sign_at(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        oauth_extra: &[(&str, &str)],
        timestamp: &str,
        nonce: &str,
    ) -> ChirpResult<String> {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
        ];
        if let Some((token, _)) = &self.token {
            oauth_params.push(("oauth_token".to_string(), token.clone()));
        }
        oauth_params.push(("oauth_version".to_string(), "1.0".to_string()));
        for (k, v) in oauth_extra {
            oauth_params.push(((*k).to_string(), (*v).to_string()));
        }

        let mut all_params: Vec<(String, String)> = oauth_params
            .iter()
            .chain(params.iter())
            .map(|(k, v)| (percent_encode(k), percent_encode(v)))
            .collect();
        all_params.sort();

        let param_string = all_params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            percent_encode(url),
            percent_encode(&param_string)
        );

        let token_secret = self.token.as_ref().map_or("", |(_, s)| s.as_str());
        let signing_key = format!(
            "{}&{}",
            percent_encode(&self.consumer_secret),
            percent_encode(token_secret)
        );

        let signature = hmac_sha1(&signing_key, &base_string)?;
        oauth_params.push(("oauth_signature".to_string(), signature));

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!("OAuth {header}"))
    }
}

/// Percent-encode a string according to RFC 3986.
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

/// Encode key/value pairs as an `application/x-www-form-urlencoded` body
/// (or query string) using the same encoding the signature covers.
pub fn encode_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decode a form-encoded body such as `oauth_token=a&oauth_token_secret=b`.
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.trim()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(k), decode_component(v))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compute HMAC-SHA1 and return the base64-encoded digest.
fn hmac_sha1(key: &str, data: &str) -> ChirpResult<String> {
    type HmacSha1 = Hmac<Sha1>;

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| ChirpError::Config(format!("invalid signing key: {e}")))?;
    mac.update(data.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
