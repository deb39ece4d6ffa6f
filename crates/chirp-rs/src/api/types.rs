//! Request and response types shared by search and streaming.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ChirpError, ChirpResult};

/// Largest page the search endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

// ── Search ─────────────────────────────────────────────────────────

/// A search query. Built once per search and not modified afterwards.
///
/// ```ignore
/// let query = Query::new(["-filter:retweets", "-filter:replies", "python"])
///     .with_language("en")
///     .with_page_size(100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    terms: Vec<String>,
    language: Option<String>,
    page_size: u32,
    extended: bool,
}

impl Query {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            language: None,
            page_size: MAX_PAGE_SIZE,
            extended: true,
        }
    }

    /// Restrict results to a language tag such as `"en"`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Results per page (1..=100).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Request full-length text (`tweet_mode=extended`). On by default.
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn extended(&self) -> bool {
        self.extended
    }

    /// Terms joined into the `q` parameter.
    pub fn text(&self) -> String {
        self.terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn validate(&self) -> ChirpResult<()> {
        if self.text().is_empty() {
            return Err(ChirpError::Config("search query has no terms".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ChirpError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Query parameters for one page request.
    pub(crate) fn params(&self, max_id: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("q".to_string(), self.text()),
            ("count".to_string(), self.page_size.to_string()),
        ];
        if let Some(lang) = &self.language {
            params.push(("lang".to_string(), lang.clone()));
        }
        if self.extended {
            params.push(("tweet_mode".to_string(), "extended".to_string()));
        }
        if let Some(max_id) = max_id {
            params.push(("max_id".to_string(), max_id.to_string()));
        }
        params
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub id: u64,
    pub screen_name: String,
    /// Full text when the API supplied it, otherwise the possibly truncated text.
    pub message: String,
}

impl ResultRecord {
    pub(crate) fn from_raw(raw: RawStatus) -> Self {
        let message = raw.message();
        Self {
            id: raw.id,
            screen_name: raw.user.screen_name,
            message,
        }
    }
}

/// Raw status object as returned by search and the stream.
#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RawStatus {
    pub id: u64,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub extended_tweet: Option<RawExtendedTweet>,
    pub user: RawUser,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RawExtendedTweet {
    pub full_text: String,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RawUser {
    pub screen_name: String,
}

impl RawStatus {
    /// Prefer the unabridged text and fall back to the truncated field.
    pub fn message(&self) -> String {
        self.extended_tweet
            .as_ref()
            .map(|e| e.full_text.clone())
            .or_else(|| self.full_text.clone())
            .or_else(|| self.text.clone())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct SearchPage {
    #[serde(default)]
    pub statuses: Vec<RawStatus>,
    #[serde(default)]
    pub search_metadata: Option<SearchMetadata>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct SearchMetadata {
    #[serde(default)]
    pub next_results: Option<String>,
}

impl SearchPage {
    /// The `max_id` continuation carried by `next_results`, if any.
    pub fn next_max_id(&self) -> Option<String> {
        let next = self.search_metadata.as_ref()?.next_results.as_deref()?;
        next.trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "max_id")
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
    }
}

// ── Streaming ──────────────────────────────────────────────────────

/// Keywords and author IDs a filtered stream follows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub track: Vec<String>,
    pub follow: Vec<u64>,
}

impl StreamFilter {
    pub fn track<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            track: keywords.into_iter().map(Into::into).collect(),
            follow: Vec::new(),
        }
    }

    pub fn follow(authors: impl IntoIterator<Item = u64>) -> Self {
        Self {
            track: Vec::new(),
            follow: authors.into_iter().collect(),
        }
    }

    pub fn with_follow(mut self, authors: impl IntoIterator<Item = u64>) -> Self {
        self.follow.extend(authors);
        self
    }

    pub(crate) fn validate(&self) -> ChirpResult<()> {
        if self.track.iter().all(|k| k.trim().is_empty()) && self.follow.is_empty() {
            return Err(ChirpError::Config(
                "stream filter needs at least one keyword or author".into(),
            ));
        }
        Ok(())
    }

    /// Form parameters for the filter endpoint.
    pub(crate) fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let track: Vec<&str> = self
            .track
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if !track.is_empty() {
            params.push(("track".to_string(), track.join(",")));
        }
        if !self.follow.is_empty() {
            let follow: Vec<String> = self.follow.iter().map(u64::to_string).collect();
            params.push(("follow".to_string(), follow.join(",")));
        }
        params
    }
}

/// A status delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub id: u64,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Posting client name, e.g. `"Twitter Web App"`.
    pub source: String,
    pub text: String,
}

impl Status {
    pub(crate) fn from_raw(raw: RawStatus) -> Self {
        let text = raw.message();
        Self {
            id: raw.id,
            author: raw.user.screen_name,
            created_at: raw.created_at.as_deref().and_then(parse_created_at),
            source: raw.source.as_deref().map(strip_tags).unwrap_or_default(),
            text,
        }
    }
}

/// What the stream handed to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(Status),
    /// An error code: an HTTP status on connect, or an in-band error record.
    Error { code: u16 },
    /// No bytes arrived within the idle window.
    Timeout,
}

impl StreamEvent {
    /// Whether this is a rate-limit-class error (420 or 429).
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StreamEvent::Error { code } if is_rate_limit_code(*code))
    }
}

/// 420 ("enhance your calm") and 429 both mean "slow down".
pub fn is_rate_limit_code(code: u16) -> bool {
    code == 420 || code == 429
}

/// The handler's answer after each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Continue,
    /// Disconnect and terminate the session without reconnecting.
    Stop,
}

/// Lifecycle of a [`StreamSession`](crate::api::stream::StreamSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { delay: Duration, attempt: u32 },
    Terminated,
}

/// Parse the `created_at` format used by the v1.1 API.
pub fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `<a href="...">Twitter Web App</a>` → `Twitter Web App`.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}
