//! Paginated search exposed as a lazy, pull-based sequence.
//!
//! [`SearchClient::search`] performs no I/O. Each call to
//! [`SearchResults::next`] serves a buffered result or fetches the next page,
//! strictly one page at a time so results arrive in the order the API
//! returns them. Throttling and network faults are retried internally with
//! [`BackoffPolicy`]; only terminal failures reach the caller.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures::Stream;
use tracing::{debug, trace, warn};

use crate::API_URL;
use crate::api::backoff::{BackoffPolicy, FailureKind};
use crate::api::rate_limit::RateLimitInfo;
use crate::api::types::{Query, ResultRecord, SearchPage, is_rate_limit_code};
use crate::auth::credential::Credential;
use crate::auth::oauth::{OAuthSigner, encode_params};
use crate::error::{ChirpError, ChirpResult};

const SEARCH_PATH: &str = "/1.1/search/tweets.json";

/// Search client configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// API host, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Throttled responses retried before giving up with
    /// [`ChirpError::RateLimitExceeded`].
    pub max_rate_limit_retries: u32,
    /// Network faults retried before giving up with
    /// [`ChirpError::TransientNetwork`].
    pub max_network_retries: u32,
    /// Delay policy for both kinds of retry.
    pub backoff: BackoffPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: API_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_rate_limit_retries: 3,
            max_network_retries: 3,
            backoff: BackoffPolicy::rest(),
        }
    }
}

impl SearchConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_network_retries(mut self, retries: u32) -> Self {
        self.max_network_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Executes search queries.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    config: SearchConfig,
    endpoint: String,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> ChirpResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        let endpoint = format!("{}{SEARCH_PATH}", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Start a search. Fails with [`ChirpError::Config`] on an incomplete
    /// credential or an invalid query, before any network call.
    pub fn search<'a>(
        &'a self,
        query: Query,
        credential: &'a Credential,
    ) -> ChirpResult<SearchResults<'a>> {
        credential.validate()?;
        query.validate()?;
        debug!(q = %query.text(), page_size = query.page_size(), "Starting search");
        Ok(SearchResults {
            client: self,
            signer: OAuthSigner::for_credential(credential),
            query,
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
            pages_fetched: 0,
        })
    }

    /// Fetch one page, retrying throttling and network faults.
    async fn fetch_page(
        &self,
        signer: &OAuthSigner,
        query: &Query,
        max_id: Option<&str>,
    ) -> ChirpResult<SearchPage> {
        let params = query.params(max_id);
        let full_url = format!("{}?{}", self.endpoint, encode_params(&params));
        let mut rate_limited = 0u32;
        let mut failures = 0u32;

        loop {
            let auth_header = signer.sign("GET", &self.endpoint, &params)?;
            let start = Instant::now();
            let result = match self
                .client
                .get(&full_url)
                .header("Authorization", auth_header)
                .send()
                .await
            {
                Ok(resp) => read_page(resp).await,
                Err(e) => Err(ChirpError::Http(e)),
            };
            trace!(elapsed_ms = start.elapsed().as_millis() as u64, "Search request finished");

            let err = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            let delay = match err {
                ChirpError::RateLimited { retry_after } => {
                    rate_limited += 1;
                    if rate_limited > self.config.max_rate_limit_retries {
                        return Err(ChirpError::RateLimitExceeded {
                            attempts: self.config.max_rate_limit_retries,
                        });
                    }
                    self.config
                        .backoff
                        .next(rate_limited, FailureKind::RateLimited(retry_after))
                }
                e if e.is_retryable() => {
                    failures += 1;
                    if failures > self.config.max_network_retries {
                        return Err(ChirpError::TransientNetwork {
                            attempts: self.config.max_network_retries,
                            message: e.to_string(),
                        });
                    }
                    warn!(attempt = failures, error = %e, "Search request failed");
                    self.config.backoff.next(failures, FailureKind::Transient)
                }
                e => return Err(e),
            };

            warn!(
                delay_ms = delay.as_millis() as u64,
                rate_limited, failures, "Retrying search request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Classify a search response.
async fn read_page(resp: reqwest::Response) -> ChirpResult<SearchPage> {
    let status = resp.status().as_u16();
    let rate_limit = RateLimitInfo::from_headers(resp.headers());
    if rate_limit.is_exhausted() {
        debug!(reset = ?rate_limit.reset, "Rate limit window exhausted");
    }

    if is_rate_limit_code(status) {
        return Err(ChirpError::RateLimited {
            retry_after: rate_limit.retry_after(),
        });
    }

    let text = resp.text().await?;
    match status {
        200..=299 => Ok(serde_json::from_str(&text)?),
        401 | 403 => Err(ChirpError::Auth {
            status,
            message: text,
        }),
        _ => Err(ChirpError::Api {
            status,
            message: text,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazy, finite, non-restartable sequence of search results.
///
/// Dropping it releases everything; no connection outlives a page fetch.
#[derive(Debug)]
pub struct SearchResults<'a> {
    client: &'a SearchClient,
    signer: OAuthSigner,
    query: Query,
    buffer: VecDeque<ResultRecord>,
    cursor: Cursor,
    pages_fetched: u32,
}

impl<'a> SearchResults<'a> {
    /// Next result, fetching a page if needed. `Ok(None)` once exhausted,
    /// and on every call after that (or after an error) without any I/O.
    pub async fn next(&mut self) -> ChirpResult<Option<ResultRecord>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }

            let max_id = match &self.cursor {
                Cursor::Done => return Ok(None),
                Cursor::Start => None,
                Cursor::Next(id) => Some(id.clone()),
            };

            let page = match self
                .client
                .fetch_page(&self.signer, &self.query, max_id.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.cursor = Cursor::Done;
                    return Err(e);
                }
            };
            self.pages_fetched += 1;

            let next = page.next_max_id();
            debug!(
                page = self.pages_fetched,
                results = page.statuses.len(),
                next = ?next,
                "Fetched search page"
            );

            // An empty page or a cursor that does not move ends the sequence.
            self.cursor = match next {
                Some(id) if !page.statuses.is_empty() && Some(&id) != max_id.as_ref() => {
                    Cursor::Next(id)
                }
                _ => Cursor::Done,
            };
            self.buffer
                .extend(page.statuses.into_iter().map(ResultRecord::from_raw));
        }
    }

    /// Pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Whether the sequence has ended.
    pub fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.cursor == Cursor::Done
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Adapt into a [`Stream`]. The stream ends after the last result or
    /// after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = ChirpResult<ResultRecord>> + 'a {
        futures::stream::unfold(self, |mut results| async move {
            match results.next().await {
                Ok(Some(record)) => Some((Ok(record), results)),
                Ok(None) => None,
                Err(e) => Some((Err(e), results)),
            }
        })
    }
}
