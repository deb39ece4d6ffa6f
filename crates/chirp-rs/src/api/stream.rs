//! Long-lived filtered stream with reconnection and rate-limit handling.
//!
//! A [`StreamSession`] owns one connection to the filter endpoint. Its read
//! loop decodes frames in arrival order and hands each [`StreamEvent`] to a
//! caller-supplied [`StreamHandler`], synchronously: the next frame is not
//! read until the handler returns, so handlers must not block for long.
//!
//! ```text
//! Disconnected → Connecting → Connected ─┬→ Backoff → Connecting …
//!                                        └→ Terminated
//! close() from any state               ───→ Terminated
//! ```
//!
//! The handler decides what stops the stream: returning [`Decision::Stop`]
//! (typically for a 420/429 error) terminates without reconnecting; any other
//! error, or an unsolicited disconnect, backs off and reconnects until
//! [`StreamConfig::max_reconnects`] consecutive failures have been reached.
//!
//! Run the loop on the current task with [`StreamSession::open`], or on a
//! dedicated tokio task with [`StreamSession::spawn`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::STREAM_URL;
use crate::api::backoff::{BackoffPolicy, FailureKind};
use crate::api::framing::{DEFAULT_MAX_FRAME_LEN, Frame, FrameDecoder};
use crate::api::rate_limit::RateLimitInfo;
use crate::api::types::{
    ConnectionState, Decision, RawStatus, Status, StreamEvent, StreamFilter, is_rate_limit_code,
};
use crate::auth::credential::Credential;
use crate::auth::oauth::{OAuthSigner, encode_params};
use crate::error::{ChirpError, ChirpResult};

const FILTER_PATH: &str = "/1.1/statuses/filter.json";

// ── Handler ────────────────────────────────────────────────────────

/// Receives every event of a stream session.
///
/// # Example
///
/// ```ignore
/// struct Watcher;
///
/// impl StreamHandler for Watcher {
///     fn on_event(&mut self, event: &StreamEvent) -> Decision {
///         match event {
///             StreamEvent::Status(status) => println!("{}", status.text),
///             // Disconnect on rate limiting instead of reconnecting.
///             e if e.is_rate_limit() => return Decision::Stop,
///             _ => {}
///         }
///         Decision::Continue
///     }
/// }
/// ```
pub trait StreamHandler {
    fn on_event(&mut self, event: &StreamEvent) -> Decision;
}

impl<H: StreamHandler + ?Sized> StreamHandler for Box<H> {
    fn on_event(&mut self, event: &StreamEvent) -> Decision {
        (**self).on_event(event)
    }
}

/// A stream handler backed by a closure.
///
/// ```ignore
/// let handler = FnHandler::new(|event: &StreamEvent| {
///     if let StreamEvent::Status(status) = event {
///         println!("{}", status.text);
///     }
///     Decision::Continue
/// });
/// ```
pub struct FnHandler<F>(F)
where
    F: FnMut(&StreamEvent) -> Decision;

impl<F> FnHandler<F>
where
    F: FnMut(&StreamEvent) -> Decision,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> StreamHandler for FnHandler<F>
where
    F: FnMut(&StreamEvent) -> Decision,
{
    fn on_event(&mut self, event: &StreamEvent) -> Decision {
        (self.0)(event)
    }
}

// ── Configuration ──────────────────────────────────────────────────

/// Stream session configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream host, without trailing slash.
    pub stream_url: String,
    /// Limit for establishing the connection, and for reading the body of a
    /// rejected connection. Not applied to the stream itself.
    pub connect_timeout: Duration,
    /// Raise [`StreamEvent::Timeout`] when no bytes arrive for this long.
    /// `None` disables idle monitoring.
    pub idle_timeout: Option<Duration>,
    /// Consecutive failed connections tolerated before
    /// [`ChirpError::StreamExhausted`].
    pub max_reconnects: u32,
    /// Largest record accepted; a bigger one drops the connection.
    pub max_frame_len: usize,
    /// Delays after network faults and unsolicited disconnects.
    pub network_backoff: BackoffPolicy,
    /// Delays after HTTP errors and in-band error records.
    pub http_backoff: BackoffPolicy,
    /// Delays after 420/429.
    pub rate_limit_backoff: BackoffPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_url: STREAM_URL.to_string(),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(90)),
            max_reconnects: 6,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            network_backoff: BackoffPolicy::network(),
            http_backoff: BackoffPolicy::http_error(),
            rate_limit_backoff: BackoffPolicy::rate_limit(),
        }
    }
}

impl StreamConfig {
    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = url.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `None` means "timeout=none": never raise idle timeouts.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_reconnects(mut self, max: u32) -> Self {
        self.max_reconnects = max;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Use one policy for every kind of failure.
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.network_backoff = policy.clone();
        self.http_backoff = policy.clone();
        self.rate_limit_backoff = policy;
        self
    }
}

// ── Shared session state ───────────────────────────────────────────

/// State reachable from both the read loop and [`SessionHandle`]s.
#[derive(Debug)]
struct Shared {
    state: Mutex<ConnectionState>,
    shutdown: watch::Sender<bool>,
    reconnects: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            shutdown,
            reconnects: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        // State is a plain enum; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ConnectionState {
        *self.lock()
    }

    /// Move to `next` unless the session has already terminated.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.lock();
        if *state == ConnectionState::Terminated {
            return false;
        }
        debug!(from = ?*state, to = ?next, "Stream state transition");
        *state = next;
        true
    }

    /// Terminate and wake the read loop. Returns `false` if already terminated.
    fn close(&self) -> bool {
        let mut state = self.lock();
        if *state == ConnectionState::Terminated {
            return false;
        }
        debug!(from = ?*state, "Stream session closed");
        *state = ConnectionState::Terminated;
        drop(state);
        self.shutdown.send_replace(true);
        true
    }
}

/// Cheap, cloneable handle for observing or closing a session from another
/// task or thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Terminate the session and release its connection. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }

    /// Reconnect attempts made so far.
    pub fn reconnects(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }
}

// ── Session ────────────────────────────────────────────────────────

/// A filtered stream connection with automatic reconnection.
#[derive(Debug)]
pub struct StreamSession {
    client: reqwest::Client,
    credential: Arc<Credential>,
    config: StreamConfig,
    endpoint: String,
    shared: Arc<Shared>,
}

/// How a connection attempt or a connected read ended, when it should be
/// followed by a reconnect.
#[derive(Debug)]
enum Failure {
    Network(String),
    Http(u16),
    RateLimited(Duration),
}

/// How the frame-reading loop ended.
#[derive(Debug)]
enum ReadEnd {
    /// The handler returned [`Decision::Stop`].
    Stopped,
    /// [`StreamSession::close`] was called.
    Closed,
    /// Reconnect after this failure.
    Failed(Failure),
}

/// One read from the response body.
enum Read {
    Data,
    Idle,
    Eof,
    Failed(reqwest::Error),
}

/// What a decoded record turned out to be.
#[derive(Debug)]
enum Classified {
    Event(StreamEvent),
    Notice(String),
    Undecodable(serde_json::Error),
}

impl StreamSession {
    pub fn new(credential: impl Into<Arc<Credential>>, config: StreamConfig) -> ChirpResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()?;
        let endpoint = format!("{}{FILTER_PATH}", config.stream_url.trim_end_matches('/'));
        Ok(Self {
            client,
            credential: credential.into(),
            config,
            endpoint,
            shared: Arc::new(Shared::new()),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Terminate the session from any state. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn reconnects(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    /// Run the session on the current task until it terminates.
    ///
    /// Returns `Ok(())` when the handler stops the stream or the session is
    /// closed, [`ChirpError::Auth`] if the credential is rejected, and
    /// [`ChirpError::StreamExhausted`] once reconnecting has failed
    /// `max_reconnects` times in a row. Incomplete credentials or an empty
    /// filter fail with [`ChirpError::Config`] before any network call.
    pub async fn open<H: StreamHandler>(
        &self,
        filter: &StreamFilter,
        mut handler: H,
    ) -> ChirpResult<()> {
        self.credential.validate()?;
        filter.validate()?;

        {
            let mut state = self.shared.lock();
            if *state != ConnectionState::Disconnected {
                return Err(ChirpError::Config(format!(
                    "stream session cannot be opened from state {:?}",
                    *state
                )));
            }
            debug!("Stream state transition: Disconnected -> Connecting");
            *state = ConnectionState::Connecting;
        }

        let result = self.run(filter, &mut handler).await;
        if let Err(e) = &result {
            error!(error = %e, "Stream session ended with error");
        }
        self.shared.close();
        result
    }

    /// Run the session on a dedicated tokio task.
    pub fn spawn<H>(self, filter: StreamFilter, handler: H) -> StreamTask
    where
        H: StreamHandler + Send + 'static,
    {
        let handle = self.handle();
        let join = tokio::spawn(async move { self.open(&filter, handler).await });
        StreamTask { handle, join }
    }

    async fn run<H: StreamHandler>(
        &self,
        filter: &StreamFilter,
        handler: &mut H,
    ) -> ChirpResult<()> {
        let params = filter.params();
        let body = encode_params(&params);
        let signer = OAuthSigner::for_credential(&self.credential);
        let mut shutdown = self.shared.shutdown.subscribe();
        let mut failures = 0u32;

        loop {
            info!(url = %self.endpoint, track = ?filter.track, follow = ?filter.follow, "Connecting to filtered stream");
            let auth_header = signer.sign("POST", &self.endpoint, &params)?;
            let request = self
                .client
                .post(&self.endpoint)
                .header(AUTHORIZATION, auth_header)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.clone())
                .send();

            let response = tokio::select! {
                biased;
                _ = closed(&mut shutdown) => return Ok(()),
                response = request => response,
            };

            let failure = match response {
                Err(e) => {
                    warn!(error = %e, "Failed to connect to stream");
                    Failure::Network(e.to_string())
                }
                Ok(resp) if resp.status().is_success() => {
                    if !self.shared.transition(ConnectionState::Connected) {
                        return Ok(());
                    }
                    info!("Stream connected");
                    failures = 0;
                    match self.read_frames(resp, handler, &mut shutdown).await {
                        ReadEnd::Stopped | ReadEnd::Closed => return Ok(()),
                        ReadEnd::Failed(failure) => failure,
                    }
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let rate_limit = RateLimitInfo::from_headers(resp.headers());
                    // The error body is informational only; give up on it
                    // when it stalls or the session is closed meanwhile.
                    let text = tokio::select! {
                        biased;
                        _ = closed(&mut shutdown) => return Ok(()),
                        text = tokio::time::timeout(self.config.connect_timeout, resp.text()) => {
                            text.ok().and_then(Result::ok).unwrap_or_default()
                        }
                    };
                    if status == 401 || status == 403 {
                        return Err(ChirpError::Auth {
                            status,
                            message: text,
                        });
                    }
                    warn!(status, body = %text, "Stream connection rejected");
                    if deliver(handler, &StreamEvent::Error { code: status }) == Decision::Stop {
                        info!(status, "Handler stopped the stream");
                        return Ok(());
                    }
                    if is_rate_limit_code(status) {
                        Failure::RateLimited(rate_limit.retry_after())
                    } else {
                        Failure::Http(status)
                    }
                }
            };

            failures += 1;
            if failures > self.config.max_reconnects {
                return Err(ChirpError::StreamExhausted {
                    attempts: self.config.max_reconnects,
                });
            }

            let delay = match &failure {
                Failure::Network(_) => self
                    .config
                    .network_backoff
                    .next(failures, FailureKind::Transient),
                Failure::Http(_) => self.config.http_backoff.next(failures, FailureKind::Transient),
                Failure::RateLimited(hint) => self
                    .config
                    .rate_limit_backoff
                    .next(failures, FailureKind::RateLimited(*hint)),
            };
            info!(
                delay_ms = delay.as_millis() as u64,
                attempt = failures,
                reason = ?failure,
                "Reconnecting after delay"
            );

            if !self.shared.transition(ConnectionState::Backoff {
                delay,
                attempt: failures,
            }) {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = closed(&mut shutdown) => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.shared.transition(ConnectionState::Connecting) {
                return Ok(());
            }
            self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read and dispatch frames until the connection ends.
    async fn read_frames<H: StreamHandler>(
        &self,
        mut resp: reqwest::Response,
        handler: &mut H,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ReadEnd {
        let mut decoder = FrameDecoder::with_max_frame_len(self.config.max_frame_len);

        loop {
            let read = tokio::select! {
                biased;
                _ = closed(shutdown) => return ReadEnd::Closed,
                read = read_chunk(&mut resp, &mut decoder, self.config.idle_timeout) => read,
            };

            match read {
                Read::Data => loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            if let Some(end) = self.dispatch(frame, handler) {
                                return end;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Stream out of sync, dropping connection");
                            return ReadEnd::Failed(Failure::Network(e.to_string()));
                        }
                    }
                },
                Read::Idle => {
                    debug!("No data within idle window");
                    if self.shared.state() == ConnectionState::Terminated {
                        return ReadEnd::Closed;
                    }
                    if deliver(handler, &StreamEvent::Timeout) == Decision::Stop {
                        return ReadEnd::Stopped;
                    }
                }
                Read::Eof => {
                    if let Some(frame) = decoder.finish()
                        && let Some(end) = self.dispatch(frame, handler)
                    {
                        return end;
                    }
                    warn!("Stream closed by server");
                    return ReadEnd::Failed(Failure::Network("connection closed by server".into()));
                }
                Read::Failed(e) => {
                    warn!(error = %e, "Stream read failed");
                    return ReadEnd::Failed(Failure::Network(e.to_string()));
                }
            }
        }
    }

    /// Deliver one frame. `Some` ends the current connection.
    fn dispatch<H: StreamHandler>(&self, frame: Frame, handler: &mut H) -> Option<ReadEnd> {
        let record = match frame {
            Frame::KeepAlive => {
                trace!("Keep-alive");
                return None;
            }
            Frame::Record(record) => record,
        };

        if self.shared.state() == ConnectionState::Terminated {
            return Some(ReadEnd::Closed);
        }

        match classify(&record) {
            Classified::Event(event) => {
                let decision = deliver(handler, &event);
                match (event, decision) {
                    (_, Decision::Stop) => {
                        info!("Handler stopped the stream");
                        Some(ReadEnd::Stopped)
                    }
                    (StreamEvent::Error { code }, Decision::Continue) => {
                        warn!(code, "Stream error record, reconnecting");
                        Some(ReadEnd::Failed(if is_rate_limit_code(code) {
                            Failure::RateLimited(Duration::ZERO)
                        } else {
                            Failure::Http(code)
                        }))
                    }
                    _ => None,
                }
            }
            Classified::Notice(kind) => {
                debug!(kind = %kind, "Ignoring stream notice");
                None
            }
            Classified::Undecodable(e) => {
                warn!(error = %e, data = %record, "Failed to parse stream record");
                None
            }
        }
    }
}

/// A session running on its own task.
#[derive(Debug)]
pub struct StreamTask {
    handle: SessionHandle,
    join: JoinHandle<ChirpResult<()>>,
}

impl StreamTask {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Terminate the session. Idempotent.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the session to end and return its outcome.
    pub async fn join(self) -> ChirpResult<()> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

fn deliver<H: StreamHandler>(handler: &mut H, event: &StreamEvent) -> Decision {
    trace!(?event, "Delivering stream event");
    handler.on_event(event)
}

/// Resolves once the session has been closed.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    // The sender lives as long as the session, so an error cannot happen
    // while the loop runs.
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn read_chunk(
    resp: &mut reqwest::Response,
    decoder: &mut FrameDecoder,
    idle_timeout: Option<Duration>,
) -> Read {
    let chunk = match idle_timeout {
        Some(window) => match tokio::time::timeout(window, resp.chunk()).await {
            Ok(chunk) => chunk,
            Err(_) => return Read::Idle,
        },
        None => resp.chunk().await,
    };
    match chunk {
        Ok(Some(bytes)) => {
            decoder.push(&bytes);
            Read::Data
        }
        Ok(None) => Read::Eof,
        Err(e) => Read::Failed(e),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMessage {
    Status(RawStatus),
    Disconnect { disconnect: RawCode },
    Errors { errors: Vec<RawCode> },
    Code { code: u16 },
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct RawCode {
    code: u16,
}

fn classify(record: &str) -> Classified {
    match serde_json::from_str::<RawMessage>(record) {
        Ok(RawMessage::Status(raw)) => Classified::Event(StreamEvent::Status(Status::from_raw(raw))),
        Ok(RawMessage::Disconnect { disconnect }) => {
            Classified::Event(StreamEvent::Error {
                code: disconnect.code,
            })
        }
        Ok(RawMessage::Errors { errors }) if !errors.is_empty() => {
            Classified::Event(StreamEvent::Error {
                code: errors[0].code,
            })
        }
        Ok(RawMessage::Code { code }) => Classified::Event(StreamEvent::Error { code }),
        Ok(RawMessage::Errors { .. }) => Classified::Notice("errors".into()),
        Ok(RawMessage::Other(value)) => Classified::Notice(
            value
                .as_object()
                .and_then(|o| o.keys().next().cloned())
                .unwrap_or_else(|| "unknown".into()),
        ),
        Err(e) => Classified::Undecodable(e),
    }
}
