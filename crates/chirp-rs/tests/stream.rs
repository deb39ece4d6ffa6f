//! Stream session lifecycle against a fake streaming endpoint.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use chirp_rs::api::{
    BackoffPolicy, ConnectionState, Decision, FnHandler, SessionHandle, StreamConfig, StreamEvent,
    StreamFilter, StreamSession,
};
use chirp_rs::auth::Credential;
use chirp_rs::error::ChirpError;
use common::{Hits, credential, fast_backoff, serve, status};
use futures::StreamExt;
use futures::stream;

const PATH: &str = "/1.1/statuses/filter.json";

/// A 200 response streaming `lines`, then either ending or staying open.
fn body(lines: Vec<String>, stay_open: bool) -> Response {
    let chunks = stream::iter(
        lines
            .into_iter()
            .map(|line| Ok::<_, std::io::Error>(Bytes::from(format!("{line}\r\n")))),
    );
    let body = if stay_open {
        Body::from_stream(chunks.chain(stream::pending()))
    } else {
        Body::from_stream(chunks)
    };
    (StatusCode::OK, body).into_response()
}

fn status_line(id: u64, text: &str) -> String {
    status(id, "ann", text).to_string()
}

fn config(base: &str) -> StreamConfig {
    StreamConfig::default()
        .with_stream_url(base)
        .with_backoff(fast_backoff())
        .with_idle_timeout(None)
}

/// Collects every event and applies `decide` to it.
fn recorder<T: Fn(&StreamEvent, usize) -> Decision>(
    events: &Arc<Mutex<Vec<StreamEvent>>>,
    decide: T,
) -> FnHandler<impl FnMut(&StreamEvent) -> Decision + use<T>> {
    let events = events.clone();
    FnHandler::new(move |event: &StreamEvent| {
        let mut events = events.lock().unwrap();
        events.push(event.clone());
        decide(event, events.len())
    })
}

fn status_ids(events: &[StreamEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Status(s) => Some(s.id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn stop_on_rate_limit_terminates_without_reconnecting() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                StatusCode::from_u16(420).unwrap()
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = recorder(&events, |event, _| {
        if event.is_rate_limit() {
            Decision::Stop
        } else {
            Decision::Continue
        }
    });

    session
        .open(&StreamFilter::track(["python"]), handler)
        .await
        .unwrap();

    assert_eq!(*events.lock().unwrap(), vec![StreamEvent::Error { code: 420 }]);
    assert_eq!(session.state(), ConnectionState::Terminated);
    assert_eq!(session.reconnects(), 0);
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn filter_is_posted_as_signed_form() {
    let seen = Arc::new(Mutex::new(None));
    let app = Router::new().route(
        PATH,
        post({
            let seen = seen.clone();
            move |headers: HeaderMap, form: String| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                *seen.lock().unwrap() = Some((form, auth, content_type));
                body(vec![status_line(1, "hello")], true)
            }
        }),
    );
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    session
        .open(
            &StreamFilter::track(["rust", "go"]).with_follow([42]),
            recorder(&events, |_, _| Decision::Stop),
        )
        .await
        .unwrap();

    let (form, auth, content_type) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(form, "track=rust%2Cgo&follow=42");
    assert!(auth.starts_with("OAuth "));
    assert!(auth.contains("oauth_consumer_key=\"consumer\""));
    assert_eq!(content_type, "application/x-www-form-urlencoded");
    assert_eq!(status_ids(&events.lock().unwrap()), vec![1]);
}

#[tokio::test]
async fn unsolicited_disconnect_reconnects_and_resumes() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                match hits.hit() {
                    // First connection delivers one status and drops.
                    1 => body(vec![status_line(1, "before")], false),
                    n => body(vec![status_line(n as u64, "after")], true),
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = recorder(&events, |event, _| match event {
        StreamEvent::Status(s) if s.id == 2 => Decision::Stop,
        _ => Decision::Continue,
    });

    session
        .open(&StreamFilter::track(["python"]), handler)
        .await
        .unwrap();

    assert_eq!(status_ids(&events.lock().unwrap()), vec![1, 2]);
    assert_eq!(session.reconnects(), 1);
    assert_eq!(hits.count(), 2);
    assert_eq!(session.state(), ConnectionState::Terminated);
}

#[tokio::test]
async fn exceeding_reconnect_bound_is_reported_once() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                StatusCode::SERVICE_UNAVAILABLE
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session =
        StreamSession::new(credential(), config(&base).with_max_reconnects(2)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    let err = session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Continue),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ChirpError::StreamExhausted { attempts: 2 }));
    assert_eq!(hits.count(), 3);
    assert_eq!(session.reconnects(), 2);
    assert_eq!(
        *events.lock().unwrap(),
        vec![StreamEvent::Error { code: 503 }; 3]
    );
    assert_eq!(session.state(), ConnectionState::Terminated);

    // A terminated session cannot be reopened.
    let again = session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Continue),
        )
        .await;
    assert!(matches!(again, Err(ChirpError::Config(_))));
    assert_eq!(hits.count(), 3);
}

#[tokio::test]
async fn rejected_credential_ends_the_session() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                (StatusCode::UNAUTHORIZED, "Unauthorized")
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let err = session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Continue),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ChirpError::Auth { status: 401, .. }));
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(hits.count(), 1);
    assert_eq!(session.state(), ConnectionState::Terminated);
}

#[tokio::test]
async fn idle_window_raises_timeout_while_connected() {
    let app = Router::new().route(
        PATH,
        post(|| async { body(vec![status_line(1, "only one")], true) }),
    );
    let base = serve(app).await;

    let session = StreamSession::new(
        credential(),
        config(&base).with_idle_timeout(Some(Duration::from_millis(50))),
    )
    .unwrap();
    let handle = session.handle();
    let states = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let handler = recorder(&events, {
        let states = states.clone();
        move |event: &StreamEvent, seen: usize| {
            states.lock().unwrap().push(handle.state());
            if *event == StreamEvent::Timeout && seen >= 3 {
                Decision::Stop
            } else {
                Decision::Continue
            }
        }
    });

    session
        .open(&StreamFilter::track(["python"]), handler)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(status_ids(&events), vec![1]);
    assert_eq!(&events[1..], &[StreamEvent::Timeout, StreamEvent::Timeout]);
    assert!(
        states
            .lock()
            .unwrap()
            .iter()
            .all(|s| *s == ConnectionState::Connected)
    );
    assert_eq!(session.reconnects(), 0);
}

#[tokio::test]
async fn notices_and_garbage_are_skipped() {
    let app = Router::new().route(
        PATH,
        post(|| async {
            body(
                vec![
                    String::new(),
                    r#"{"limit":{"track":3}}"#.to_string(),
                    "{not json".to_string(),
                    status_line(5, "real"),
                ],
                true,
            )
        }),
    );
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Stop),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Status(status) => {
            assert_eq!(status.id, 5);
            assert_eq!(status.author, "ann");
            assert_eq!(status.source, "Twitter Web App");
            assert!(status.created_at.is_some());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn close_from_another_task_terminates() {
    let app = Router::new().route(
        PATH,
        post(|| async { body(Vec::new(), true) }),
    );
    let base = serve(app).await;

    let task = StreamSession::new(credential(), config(&base))
        .unwrap()
        .spawn(
            StreamFilter::track(["python"]),
            FnHandler::new(|_: &StreamEvent| Decision::Continue),
        );
    let handle = task.handle();

    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let closer = tokio::spawn({
        let handle = handle.clone();
        async move { handle.close() }
    });
    closer.await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), task.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.state(), ConnectionState::Terminated);

    handle.close();
    assert_eq!(handle.state(), ConnectionState::Terminated);
}

#[tokio::test]
async fn incomplete_credential_fails_before_connecting() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                body(Vec::new(), true)
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session = StreamSession::new(
        Credential::new("consumer", "", "token", "token-secret"),
        config(&base),
    )
    .unwrap();
    let result = session
        .open(
            &StreamFilter::track(["python"]),
            FnHandler::new(|_: &StreamEvent| Decision::Continue),
        )
        .await;

    assert!(matches!(result, Err(ChirpError::Config(_))));
    assert_eq!(hits.count(), 0);
}

/// An error response whose body starts but never finishes.
fn stalled_error() -> Response {
    let chunks = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"Service"))])
        .chain(stream::pending());
    (StatusCode::SERVICE_UNAVAILABLE, Body::from_stream(chunks)).into_response()
}

async fn wait_for_state(
    handle: &SessionHandle,
    matches: impl Fn(ConnectionState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches(handle.state()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn close_interrupts_a_stalled_error_body() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                stalled_error()
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let task = StreamSession::new(credential(), config(&base))
        .unwrap()
        .spawn(
            StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Continue),
        );
    let handle = task.handle();

    tokio::time::timeout(Duration::from_secs(5), async {
        while hits.count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), ConnectionState::Connecting);

    handle.close();
    tokio::time::timeout(Duration::from_secs(3), task.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.state(), ConnectionState::Terminated);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stalled_error_body_is_bounded_by_connect_timeout() {
    let app = Router::new().route(PATH, post(|| async { stalled_error() }));
    let base = serve(app).await;

    let session = StreamSession::new(
        credential(),
        config(&base).with_connect_timeout(Duration::from_millis(100)),
    )
    .unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    tokio::time::timeout(
        Duration::from_secs(5),
        session.open(
            &StreamFilter::track(["python"]),
            recorder(&events, |_, _| Decision::Stop),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(*events.lock().unwrap(), vec![StreamEvent::Error { code: 503 }]);
}

#[tokio::test]
async fn oversized_frame_drops_connection_and_reconnects() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                match hits.hit() {
                    1 => body(
                        vec!["99999999999".to_string(), status_line(1, "swallowed")],
                        true,
                    ),
                    n => body(vec![status_line(n as u64, "after resync")], true),
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session =
        StreamSession::new(credential(), config(&base).with_max_frame_len(1024)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    tokio::time::timeout(
        Duration::from_secs(5),
        session.open(
            &StreamFilter::track(["python"]),
            recorder(&events, |event, _| match event {
                StreamEvent::Status(_) => Decision::Stop,
                _ => Decision::Continue,
            }),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(status_ids(&events.lock().unwrap()), vec![2]);
    assert_eq!(session.reconnects(), 1);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn in_band_error_with_continue_reconnects() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                match hits.hit() {
                    1 => body(vec![r#"{"code":420}"#.to_string()], true),
                    n => body(vec![status_line(n as u64, "back again")], true),
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |event, _| match event {
                StreamEvent::Status(_) => Decision::Stop,
                _ => Decision::Continue,
            }),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events[0], StreamEvent::Error { code: 420 });
    assert_eq!(status_ids(&events), vec![2]);
    assert_eq!(events.len(), 2);
    assert_eq!(session.reconnects(), 1);
    assert_eq!(hits.count(), 2);
}

#[tokio::test]
async fn throttled_connect_waits_for_retry_after() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                match hits.hit() {
                    1 => (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")], "").into_response(),
                    n => body(vec![status_line(n as u64, "after the wait")], true),
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    // Backoff alone would wait at most 5ms; the hint has to win.
    let session = StreamSession::new(credential(), config(&base)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();
    session
        .open(
            &StreamFilter::track(["python"]),
            recorder(&events, |event, _| match event {
                StreamEvent::Status(_) => Decision::Stop,
                _ => Decision::Continue,
            }),
        )
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    let events = events.lock().unwrap();
    assert_eq!(events[0], StreamEvent::Error { code: 429 });
    assert_eq!(status_ids(&events), vec![2]);
    assert_eq!(session.reconnects(), 1);
}

#[tokio::test]
async fn close_during_backoff_returns_promptly() {
    let hits = Hits::default();
    let app = Router::new()
        .route(
            PATH,
            post(|State(hits): State<Hits>| async move {
                hits.hit();
                StatusCode::SERVICE_UNAVAILABLE
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let slow = BackoffPolicy::exponential(Duration::from_secs(30), Duration::from_secs(30));
    let task = StreamSession::new(credential(), config(&base).with_backoff(slow))
        .unwrap()
        .spawn(
            StreamFilter::track(["python"]),
            FnHandler::new(|_: &StreamEvent| Decision::Continue),
        );
    let handle = task.handle();

    wait_for_state(&handle, |s| matches!(s, ConnectionState::Backoff { attempt: 1, .. })).await;
    task.close();

    tokio::time::timeout(Duration::from_secs(2), task.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.state(), ConnectionState::Terminated);
    assert_eq!(handle.reconnects(), 0);
    assert_eq!(hits.count(), 1);
}
