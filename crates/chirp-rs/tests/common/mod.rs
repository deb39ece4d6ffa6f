//! Fake API server shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use chirp_rs::api::BackoffPolicy;
use chirp_rs::auth::Credential;
use serde_json::{Value, json};

/// Serve `app` on a random local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Request counter shared with route handlers.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    /// Record a request and return its 1-based number.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn credential() -> Credential {
    Credential::new("consumer", "consumer-secret", "token", "token-secret")
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::exponential(Duration::from_millis(1), Duration::from_millis(5))
}

/// A status object as both endpoints return it.
pub fn status(id: u64, screen_name: &str, text: &str) -> Value {
    json!({
        "id": id,
        "text": text,
        "created_at": "Wed Oct 10 20:19:24 +0000 2018",
        "source": "<a href=\"https://mobile.twitter.com\" rel=\"nofollow\">Twitter Web App</a>",
        "user": { "screen_name": screen_name },
    })
}
