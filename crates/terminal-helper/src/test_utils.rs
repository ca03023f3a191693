use std::collections::VecDeque;
use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const PART_GAP: Duration = Duration::from_millis(20);

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.push(format!("{prefix}-{nanos}-{seq}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Canned HTTP reply. The body goes out in `parts`, a short gap apart, and
/// ends afterwards (optionally after a pause).
#[derive(Clone)]
pub(crate) struct MockReply {
    status: u16,
    content_type: &'static str,
    parts: Vec<String>,
    hold_open: Option<Duration>,
}

impl MockReply {
    pub(crate) fn ndjson(lines: &[&str]) -> Self {
        let body: String = lines.iter().map(|line| format!("{line}\n")).collect();
        Self {
            status: 200,
            content_type: "application/x-ndjson",
            parts: vec![body],
            hold_open: None,
        }
    }

    pub(crate) fn chunked(parts: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "application/x-ndjson",
            parts: parts.iter().map(|part| part.to_string()).collect(),
            hold_open: None,
        }
    }

    pub(crate) fn json(value: Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            parts: vec![value.to_string()],
            hold_open: None,
        }
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            parts: vec![body.to_string()],
            hold_open: None,
        }
    }

    pub(crate) fn hold_open(mut self, pause: Duration) -> Self {
        self.hold_open = Some(pause);
        self
    }
}

impl IntoResponse for MockReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let pause = self.hold_open;
        let parts = stream::iter(self.parts.into_iter().enumerate()).then(|(index, part)| async move {
            if index > 0 {
                tokio::time::sleep(PART_GAP).await;
            }
            Ok::<_, Infallible>(Bytes::from(part))
        });
        let tail = stream::once(async move {
            if let Some(pause) = pause {
                tokio::time::sleep(pause).await;
            }
        })
        .filter_map(|()| async { None::<Result<Bytes, Infallible>> });
        (
            status,
            [(header::CONTENT_TYPE, self.content_type)],
            Body::from_stream(parts.chain(tail)),
        )
            .into_response()
    }
}

#[derive(Clone)]
struct MockState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// Inference backend serving `POST /api/chat`. Replies are handed out in
/// order, one per request, and every JSON body received is recorded.
pub(crate) struct MockBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub(crate) async fn start(replies: Vec<MockReply>) -> Self {
        let state = MockState {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let requests = Arc::clone(&state.requests);
        let app = Router::new()
            .route("/api/chat", post(chat))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::warn!(error = %err, "mock backend stopped");
            }
        });
        Self {
            addr,
            requests,
            task,
        }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn chat(State(state): State<MockState>, Json(body): Json<Value>) -> MockReply {
    state.requests.lock().expect("requests lock").push(body);
    state
        .replies
        .lock()
        .expect("replies lock")
        .pop_front()
        .unwrap_or_else(|| MockReply::status(500, "unexpected request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn serves_replies_in_order_and_records_bodies() {
        let backend = MockBackend::start(vec![
            MockReply::chunked(&["a", "b"]),
            MockReply::status(404, "missing"),
        ])
        .await;
        let http = reqwest::Client::new();
        let url = format!("{}/api/chat", backend.url());

        let first = http.post(&url).json(&json!({"n": 1})).send().await.expect("first");
        assert_eq!(first.status().as_u16(), 200);
        assert_eq!(first.text().await.expect("body"), "ab");

        let second = http.post(&url).json(&json!({"n": 2})).send().await.expect("second");
        assert_eq!(second.status().as_u16(), 404);

        let third = http.post(&url).json(&json!({"n": 3})).send().await.expect("third");
        assert_eq!(third.status().as_u16(), 500);

        assert_eq!(
            backend.requests(),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    }
}
