//! In-process stand-in for the companion agent, shared by unit tests.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const SIMULATION_BODY: &str =
    r#"{"algorithm":"LRU","hits":12,"misses":38,"hitRatio":0.24}"#;

#[derive(Default)]
pub struct FakeAgentState {
    pub fail_stats: AtomicBool,
    pub malformed_stats: AtomicBool,
    /// Odd-numbered stats calls (0-based) fail when set.
    pub alternate_failures: AtomicBool,
    pub stats_delay_ms: AtomicU64,
    pub stats_calls: AtomicU32,
    pub in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    pub killed: Mutex<Vec<i32>>,
    pub configs: Mutex<Vec<Value>>,
    pub simulated: Mutex<Vec<u64>>,
}

pub struct FakeAgent {
    pub base_url: String,
    pub state: Arc<FakeAgentState>,
}

impl FakeAgent {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakeAgentState::default());
        let app = Router::new()
            .route("/api/stats", get(stats))
            .route("/api/process/kill", post(kill))
            .route("/api/cache/config", post(cache_config))
            .route("/api/cache/simulate", post(simulate))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake agent");
        let addr = listener.local_addr().expect("fake agent addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

/// A loopback address with nothing listening on it.
pub fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    let addr = listener.local_addr().expect("free port addr");
    drop(listener);
    format!("http://{addr}")
}

pub fn sample_stats() -> Value {
    json!({
        "memory": {"totalRam": 16_000_000_000_u64, "usedRam": 8_000_000_000_u64, "freeRam": 8_000_000_000_u64},
        "cache": {"algorithm": "LRU", "hits": 30, "misses": 10, "hitRatio": 0.75},
        "processes": [
            {"pid": 311, "name": "zsh", "memoryUsed": 4_096_000},
            {"pid": 12, "name": "agent", "memoryUsed": 52_428_800},
            {"pid": 907, "name": "browser", "memoryUsed": 734_003_200}
        ]
    })
}

async fn stats(State(state): State<Arc<FakeAgentState>>) -> Response {
    let call = state.stats_calls.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let delay = state.stats_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let alternate_fail = state.alternate_failures.load(Ordering::SeqCst) && call % 2 == 1;
    if state.fail_stats.load(Ordering::SeqCst) || alternate_fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, "down").into_response();
    }
    if state.malformed_stats.load(Ordering::SeqCst) {
        return (StatusCode::OK, r#"{"memory": 1}"#).into_response();
    }
    Json(sample_stats()).into_response()
}

async fn kill(State(state): State<Arc<FakeAgentState>>, Json(body): Json<Value>) -> Response {
    let pid = body.get("pid").and_then(Value::as_i64).unwrap_or(0) as i32;
    if pid == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "Missing PID"})),
        )
            .into_response();
    }
    state.killed.lock().unwrap().push(pid);
    Json(json!({"status": "success", "message": "Process terminated", "pid": pid})).into_response()
}

async fn cache_config(
    State(state): State<Arc<FakeAgentState>>,
    Json(body): Json<Value>,
) -> Response {
    state.configs.lock().unwrap().push(body);
    Json(json!({"status": "success"})).into_response()
}

async fn simulate(State(state): State<Arc<FakeAgentState>>, Json(body): Json<Value>) -> Response {
    let accesses: Vec<u64> = body
        .get("accesses")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    *state.simulated.lock().unwrap() = accesses;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        SIMULATION_BODY,
    )
        .into_response()
}

/// Presenter that keeps every delivered message.
#[derive(Default)]
pub struct Recorder {
    pub messages: Vec<crate::marshal::UiMessage>,
}

impl Recorder {
    pub fn of(&self, target: crate::marshal::UiTarget) -> Vec<&crate::marshal::UiMessage> {
        self.messages.iter().filter(|m| m.target == target).collect()
    }
}

impl crate::marshal::Presenter for Recorder {
    fn deliver(&mut self, message: crate::marshal::UiMessage) {
        self.messages.push(message);
    }
}
