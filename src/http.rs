use crate::bridge::{Bridge, BridgeError};
use crate::metrics::Metrics;
use crate::view::ViewHandle;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub bridge: Bridge,
    pub view: ViewHandle,
}

#[derive(Debug, Deserialize)]
pub struct KillArgs {
    pub pid: i32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfigArgs {
    #[serde(rename = "sizeKB")]
    pub size_kb: u32,
    pub block_size: u32,
    pub policy: String,
}

#[derive(Debug, Deserialize)]
pub struct SimulateArgs {
    pub count: u32,
}

#[derive(Debug, Deserialize)]
pub struct ExportArgs {
    pub format: String,
    /// Bare file name, placed under the configured export directory.
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

pub fn build_router(metrics: Arc<Metrics>, bridge: Bridge, view: ViewHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/view", get(view_handler))
        .route("/api/events", get(events_handler))
        .route("/api/bridge/system-info", post(system_info))
        .route("/api/bridge/kill", post(kill))
        .route("/api/bridge/refresh", post(refresh))
        .route("/api/bridge/analytics", post(analytics))
        .route("/api/bridge/node-info", post(node_info))
        .route("/api/bridge/cache-config", post(cache_config))
        .route("/api/bridge/simulate", post(simulate))
        .route("/api/bridge/export", post(export))
        .with_state(HttpAppState {
            metrics,
            bridge,
            view,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn view_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.view.snapshot())
}

async fn events_handler(
    State(state): State<HttpAppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.view.subscribe()).filter_map(|item| match item {
        Ok(message) => match serde_json::to_string(&message) {
            Ok(data) => Some(Ok(Event::default().event(message.target.name()).data(data))),
            Err(err) => {
                warn!(error = %err, "failed to encode live event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "live subscriber lagged, events dropped");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn system_info(State(state): State<HttpAppState>) -> Response {
    accepted(state.bridge.load_system_info())
}

async fn refresh(State(state): State<HttpAppState>) -> Response {
    accepted(state.bridge.refresh())
}

async fn analytics(State(state): State<HttpAppState>) -> Response {
    accepted(state.bridge.load_analytics())
}

async fn node_info(State(state): State<HttpAppState>) -> Response {
    accepted(state.bridge.load_node_info())
}

async fn kill(
    State(state): State<HttpAppState>,
    args: Result<Json<KillArgs>, JsonRejection>,
) -> Response {
    match args {
        Ok(Json(args)) => accepted(state.bridge.kill_process(args.pid, args.name)),
        Err(rejection) => bad_args(rejection),
    }
}

async fn cache_config(
    State(state): State<HttpAppState>,
    args: Result<Json<CacheConfigArgs>, JsonRejection>,
) -> Response {
    match args {
        Ok(Json(args)) => accepted(state.bridge.update_cache_config(
            args.size_kb,
            args.block_size,
            args.policy,
        )),
        Err(rejection) => bad_args(rejection),
    }
}

async fn simulate(
    State(state): State<HttpAppState>,
    args: Result<Json<SimulateArgs>, JsonRejection>,
) -> Response {
    match args {
        Ok(Json(args)) => accepted(state.bridge.run_cache_simulation(args.count)),
        Err(rejection) => bad_args(rejection),
    }
}

async fn export(
    State(state): State<HttpAppState>,
    args: Result<Json<ExportArgs>, JsonRejection>,
) -> Response {
    match args {
        Ok(Json(args)) => accepted(state.bridge.export_stats(args.format, args.destination)),
        Err(rejection) => bad_args(rejection),
    }
}

fn accepted(result: Result<(), BridgeError>) -> Response {
    match result {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "rejected", "error": err.to_string()})),
        )
            .into_response(),
    }
}

fn bad_args(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "invalid", "error": rejection.body_text()})),
    )
        .into_response()
}
