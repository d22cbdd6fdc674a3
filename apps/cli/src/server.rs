//! HTTP entry point: `GET /healthz` and `POST /run`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use regbrief_core::{Orchestrator, RunRequest, SilentProgress};
use regbrief_shared::{CancelToken, DefaultsConfig};

struct AppState {
    orchestrator: Orchestrator,
    defaults: DefaultsConfig,
    cancel: CancelToken,
}

/// `POST /run` body; every field is optional and an empty body means defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunBody {
    topic: Option<String>,
    limit: Option<usize>,
    dry_run: Option<bool>,
}

pub(crate) fn router(orchestrator: Orchestrator, defaults: DefaultsConfig, cancel: CancelToken) -> Router {
    let state = Arc::new(AppState {
        orchestrator,
        defaults,
        cancel,
    });

    Router::new()
        .route("/healthz", get(healthz))
        .route("/run", post(run))
        .with_state(state)
}

/// Listen on `0.0.0.0:<port>` until Ctrl-C.
pub(crate) async fn serve(
    orchestrator: Orchestrator,
    defaults: DefaultsConfig,
    port: u16,
) -> std::io::Result<()> {
    let cancel = CancelToken::new();
    let app = router(orchestrator, defaults, cancel.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "regbrief server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            cancel.cancel();
        })
        .await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Empty body gives the defaults; anything else must be a JSON `RunBody`.
fn parse_run_body(headers: &HeaderMap, raw: &[u8]) -> std::result::Result<RunBody, String> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunBody::default());
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"));
    if !is_json {
        return Err("expected request with `Content-Type: application/json`".to_string());
    }

    Json::<RunBody>::from_bytes(raw)
        .map(|Json(body)| body)
        .map_err(|rejection| rejection.body_text())
}

async fn run(State(state): State<Arc<AppState>>, headers: HeaderMap, raw: Bytes) -> Response {
    let body = match parse_run_body(&headers, &raw) {
        Ok(body) => body,
        Err(message) => {
            warn!(%message, "rejected run request body");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };
    let request = RunRequest {
        topic: body.topic.unwrap_or_else(|| state.defaults.topic.clone()),
        limit: body.limit.unwrap_or(state.defaults.limit),
        dry_run: body.dry_run.unwrap_or(false),
    };

    match state
        .orchestrator
        .run(&request, &SilentProgress, &state.cancel)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "run request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
