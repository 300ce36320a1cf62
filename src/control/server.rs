//! The control-plane HTTP server (`--server ADDR`): the coordinator side
//! of the `/boot /run /stats /error /stop` surface.
//!
//! Built on `axum`, a natural fit for a small control-plane HTTP server.
//! State is a single `Mutex`-guarded registry
//! of connected remote nodes plus an aggregating [`crate::stats::StatsSink`]
//! per node name; there is no database behind this server; it is purely
//! in-memory coordination for the lifetime of one `finch --server` process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{BootRequest, BootResponse, ErrorReport, RunRequest, RunResponse, StatsBatch, StopRequest};

#[derive(Default)]
struct Registry {
    booted: HashMap<String, ()>,
    pending_run: Option<RunRequest>,
    stats: HashMap<String, Vec<super::ReportDto>>,
    errors: Vec<ErrorReport>,
}

struct ServerState {
    registry: Mutex<Registry>,
    cancel: CancellationToken,
}

/// Builds the control-plane router. Exposed separately from [`serve`] so
/// tests can drive it in-process without binding a real socket.
pub fn router(cancel: CancellationToken) -> Router {
    let state = Arc::new(ServerState {
        registry: Mutex::new(Registry::default()),
        cancel,
    });

    Router::new()
        .route("/boot", post(boot))
        .route("/run", post(run))
        .route("/stats", post(stats))
        .route("/error", post(error))
        .route("/stop", post(stop))
        .with_state(state)
}

/// Binds `addr` and serves the control plane until `cancel` fires.
pub async fn serve(addr: SocketAddr, cancel: CancellationToken) -> std::io::Result<()> {
    let app = router(cancel.clone());
    info!(%addr, "control-plane server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn boot(State(state): State<Arc<ServerState>>, Json(req): Json<BootRequest>) -> impl IntoResponse {
    state.registry.lock().booted.insert(req.name.clone(), ());
    info!(client = %req.name, "remote client booted");
    Json(BootResponse { accepted: true })
}

async fn run(State(state): State<Arc<ServerState>>, Json(req): Json<RunRequest>) -> impl IntoResponse {
    let mut registry = state.registry.lock();
    let known = registry.booted.contains_key(&req.name);
    registry.pending_run = Some(req);
    Json(RunResponse { accepted: known })
}

async fn stats(State(state): State<Arc<ServerState>>, Json(batch): Json<StatsBatch>) -> impl IntoResponse {
    state.registry.lock().stats.entry(batch.name).or_default().extend(batch.reports);
    axum::http::StatusCode::NO_CONTENT
}

async fn error(State(state): State<Arc<ServerState>>, Json(report): Json<ErrorReport>) -> impl IntoResponse {
    info!(client = %report.name, message = %report.message, "remote client reported a fatal error");
    state.registry.lock().errors.push(report);
    axum::http::StatusCode::NO_CONTENT
}

async fn stop(State(state): State<Arc<ServerState>>, Json(_req): Json<StopRequest>) -> impl IntoResponse {
    state.cancel.cancel();
    axum::http::StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn body_json(value: &impl serde::Serialize) -> Body {
        Body::from(serde_json::to_vec(value).unwrap())
    }

    #[tokio::test]
    async fn boot_then_run_is_accepted() {
        let cancel = CancellationToken::new();
        let app = router(cancel);

        let boot_req = Request::post("/boot")
            .header("content-type", "application/json")
            .body(body_json(&BootRequest { name: "node-1".into() }))
            .unwrap();
        let resp = app.clone().oneshot(boot_req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let run_req = Request::post("/run")
            .header("content-type", "application/json")
            .body(body_json(&RunRequest {
                name: "node-1".into(),
                stage_yaml: String::new(),
                trx_files: HashMap::new(),
                params: HashMap::new(),
            }))
            .unwrap();
        let resp = app.oneshot(run_req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn run_without_boot_reports_unaccepted() {
        let cancel = CancellationToken::new();
        let app = router(cancel);

        let run_req = Request::post("/run")
            .header("content-type", "application/json")
            .body(body_json(&RunRequest {
                name: "never-booted".into(),
                stage_yaml: String::new(),
                trx_files: HashMap::new(),
                params: HashMap::new(),
            }))
            .unwrap();
        let resp = app.oneshot(run_req).await.unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let decoded: RunResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!decoded.accepted);
    }

    #[tokio::test]
    async fn stop_cancels_the_token() {
        let cancel = CancellationToken::new();
        let app = router(cancel.clone());

        let req = Request::post("/stop")
            .header("content-type", "application/json")
            .body(body_json(&StopRequest::default()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::NO_CONTENT);
        assert!(cancel.is_cancelled());
    }
}
