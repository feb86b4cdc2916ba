//! HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::types::*;
use crate::coordinator::{Coordinator, Statistics};
use crate::error::DiagnosticsError;
use crate::issue::Issue;
use crate::logger::LogEntry;
use crate::report::{ExportFormat, Report};

/// Shared application state.
pub struct AppState {
    pub coordinator: Coordinator,
}

type ApiError = (StatusCode, String);

fn api_error(e: DiagnosticsError) -> ApiError {
    let status = match e {
        DiagnosticsError::UnknownAgent(_)
        | DiagnosticsError::UnknownIssue(_)
        | DiagnosticsError::NoReport => StatusCode::NOT_FOUND,
        DiagnosticsError::UnknownFormat(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/diagnostics/scan", post(run_scan))
        .route("/api/diagnostics/report", get(get_report))
        .route("/api/diagnostics/issues", get(list_issues))
        .route("/api/diagnostics/issues/:id/status", post(update_issue_status))
        .route("/api/diagnostics/statistics", get(get_statistics))
        .route("/api/diagnostics/logs", get(get_logs))
        .route("/api/diagnostics/events", get(stream_events))
        .route("/api/diagnostics/monitor/start", post(start_monitoring))
        .route("/api/diagnostics/monitor/stop", post(stop_monitoring))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn serve(coordinator: Coordinator, host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
    });
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    coordinator.stop_monitoring();
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: coordinator.config().environment.to_string(),
        monitoring: coordinator.is_monitoring(),
        agents: coordinator.agent_names(),
    })
}

/// Run a batch scan, optionally restricted to one agent.
async fn run_scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<Report>, ApiError> {
    let report = match query.agent {
        Some(name) => state.coordinator.run_agent(&name).await.map_err(api_error)?,
        None => state.coordinator.run_diagnostic().await,
    };
    Ok(Json(report.as_ref().clone()))
}

/// Export the latest report.
async fn get_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        Some(f) => f.parse::<ExportFormat>().map_err(api_error)?,
        None => ExportFormat::Json,
    };
    let body = state.coordinator.export_report(format).map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

/// List active issues.
async fn list_issues(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IssuesQuery>,
) -> Json<Vec<Issue>> {
    let issues = state
        .coordinator
        .active_issues()
        .into_iter()
        .filter(|i| query.status.map_or(true, |s| i.status == s))
        .filter(|i| query.min_severity.map_or(true, |s| i.severity >= s))
        .collect();
    Json(issues)
}

async fn update_issue_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Issue>, ApiError> {
    state
        .coordinator
        .set_issue_status(&id, req.status)
        .map(Json)
        .map_err(api_error)
}

async fn get_statistics(State(state): State<Arc<AppState>>) -> Json<Statistics> {
    Json(state.coordinator.statistics())
}

/// Recent coordinator log entries, oldest first.
async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(state.coordinator.logger().recent(query.limit))
}

/// Stream coordinator events via SSE.
async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.coordinator.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match Event::default().event(event.name()).json_data(&event) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => tracing::warn!("Failed to encode event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn start_monitoring(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MonitoringResponse>, ApiError> {
    state
        .coordinator
        .start_monitoring()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;
    Ok(Json(MonitoringResponse { monitoring: true }))
}

async fn stop_monitoring(State(state): State<Arc<AppState>>) -> Json<MonitoringResponse> {
    state.coordinator.stop_monitoring();
    Json(MonitoringResponse { monitoring: false })
}
