//! HTTP API over a [`Coordinator`](crate::coordinator::Coordinator).
//!
//! ## Endpoints
//! - `GET  /api/health`
//! - `POST /api/diagnostics/scan`
//! - `GET  /api/diagnostics/report?format=json|markdown|csv`
//! - `GET  /api/diagnostics/issues`
//! - `POST /api/diagnostics/issues/:id/status`
//! - `GET  /api/diagnostics/statistics`
//! - `GET  /api/diagnostics/logs`
//! - `GET  /api/diagnostics/events` (SSE)
//! - `POST /api/diagnostics/monitor/start`
//! - `POST /api/diagnostics/monitor/stop`

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
