//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::issue::{IssueStatus, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub monitoring: bool,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanQuery {
    /// Run a single agent instead of all of them.
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuesQuery {
    pub status: Option<IssueStatus>,
    pub min_severity: Option<Severity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: IssueStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringResponse {
    pub monitoring: bool,
}
