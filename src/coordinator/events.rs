//! Events published on the coordinator's broadcast bus.

use serde::{Deserialize, Serialize};

use crate::issue::Issue;
use crate::report::Summary;

/// Capacity of the broadcast channel. Slow subscribers lag rather than block.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A monitoring agent pushed an issue.
    Issue { agent_name: String, issue: Issue },
    /// A batch scan finished and its report was stored.
    ScanComplete { report_id: String, summary: Summary },
    AutoFix {
        issue_id: String,
        fixed: bool,
        message: String,
    },
    MonitoringStarted { agents: Vec<String> },
    MonitoringStopped,
}

impl CoordinatorEvent {
    /// Event name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::Issue { .. } => "issue",
            CoordinatorEvent::ScanComplete { .. } => "scan_complete",
            CoordinatorEvent::AutoFix { .. } => "auto_fix",
            CoordinatorEvent::MonitoringStarted { .. } => "monitoring_started",
            CoordinatorEvent::MonitoringStopped => "monitoring_stopped",
        }
    }
}
