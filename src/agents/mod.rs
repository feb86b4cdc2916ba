//! Diagnostic agents.
//!
//! An agent owns the detection logic for one failure domain. The coordinator
//! talks to every agent through the [`Agent`] trait:
//!
//! - `scan()` pulls a point-in-time list of issues (CI gate use case)
//! - `monitor()` pushes issues from continuous detection (live watch use case)
//!
//! Both sides share the same checks, so a domain is implemented once.

mod auth;
mod build;
mod hub;
mod network;
pub(crate) mod process;
mod runtime;
mod typescript;

pub use auth::AuthAgent;
pub use build::BuildAgent;
pub use hub::MonitorHub;
pub use network::NetworkAgent;
pub use runtime::RuntimeAgent;
pub use typescript::TypeScriptAgent;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::DiagnosticsConfig;
use crate::error::DiagnosticsError;
use crate::issue::{Category, Issue, Severity};
use crate::logger::Logger;
use crate::probe::{ConsoleProbe, HttpProbe};

/// Receives issues produced by an agent's continuous monitoring.
pub type IssueCallback = Arc<dyn Fn(Issue) + Send + Sync>;

/// Shared handle to a registered agent.
pub type AgentRef = Arc<dyn Agent>;

/// Monitoring state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Inactive,
    Active,
}

/// Contract every diagnostic agent implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry name, also used as the CLI subcommand.
    fn name(&self) -> &str;

    /// Domain the agent reports on.
    fn category(&self) -> Category;

    /// Merge options into the agent's current configuration.
    ///
    /// Options that do not fit the agent's option type are rejected and the
    /// previous configuration stays in effect.
    fn configure(&self, options: &Value) -> anyhow::Result<()>;

    /// Run every check once.
    ///
    /// A failing sub-check is reported as a "scan failed" issue rather than an
    /// error. `Err` is reserved for failures of the whole agent.
    async fn scan(&self) -> anyhow::Result<Vec<Issue>>;

    /// Whether `monitor()` does anything for this agent.
    fn supports_monitoring(&self) -> bool {
        false
    }

    /// Register a callback for continuously detected issues.
    ///
    /// The first call starts monitoring; later calls only add callbacks.
    fn monitor(&self, _callback: IssueCallback) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stop monitoring and drop every callback. Idempotent.
    fn stop(&self) {}

    /// How long a problem found by periodic re-checks stays suppressed before
    /// it is pushed again.
    fn set_repeat_window(&self, _window: std::time::Duration) {}

    fn is_active(&self) -> bool {
        false
    }

    fn state(&self) -> AgentState {
        if self.is_active() {
            AgentState::Active
        } else {
            AgentState::Inactive
        }
    }
}

/// High-severity issue standing in for a sub-check that could not run.
pub fn scan_failed_issue(
    agent: &str,
    category: Category,
    source: &str,
    error: impl std::fmt::Display,
) -> Issue {
    Issue::new(
        format!("{} scan failed", agent),
        format!("The '{}' check could not complete: {}", source, error),
        Severity::High,
        category,
        source,
    )
    .with_suggestion(format!(
        "Check the {} agent configuration and re-run the scan",
        agent
    ))
}

/// Deep-merge `options` into `current`, validating the result against `T`.
pub(crate) fn merge_options<T>(agent: &str, current: &T, options: &Value) -> anyhow::Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let invalid = |message: String| DiagnosticsError::InvalidAgentOptions {
        agent: agent.to_string(),
        message,
    };

    let mut merged = serde_json::to_value(current).map_err(|e| invalid(e.to_string()))?;
    crate::config::merge::deep_merge(&mut merged, options);
    let updated = serde_json::from_value(merged).map_err(|e| invalid(e.to_string()))?;
    Ok(updated)
}

/// Display form of a path relative to the project root.
pub(crate) fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Handles a host application uses to feed live observations to agents.
#[derive(Clone)]
pub struct Probes {
    pub http: HttpProbe,
    pub console: ConsoleProbe,
}

/// Build the built-in agents in registration order, configured from `config`.
pub fn default_agents(
    config: &DiagnosticsConfig,
    logger: Arc<Logger>,
) -> anyhow::Result<(Vec<AgentRef>, Probes)> {
    let root = config.project_root.clone();

    let auth = Arc::new(AuthAgent::new(root.clone(), Arc::clone(&logger)));
    let typescript = Arc::new(TypeScriptAgent::new(root.clone(), Arc::clone(&logger)));
    let runtime = Arc::new(RuntimeAgent::new(root.clone(), Arc::clone(&logger)));
    let build = Arc::new(BuildAgent::new(root, Arc::clone(&logger)));
    let network = Arc::new(NetworkAgent::new(Arc::clone(&logger)));

    auth.configure(&serde_json::to_value(&config.agents.auth)?)?;
    typescript.configure(&serde_json::to_value(&config.agents.typescript)?)?;
    runtime.configure(&serde_json::to_value(&config.agents.runtime)?)?;
    build.configure(&serde_json::to_value(&config.agents.build)?)?;
    network.configure(&serde_json::to_value(&config.agents.network)?)?;

    let probes = Probes {
        http: network.http_probe(),
        console: runtime.console_probe(),
    };

    let agents: Vec<AgentRef> = vec![
        auth as AgentRef,
        typescript as AgentRef,
        runtime as AgentRef,
        build as AgentRef,
        network as AgentRef,
    ];
    Ok((agents, probes))
}

/// Names of the built-in agents, in registration order.
pub const AGENT_NAMES: [&str; 5] = ["auth", "typescript", "runtime", "build", "network"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkOptions;
    use serde_json::json;

    #[test]
    fn test_merge_options_keeps_siblings() {
        let current = NetworkOptions::default();
        let updated: NetworkOptions =
            merge_options("network", &current, &json!({ "timeout_ms": 10 })).unwrap();
        assert_eq!(updated.timeout_ms, 10);
        assert_eq!(updated.slow_threshold_ms, current.slow_threshold_ms);
    }

    #[test]
    fn test_merge_options_rejects_wrong_type() {
        let current = NetworkOptions::default();
        let err = merge_options::<NetworkOptions>("network", &current, &json!({ "timeout_ms": "x" }))
            .unwrap_err();
        assert!(err.to_string().contains("network"));
    }

    #[test]
    fn test_scan_failed_issue_shape() {
        let issue = scan_failed_issue("typescript", Category::Typescript, "tsc", "not found");
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.source, "tsc");
        assert!(issue.title.contains("scan failed"));
        assert_eq!(issue.suggestions.len(), 1);
    }

    #[test]
    fn test_display_path_strips_root() {
        let root = Path::new("/srv/app");
        assert_eq!(display_path(root, Path::new("/srv/app/src/a.ts")), "src/a.ts");
        assert_eq!(display_path(root, Path::new("/other/b.ts")), "/other/b.ts");
    }

    #[tokio::test]
    async fn test_default_agents_registration_order() {
        let config = DiagnosticsConfig::default();
        let logger = Arc::new(Logger::silent(crate::logger::LogLevel::Error));
        let (agents, _probes) = default_agents(&config, logger).unwrap();
        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        assert_eq!(names, AGENT_NAMES.to_vec());
        assert!(agents.iter().all(|a| a.supports_monitoring()));
        assert!(agents.iter().all(|a| a.state() == AgentState::Inactive));
    }
}
