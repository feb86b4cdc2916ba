//! Coordinator: agent registry, batch scans, live monitoring and reporting.
//!
//! The coordinator owns every piece of shared state (active issues, report
//! history, event bus). Agents never see it; they only receive a callback
//! that routes their pushed issues into [`Coordinator::handle_real_time_issue`].

mod events;

pub use events::{CoordinatorEvent, EVENT_CHANNEL_CAPACITY};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::agents::{default_agents, AgentRef, IssueCallback, Probes};
use crate::config::DiagnosticsConfig;
use crate::error::{DiagnosticsError, Result};
use crate::fix::{AutoFixer, FixOutcome};
use crate::issue::{Issue, IssueStatus, Severity};
use crate::logger::Logger;
use crate::report::{self, AgentResult, AgentRunStatus, EnvironmentInfo, ExportFormat, Report};

const COMPONENT: &str = "coordinator";

/// Outcome of one health check tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Monitoring-capable agents found inactive while monitoring was on.
    pub inactive_agents: Vec<String>,
    /// Active issues dropped for exceeding the retention window.
    pub evicted_issues: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub supports_monitoring: bool,
    pub active: bool,
}

/// Projection of the active issue set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_issues: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub agents: BTreeMap<String, AgentStatus>,
    pub monitoring: bool,
}

/// Auto-fix attempts spawned for live issues.
///
/// `epoch` advances on every stop. An attempt publishes its outcome only if the
/// epoch it was spawned in is still current, checked under this lock.
#[derive(Default)]
struct FixTasks {
    epoch: u64,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    config: DiagnosticsConfig,
    logger: Arc<Logger>,
    agents: Vec<AgentRef>,
    probes: Option<Probes>,
    fixer: AutoFixer,
    active_issues: RwLock<HashMap<String, Issue>>,
    history: RwLock<VecDeque<Arc<Report>>>,
    events: broadcast::Sender<CoordinatorEvent>,
    monitoring: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
    fix_tasks: Mutex<FixTasks>,
}

impl Inner {
    fn publish(&self, event: CoordinatorEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn handle_real_time_issue(self: &Arc<Self>, agent_name: &str, issue: Issue) {
        self.logger.log(
            crate::logger::LogLevel::Info,
            COMPONENT,
            format!("[{}] {} ({})", agent_name, issue.title, issue.severity),
            Some(serde_json::json!({ "issue_id": issue.id, "source": issue.source })),
        );

        if let Ok(mut active) = self.active_issues.write() {
            active.insert(issue.id.clone(), issue.clone());
        }

        let wants_fix = self.config.auto_fix && !issue.suggestions.is_empty();
        self.publish(CoordinatorEvent::Issue {
            agent_name: agent_name.to_string(),
            issue: issue.clone(),
        });

        if !wants_fix {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.logger.warn(
                    COMPONENT,
                    format!("No runtime available to auto-fix '{}'", issue.title),
                );
                return;
            }
        };
        let Ok(mut tasks) = self.fix_tasks.lock() else {
            return;
        };
        let epoch = tasks.epoch;
        let inner = Arc::clone(self);
        tasks.handles.retain(|h| !h.is_finished());
        tasks.handles.push(runtime.spawn(async move {
            inner.attempt_fix(&issue, Some(epoch)).await;
        }));
    }

    /// Run the fixer and publish the outcome. With `epoch` set, the outcome is
    /// dropped if fix tasks were cancelled since the attempt was spawned.
    async fn attempt_fix(&self, issue: &Issue, epoch: Option<u64>) -> FixOutcome {
        let outcome = self.fixer.fix(issue).await;
        let event = CoordinatorEvent::AutoFix {
            issue_id: outcome.issue_id.clone(),
            fixed: outcome.fixed,
            message: outcome.message.clone(),
        };
        match epoch {
            None => self.publish(event),
            Some(epoch) => {
                if let Ok(tasks) = self.fix_tasks.lock() {
                    if tasks.epoch == epoch {
                        self.publish(event);
                    } else {
                        self.logger.debug(
                            COMPONENT,
                            format!("Dropped auto-fix outcome for '{}' after stop", issue.title),
                        );
                    }
                }
            }
        }
        outcome
    }

    /// Abort pending auto-fix attempts and silence any still finishing.
    fn cancel_fixes(&self) {
        if let Ok(mut tasks) = self.fix_tasks.lock() {
            tasks.epoch += 1;
            for handle in tasks.handles.drain(..) {
                handle.abort();
            }
        }
    }

    fn run_health_check(&self) -> HealthCheck {
        let mut check = HealthCheck::default();

        if self.monitoring.load(Ordering::SeqCst) {
            for agent in &self.agents {
                if agent.supports_monitoring() && !agent.is_active() {
                    self.logger.warn(
                        COMPONENT,
                        format!("Agent {} is not monitoring", agent.name()),
                    );
                    check.inactive_agents.push(agent.name().to_string());
                }
            }
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::hours(self.config.active_issue_ttl_hours);
        if let Ok(mut active) = self.active_issues.write() {
            let before = active.len();
            active.retain(|_, issue| issue.timestamp >= cutoff);
            check.evicted_issues = before - active.len();
        }
        if check.evicted_issues > 0 {
            self.logger.info(
                COMPONENT,
                format!("Evicted {} stale issues", check.evicted_issues),
            );
        }
        check
    }
}

/// Central orchestrator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Coordinator over the built-in agents, configured from `config`.
    ///
    /// With real-time monitoring enabled, monitoring starts immediately, which
    /// requires a tokio runtime.
    pub fn new(config: DiagnosticsConfig) -> anyhow::Result<Self> {
        let logger = Arc::new(Logger::new(config.logger_options()));
        let (agents, probes) = default_agents(&config, Arc::clone(&logger))?;
        Self::build(config, logger, agents, Some(probes))
    }

    /// Coordinator over a caller-supplied registry. Agents keep the
    /// configuration they were given.
    pub fn with_agents(config: DiagnosticsConfig, agents: Vec<AgentRef>) -> anyhow::Result<Self> {
        let logger = Arc::new(Logger::new(config.logger_options()));
        Self::build(config, logger, agents, None)
    }

    fn build(
        config: DiagnosticsConfig,
        logger: Arc<Logger>,
        agents: Vec<AgentRef>,
        probes: Option<Probes>,
    ) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let fixer = AutoFixer::new(&config, Arc::clone(&logger));
        let monitor_on_start = config.real_time_monitoring;
        let repeat_window = issue_ttl(&config);
        for agent in &agents {
            agent.set_repeat_window(repeat_window);
        }

        let coordinator = Self {
            inner: Arc::new(Inner {
                config,
                logger,
                agents,
                probes,
                fixer,
                active_issues: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                events,
                monitoring: AtomicBool::new(false),
                health_task: Mutex::new(None),
                fix_tasks: Mutex::new(FixTasks::default()),
            }),
        };

        coordinator.inner.logger.info(
            COMPONENT,
            format!(
                "Initialized {} agents for {} environment",
                coordinator.inner.agents.len(),
                coordinator.inner.config.environment
            ),
        );

        if monitor_on_start {
            coordinator.start_monitoring()?;
        }
        Ok(coordinator)
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.inner.config
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.inner.logger
    }

    /// Instrumentation handles of the built-in agents.
    pub fn probes(&self) -> Option<&Probes> {
        self.inner.probes.as_ref()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.inner.agents.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    // ─── Batch scans ─────────────────────────────────────────────────────

    /// Scan with every agent, in registration order.
    pub async fn run_diagnostic(&self) -> Arc<Report> {
        self.inner.logger.info(COMPONENT, "Starting diagnostic scan");
        let agents = self.inner.agents.clone();
        self.scan_with(&agents).await
    }

    /// Scan with the named agent alone.
    pub async fn run_agent(&self, name: &str) -> Result<Arc<Report>> {
        let agent = self
            .inner
            .agents
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| DiagnosticsError::UnknownAgent(name.to_string()))?;
        self.inner
            .logger
            .info(COMPONENT, format!("Starting {} scan", name));
        Ok(self.scan_with(&[agent]).await)
    }

    async fn scan_with(&self, agents: &[AgentRef]) -> Arc<Report> {
        let mut issues = Vec::new();
        let mut results = BTreeMap::new();

        for agent in agents {
            let (found, result) = self.scan_agent(agent).await;
            issues.extend(found);
            results.insert(agent.name().to_string(), result);
        }

        let metadata = EnvironmentInfo::collect(
            &self.inner.config.project_root,
            self.inner.config.environment.as_str(),
        )
        .await;
        let report = Arc::new(Report::new(issues, results, metadata));

        if let Ok(mut history) = self.inner.history.write() {
            history.push_back(Arc::clone(&report));
            while history.len() > self.inner.config.history_capacity.max(1) {
                history.pop_front();
            }
        }

        let dir = self.inner.config.resolved_output_dir();
        match report::persist(&report, &dir).await {
            Ok(files) => self.inner.logger.info(
                COMPONENT,
                format!("Report saved to {}", files.json.display()),
            ),
            Err(e) => self.inner.logger.error(
                COMPONENT,
                format!("Failed to save report to {}: {}", dir.display(), e),
            ),
        }

        let s = &report.summary;
        self.inner.logger.info(
            COMPONENT,
            format!(
                "Scan complete: {} issues ({} critical, {} high, {} medium, {} low, {} info)",
                s.total_issues, s.critical_issues, s.high_issues, s.medium_issues, s.low_issues, s.info_issues
            ),
        );
        self.inner.publish(CoordinatorEvent::ScanComplete {
            report_id: report.id.clone(),
            summary: report.summary,
        });
        report
    }

    /// Run one agent's scan in its own task, bounded by the scan timeout.
    async fn scan_agent(&self, agent: &AgentRef) -> (Vec<Issue>, AgentResult) {
        let name = agent.name().to_string();
        let timeout = Duration::from_secs(self.inner.config.scan_timeout_secs);
        let started = Instant::now();

        let task_agent = Arc::clone(agent);
        let mut handle = tokio::spawn(async move { task_agent.scan().await });
        let outcome = tokio::time::timeout(timeout, &mut handle).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let failed = |status: AgentRunStatus, error: String| {
            self.inner
                .logger
                .error(COMPONENT, format!("Agent {} failed: {}", name, error));
            (
                Vec::new(),
                AgentResult {
                    status,
                    duration_ms,
                    issues_found: 0,
                    error: Some(error),
                },
            )
        };

        match outcome {
            Ok(Ok(Ok(issues))) => {
                self.inner.logger.debug(
                    COMPONENT,
                    format!("Agent {} found {} issues in {}ms", name, issues.len(), duration_ms),
                );
                let result = AgentResult {
                    status: AgentRunStatus::Success,
                    duration_ms,
                    issues_found: issues.len(),
                    error: None,
                };
                (issues, result)
            }
            Ok(Ok(Err(e))) => failed(AgentRunStatus::Error, format!("{:#}", e)),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "scan was cancelled".to_string()
                };
                failed(AgentRunStatus::Error, message)
            }
            Err(_) => {
                handle.abort();
                failed(
                    AgentRunStatus::Timeout,
                    format!("scan exceeded {}s", self.inner.config.scan_timeout_secs),
                )
            }
        }
    }

    pub fn latest_report(&self) -> Option<Arc<Report>> {
        self.inner.history.read().ok().and_then(|h| h.back().cloned())
    }

    /// Stored reports, oldest first.
    pub fn history(&self) -> Vec<Arc<Report>> {
        self.inner
            .history
            .read()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Render the latest report.
    pub fn export_report(&self, format: ExportFormat) -> Result<String> {
        let report = self.latest_report().ok_or(DiagnosticsError::NoReport)?;
        Ok(format.reporter().report(&report))
    }

    // ─── Live monitoring ─────────────────────────────────────────────────

    /// Store a pushed issue, publish it and maybe auto-fix it.
    pub fn handle_real_time_issue(&self, agent_name: &str, issue: Issue) {
        self.inner.handle_real_time_issue(agent_name, issue);
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    /// Wire every monitoring-capable agent to the coordinator and start the
    /// health check loop. Calling it while monitoring is a no-op.
    pub fn start_monitoring(&self) -> anyhow::Result<()> {
        if self.inner.monitoring.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.inner.monitoring.store(false, Ordering::SeqCst);
                anyhow::bail!("monitoring needs a tokio runtime: {}", e);
            }
        };

        let mut started = Vec::new();
        for agent in &self.inner.agents {
            if !agent.supports_monitoring() {
                continue;
            }
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let name = agent.name().to_string();
            let callback: IssueCallback = Arc::new(move |issue: Issue| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_real_time_issue(&name, issue);
                }
            });
            match agent.monitor(callback) {
                Ok(()) => started.push(agent.name().to_string()),
                Err(e) => self.inner.logger.error(
                    COMPONENT,
                    format!("Failed to start monitoring for {}: {:#}", agent.name(), e),
                ),
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = Duration::from_secs(self.inner.config.health_check_interval_secs.max(1));
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.run_health_check();
            }
        });
        if let Ok(mut slot) = self.inner.health_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }

        self.inner.logger.info(
            COMPONENT,
            format!("Monitoring started for {}", started.join(", ")),
        );
        self.inner
            .publish(CoordinatorEvent::MonitoringStarted { agents: started });
        Ok(())
    }

    /// Stop every agent, the health loop and pending auto-fix attempts.
    /// Calling it twice is the same as calling it once.
    pub fn stop_monitoring(&self) {
        if !self.inner.monitoring.swap(false, Ordering::SeqCst) {
            return;
        }
        for agent in &self.inner.agents {
            agent.stop();
        }
        self.inner.cancel_fixes();
        if let Ok(mut slot) = self.inner.health_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.inner.logger.info(COMPONENT, "Monitoring stopped");
        self.inner.publish(CoordinatorEvent::MonitoringStopped);
    }

    /// One health check tick, on demand.
    pub fn run_health_check(&self) -> HealthCheck {
        self.inner.run_health_check()
    }

    // ─── Active issues ───────────────────────────────────────────────────

    /// Active issues, most severe first, newest first within a severity.
    pub fn active_issues(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .inner
            .active_issues
            .read()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default();
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        issues
    }

    /// Move an active issue to another lifecycle state.
    pub fn set_issue_status(&self, id: &str, status: IssueStatus) -> Result<Issue> {
        let mut active = self
            .inner
            .active_issues
            .write()
            .map_err(|_| DiagnosticsError::UnknownIssue(id.to_string()))?;
        let current = active
            .get(id)
            .ok_or_else(|| DiagnosticsError::UnknownIssue(id.to_string()))?;
        let updated = current.with_status(status);
        active.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    pub fn statistics(&self) -> Statistics {
        let issues = self.active_issues();
        let mut stats = Statistics {
            total_issues: issues.len(),
            monitoring: self.is_monitoring(),
            ..Statistics::default()
        };
        for severity in Severity::ALL {
            stats.by_severity.insert(severity.as_str().to_string(), 0);
        }
        for issue in &issues {
            *stats
                .by_severity
                .entry(issue.severity.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_category
                .entry(issue.category.as_str().to_string())
                .or_insert(0) += 1;
        }
        for agent in &self.inner.agents {
            stats.agents.insert(
                agent.name().to_string(),
                AgentStatus {
                    supports_monitoring: agent.supports_monitoring(),
                    active: agent.is_active(),
                },
            );
        }
        stats
    }

    /// Attempt fixes for every issue that carries a suggestion and has a fixer.
    pub async fn fix_issues(&self, issues: &[Issue]) -> Vec<FixOutcome> {
        let mut outcomes = Vec::new();
        for issue in issues {
            if issue.suggestions.is_empty() || !self.inner.fixer.can_fix(issue) {
                continue;
            }
            outcomes.push(self.inner.attempt_fix(issue, None).await);
        }
        outcomes
    }
}

/// Retention of live issues. Re-checks push a persisting problem again after
/// the same span, so eviction never hides it for good.
fn issue_ttl(config: &DiagnosticsConfig) -> Duration {
    Duration::from_secs(config.active_issue_ttl_hours.max(0) as u64 * 60 * 60)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("agent panicked: {}", s)
    } else {
        "agent panicked".to_string()
    }
}
