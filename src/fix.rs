//! Automatic remediation.
//!
//! Each [`Fixer`] claims the issues it knows how to handle. With auto-fix
//! enabled, the coordinator hands every live issue that carries a suggestion
//! to the [`AutoFixer`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::agents::process::run_command;
use crate::config::DiagnosticsConfig;
use crate::issue::{Category, Issue};
use crate::logger::Logger;

const COMPONENT: &str = "autofix";

/// How long a successful install answers later requests without running again.
pub const INSTALL_REUSE_WINDOW: Duration = Duration::from_secs(60);

/// Result of one fix attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub issue_id: String,
    pub fixer: Option<String>,
    pub fixed: bool,
    pub message: String,
}

#[async_trait]
pub trait Fixer: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, issue: &Issue) -> bool;

    /// Attempt the fix. `Ok` with `fixed == false` means the fixer ran but
    /// declined or could not repair the problem.
    async fn apply(&self, issue: &Issue) -> anyhow::Result<FixOutcome>;
}

/// Last finished installer run.
struct InstallRun {
    finished: Instant,
    fixed: bool,
    message: String,
}

/// Reinstalls packages when dependencies are missing or stale.
///
/// One installer runs at a time per project. Requests that queued behind a
/// run, or that arrive shortly after a successful one, share its outcome
/// instead of starting another install.
pub struct InstallDependencies {
    root: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    last_run: Mutex<Option<InstallRun>>,
}

impl InstallDependencies {
    pub fn new(root: PathBuf, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            root,
            command,
            timeout,
            last_run: Mutex::new(None),
        }
    }

    async fn install(&self) -> anyhow::Result<(bool, String)> {
        let output = run_command(&self.command, &self.root, self.timeout).await?;
        let message = if output.success() {
            format!("`{}` completed", self.command.join(" "))
        } else if output.timed_out {
            format!("`{}` timed out after {}s", self.command.join(" "), self.timeout.as_secs())
        } else {
            format!(
                "`{}` exited with {:?}: {}",
                self.command.join(" "),
                output.exit_code,
                output.tail(5)
            )
        };
        Ok((output.success(), message))
    }
}

#[async_trait]
impl Fixer for InstallDependencies {
    fn name(&self) -> &str {
        "install-dependencies"
    }

    fn applies_to(&self, issue: &Issue) -> bool {
        issue.category == Category::Build
            && matches!(issue.source.as_str(), "dependencies" | "dependencies-stale")
    }

    async fn apply(&self, issue: &Issue) -> anyhow::Result<FixOutcome> {
        let requested = Instant::now();
        let mut last_run = self.last_run.lock().await;

        if let Some(run) = last_run.as_ref() {
            let ran_while_queued = run.finished >= requested;
            let recent_success = run.fixed && run.finished.elapsed() < INSTALL_REUSE_WINDOW;
            if ran_while_queued || recent_success {
                return Ok(FixOutcome {
                    issue_id: issue.id.clone(),
                    fixer: Some(self.name().to_string()),
                    fixed: run.fixed,
                    message: format!("{} (shared install)", run.message),
                });
            }
        }

        let (fixed, message) = match self.install().await {
            Ok(result) => result,
            Err(e) => {
                *last_run = Some(InstallRun {
                    finished: Instant::now(),
                    fixed: false,
                    message: format!("Fix failed: {}", e),
                });
                return Err(e);
            }
        };
        *last_run = Some(InstallRun {
            finished: Instant::now(),
            fixed,
            message: message.clone(),
        });
        Ok(FixOutcome {
            issue_id: issue.id.clone(),
            fixer: Some(self.name().to_string()),
            fixed,
            message,
        })
    }
}

/// Claims credential and compiler configuration issues without touching them.
pub struct ManualReview;

#[async_trait]
impl Fixer for ManualReview {
    fn name(&self) -> &str {
        "manual-review"
    }

    fn applies_to(&self, issue: &Issue) -> bool {
        matches!(issue.category, Category::Auth | Category::Typescript)
    }

    async fn apply(&self, issue: &Issue) -> anyhow::Result<FixOutcome> {
        Ok(FixOutcome {
            issue_id: issue.id.clone(),
            fixer: Some(self.name().to_string()),
            fixed: false,
            message: format!("'{}' requires manual review", issue.title),
        })
    }
}

/// Ordered table of fixers; the first one that applies wins.
pub struct AutoFixer {
    fixers: Vec<Box<dyn Fixer>>,
    logger: Arc<Logger>,
}

impl AutoFixer {
    /// Built-in fixers configured from `config`.
    pub fn new(config: &DiagnosticsConfig, logger: Arc<Logger>) -> Self {
        let build = &config.agents.build;
        Self::with_fixers(
            vec![
                Box::new(InstallDependencies::new(
                    config.project_root.clone(),
                    build.install_command.clone(),
                    Duration::from_secs(build.timeout_secs),
                )) as Box<dyn Fixer>,
                Box::new(ManualReview) as Box<dyn Fixer>,
            ],
            logger,
        )
    }

    pub fn with_fixers(fixers: Vec<Box<dyn Fixer>>, logger: Arc<Logger>) -> Self {
        Self { fixers, logger }
    }

    pub fn can_fix(&self, issue: &Issue) -> bool {
        self.fixers.iter().any(|f| f.applies_to(issue))
    }

    /// Attempt to fix `issue`. Never fails; failures are reported in the outcome.
    pub async fn fix(&self, issue: &Issue) -> FixOutcome {
        let Some(fixer) = self.fixers.iter().find(|f| f.applies_to(issue)) else {
            self.logger
                .debug(COMPONENT, format!("No automatic fix for '{}'", issue.title));
            return FixOutcome {
                issue_id: issue.id.clone(),
                fixer: None,
                fixed: false,
                message: "No automatic fix available".to_string(),
            };
        };

        self.logger.info(
            COMPONENT,
            format!("Applying {} to '{}'", fixer.name(), issue.title),
        );
        let outcome = match fixer.apply(issue).await {
            Ok(outcome) => outcome,
            Err(e) => FixOutcome {
                issue_id: issue.id.clone(),
                fixer: Some(fixer.name().to_string()),
                fixed: false,
                message: format!("Fix failed: {}", e),
            },
        };

        if outcome.fixed {
            self.logger.info(COMPONENT, format!("Fixed '{}'", issue.title));
        } else {
            self.logger.warn(
                COMPONENT,
                format!("Could not fix '{}': {}", issue.title, outcome.message),
            );
        }
        outcome
    }
}
