//! Build and dependency health.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;

use super::process::run_command;
use super::{display_path, merge_options, scan_failed_issue, Agent, IssueCallback, MonitorHub};
use crate::config::BuildOptions;
use crate::issue::{Category, Issue, IssueLocation, Severity};
use crate::logger::Logger;

const NAME: &str = "build";

/// Declared dependency names from a package manifest.
pub(crate) fn declared_dependencies(manifest: &Value) -> Vec<String> {
    let mut names: Vec<String> = ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| manifest.get(*key).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    names
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

struct BuildChecks {
    root: PathBuf,
    logger: Arc<Logger>,
    options: RwLock<BuildOptions>,
}

impl BuildChecks {
    fn options(&self) -> BuildOptions {
        self.options.read().map(|o| o.clone()).unwrap_or_default()
    }

    /// Static checks; the build itself only runs when `with_build` is set.
    async fn run(&self, with_build: bool) -> Vec<Issue> {
        let options = self.options();
        if !options.enabled {
            return Vec::new();
        }

        let manifest_path = self.root.join(&options.manifest);
        let manifest_name = display_path(&self.root, &manifest_path);

        let content = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(_) => {
                return vec![Issue::new(
                    format!("{} not found", manifest_name),
                    format!("No package manifest at {}", manifest_path.display()),
                    Severity::Critical,
                    Category::Build,
                    "manifest",
                )
                .with_suggestion("Run `npm init` or point build.manifest at the project manifest")];
            }
        };

        let manifest: Value = match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                let line = u32::try_from(e.line()).unwrap_or(0);
                return vec![Issue::new(
                    format!("Invalid {}", manifest_name),
                    format!("Could not parse {}: {}", manifest_name, e),
                    Severity::Critical,
                    Category::Build,
                    "manifest",
                )
                .with_location(IssueLocation::at(&manifest_name, line, None))
                .with_suggestion("Fix the JSON syntax of the manifest")];
            }
        };

        let mut issues = Vec::new();

        if manifest.pointer("/scripts/build").is_none() {
            issues.push(
                Issue::new(
                    "No build script",
                    format!("{} defines no \"build\" script", manifest_name),
                    Severity::Low,
                    Category::Build,
                    "scripts",
                )
                .with_location(IssueLocation::file(&manifest_name))
                .with_suggestion("Add a \"build\" entry under \"scripts\""),
            );
        }

        let dependencies = declared_dependencies(&manifest);
        if !dependencies.is_empty() {
            issues.extend(self.check_dependencies(&options, &manifest_path, &manifest_name, &dependencies));
        }

        if with_build && options.run_build {
            issues.extend(self.run_build(&options).await);
        }
        issues
    }

    fn check_dependencies(
        &self,
        options: &BuildOptions,
        manifest_path: &Path,
        manifest_name: &str,
        dependencies: &[String],
    ) -> Vec<Issue> {
        let mut issues = Vec::new();
        let node_modules = self.root.join("node_modules");

        if !node_modules.is_dir() {
            issues.push(
                Issue::new(
                    "Dependencies not installed",
                    format!(
                        "{} declares {} dependencies but node_modules does not exist",
                        manifest_name,
                        dependencies.len()
                    ),
                    Severity::High,
                    Category::Build,
                    "dependencies",
                )
                .with_metadata("install_command", Value::String(options.install_command.join(" ")))
                .with_suggestion(format!("Run `{}`", options.install_command.join(" "))),
            );
        } else {
            for name in dependencies {
                if node_modules.join(name).exists() {
                    continue;
                }
                issues.push(
                    Issue::new(
                        format!("Missing dependency: {}", name),
                        format!("{} is declared in {} but not installed", name, manifest_name),
                        Severity::Medium,
                        Category::Build,
                        "dependencies",
                    )
                    .with_metadata("package", Value::String(name.clone()))
                    .with_suggestion(format!("Run `{}`", options.install_command.join(" "))),
                );
            }

            let install_marker = [node_modules.join(".package-lock.json"), node_modules.clone()]
                .into_iter()
                .find(|p| p.exists());
            let stale = match (modified(manifest_path), install_marker.as_deref().and_then(modified)) {
                (Some(manifest), Some(installed)) => manifest > installed,
                _ => false,
            };
            if stale {
                issues.push(
                    Issue::new(
                        "Dependencies may be out of date",
                        format!("{} changed after the last install", manifest_name),
                        Severity::Medium,
                        Category::Build,
                        "dependencies-stale",
                    )
                    .with_suggestion(format!("Run `{}`", options.install_command.join(" "))),
                );
            }
        }

        if !options.lockfiles.iter().any(|f| self.root.join(f).exists()) {
            issues.push(
                Issue::new(
                    "No lockfile found",
                    format!("None of {} exist; installs are not reproducible", options.lockfiles.join(", ")),
                    Severity::Medium,
                    Category::Build,
                    "lockfile",
                )
                .with_suggestion("Commit the lockfile produced by your package manager"),
            );
        }
        issues
    }

    async fn run_build(&self, options: &BuildOptions) -> Vec<Issue> {
        self.logger
            .info(NAME, format!("Running {}", options.build_command.join(" ")));
        let timeout = Duration::from_secs(options.timeout_secs);
        let output = match run_command(&options.build_command, &self.root, timeout).await {
            Ok(output) => output,
            Err(e) => return vec![scan_failed_issue(NAME, Category::Build, "build", e)],
        };

        if output.timed_out {
            return vec![Issue::new(
                "Build timed out",
                format!("The build did not finish within {}s", options.timeout_secs),
                Severity::High,
                Category::Build,
                "build",
            )
            .with_suggestion("Raise build.timeout_secs or investigate slow build steps")];
        }
        if !output.success() {
            return vec![Issue::new(
                "Build failed",
                format!(
                    "`{}` exited with {:?}:\n{}",
                    options.build_command.join(" "),
                    output.exit_code,
                    output.tail(30)
                ),
                Severity::High,
                Category::Build,
                "build",
            )
            .with_metadata("duration_ms", (output.duration.as_millis() as u64).into())
            .with_suggestion("Run the build locally and fix the first reported error")];
        }

        self.logger.info(
            NAME,
            format!("Build succeeded in {}ms", output.duration.as_millis()),
        );
        Vec::new()
    }
}

/// Checks the package manifest, installed dependencies and optionally the build.
pub struct BuildAgent {
    checks: Arc<BuildChecks>,
    hub: Arc<MonitorHub>,
}

impl BuildAgent {
    pub fn new(root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            checks: Arc::new(BuildChecks {
                root,
                logger,
                options: RwLock::new(BuildOptions::default()),
            }),
            hub: MonitorHub::new(NAME),
        }
    }

    pub fn options(&self) -> BuildOptions {
        self.checks.options()
    }
}

#[async_trait]
impl Agent for BuildAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Build
    }

    fn configure(&self, options: &Value) -> anyhow::Result<()> {
        let updated = merge_options(NAME, &self.checks.options(), options)?;
        if let Ok(mut current) = self.checks.options.write() {
            *current = updated;
        }
        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<Vec<Issue>> {
        Ok(self.checks.run(true).await)
    }

    fn supports_monitoring(&self) -> bool {
        true
    }

    fn monitor(&self, callback: IssueCallback) -> anyhow::Result<()> {
        if !self.hub.register(callback) {
            return Ok(());
        }
        let interval = Duration::from_secs(self.checks.options().recheck_interval_secs);
        let checks = Arc::clone(&self.checks);
        // Re-checks never run the build.
        let spawned = self.hub.spawn_periodic(interval, move || {
            let checks = Arc::clone(&checks);
            async move { checks.run(false).await }
        });
        if let Err(e) = spawned {
            self.hub.stop();
            return Err(e);
        }
        self.checks.logger.info(NAME, "Monitoring started");
        Ok(())
    }

    fn stop(&self) {
        if self.hub.stop() {
            self.checks.logger.info(NAME, "Monitoring stopped");
        }
    }

    fn set_repeat_window(&self, window: Duration) {
        self.hub.set_repeat_window(window);
    }

    fn is_active(&self) -> bool {
        self.hub.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use serde_json::json;

    fn agent(root: &Path) -> BuildAgent {
        BuildAgent::new(root.to_path_buf(), Arc::new(Logger::silent(LogLevel::Error)))
    }

    fn write_manifest(root: &Path, manifest: Value) {
        std::fs::write(root.join("package.json"), manifest.to_string()).unwrap();
    }

    #[test]
    fn test_declared_dependencies() {
        let manifest = json!({
            "dependencies": { "next": "14", "react": "18" },
            "devDependencies": { "typescript": "5", "react": "18" }
        });
        assert_eq!(declared_dependencies(&manifest), vec!["next", "react", "typescript"]);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let issues = agent(dir.path()).scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].source, "manifest");
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{ nope").unwrap();
        let issues = agent(dir.path()).scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].title.starts_with("Invalid"));
    }

    #[tokio::test]
    async fn test_dependencies_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            json!({ "scripts": { "build": "next build" }, "dependencies": { "next": "14" } }),
        );
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();

        let issues = agent(dir.path()).scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Dependencies not installed");
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].source, "dependencies");
    }

    #[tokio::test]
    async fn test_missing_single_dependency_and_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/next")).unwrap();
        write_manifest(
            dir.path(),
            json!({ "dependencies": { "next": "14", "react": "18" } }),
        );
        // Make the install newer than the manifest.
        std::fs::write(dir.path().join("node_modules/.package-lock.json"), "{}").unwrap();

        let issues = agent(dir.path()).scan().await.unwrap();
        let sources: Vec<&str> = issues.iter().map(|i| i.source.as_str()).collect();
        assert!(sources.contains(&"scripts"));
        assert!(sources.contains(&"lockfile"));
        let missing: Vec<&Issue> = issues.iter().filter(|i| i.title.starts_with("Missing dependency")).collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].title.ends_with("react"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_is_high() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), json!({ "scripts": { "build": "x" } }));
        let a = agent(dir.path());
        a.configure(&json!({
            "run_build": true,
            "build_command": ["sh", "-c", "echo 'Module not found' >&2; exit 1"]
        }))
        .unwrap();

        let issues = a.scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Build failed");
        assert!(issues[0].description.contains("Module not found"));
    }
}
