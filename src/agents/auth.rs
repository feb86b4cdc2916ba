//! Authentication configuration checks.
//!
//! Looks at credential environment variables (process environment first,
//! then `.env`-style files), secret strength, callback URL format and the
//! presence of an auth configuration module.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{merge_options, Agent, IssueCallback, MonitorHub};
use crate::config::AuthOptions;
use crate::issue::{Category, Issue, IssueLocation, Severity};
use crate::logger::Logger;

const NAME: &str = "auth";

/// Parse `KEY=VALUE` lines. Comments, blank lines and `export` prefixes are
/// accepted; surrounding quotes are removed.
pub(crate) fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    vars
}

/// Variables gathered from env files, with the file each came from.
#[derive(Debug, Default)]
pub(crate) struct EnvFiles {
    pub vars: HashMap<String, (String, String)>,
    pub found: Vec<String>,
}

impl EnvFiles {
    /// Read `files` under `root`. Earlier files take priority.
    async fn load(root: &Path, files: &[String]) -> Self {
        let mut env = Self::default();
        for name in files {
            let Ok(content) = tokio::fs::read_to_string(root.join(name)).await else {
                continue;
            };
            env.found.push(name.clone());
            for (key, value) in parse_env_file(&content) {
                env.vars.entry(key).or_insert((value, name.clone()));
            }
        }
        env
    }
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]" | "::1")
}

/// Evaluate the variable checks against env files and `process_env`.
///
/// `process_env` wins over values read from files.
pub(crate) fn check_variables<F>(options: &AuthOptions, files: &EnvFiles, process_env: F) -> Vec<Issue>
where
    F: Fn(&str) -> Option<String>,
{
    let mut issues = Vec::new();
    let lookup = |name: &str| -> Option<(String, Option<String>)> {
        if let Some(value) = process_env(name).filter(|v| !v.is_empty()) {
            return Some((value, None));
        }
        files
            .vars
            .get(name)
            .filter(|(v, _)| !v.is_empty())
            .map(|(v, file)| (v.clone(), Some(file.clone())))
    };

    if files.found.is_empty() && !options.env_files.is_empty() {
        issues.push(
            Issue::new(
                "No environment files found",
                format!(
                    "None of {} exist in the project root; only the process environment was checked",
                    options.env_files.join(", ")
                ),
                Severity::Info,
                Category::Auth,
                "env-files",
            )
            .with_suggestion("Create .env.local with the credentials the application needs"),
        );
    }

    for name in &options.required_env {
        if lookup(name).is_some() {
            continue;
        }
        let secret = options.secret_env.contains(name);
        issues.push(
            Issue::new(
                format!("Missing environment variable: {}", name),
                format!("{} is required for authentication but is not set", name),
                if secret { Severity::Critical } else { Severity::High },
                Category::Auth,
                "env-vars",
            )
            .with_metadata("variable", Value::String(name.clone()))
            .with_suggestions([
                format!("Add {} to .env.local", name),
                "Restart the development server after changing environment files".to_string(),
            ]),
        );
    }

    for name in &options.secret_env {
        let Some((value, file)) = lookup(name) else {
            continue;
        };
        let length = value.chars().count();
        if length >= options.min_secret_length {
            continue;
        }
        let mut issue = Issue::new(
            format!("Weak secret: {}", name),
            format!(
                "{} is {} characters long; at least {} are expected",
                name, length, options.min_secret_length
            ),
            Severity::Medium,
            Category::Auth,
            "secret-strength",
        )
        .with_suggestion("Generate a new secret with `openssl rand -base64 32`");
        if let Some(file) = file {
            issue = issue.with_location(IssueLocation::file(file));
        }
        issues.push(issue);
    }

    for name in &options.url_env {
        let Some((value, file)) = lookup(name) else {
            continue;
        };
        let location = file.map(IssueLocation::file);
        match url::Url::parse(&value) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                let local = url.host_str().map(is_local_host).unwrap_or(false);
                if url.scheme() == "http" && !local {
                    let mut issue = Issue::new(
                        format!("Insecure URL in {}", name),
                        format!("{} uses plain http for a non-local host: {}", name, value),
                        Severity::Low,
                        Category::Security,
                        "url-format",
                    )
                    .with_suggestion("Use https outside local development");
                    if let Some(location) = location {
                        issue = issue.with_location(location);
                    }
                    issues.push(issue);
                }
            }
            other => {
                let reason = match other {
                    Ok(url) => format!("unsupported scheme '{}'", url.scheme()),
                    Err(e) => e.to_string(),
                };
                let mut issue = Issue::new(
                    format!("Invalid URL in {}", name),
                    format!("{} is not a valid http(s) URL: {}", name, reason),
                    Severity::High,
                    Category::Auth,
                    "url-format",
                )
                .with_metadata("value", Value::String(value.clone()))
                .with_suggestion(format!(
                    "Set {} to the absolute base URL, e.g. http://localhost:3000",
                    name
                ));
                if let Some(location) = location {
                    issue = issue.with_location(location);
                }
                issues.push(issue);
            }
        }
    }

    issues
}

fn check_config_files(root: &Path, options: &AuthOptions) -> Option<Issue> {
    if options.config_files.is_empty() || options.config_files.iter().any(|f| root.join(f).is_file()) {
        return None;
    }
    Some(
        Issue::new(
            "Auth configuration file not found",
            format!(
                "Expected one of: {}",
                options.config_files.join(", ")
            ),
            Severity::High,
            Category::Auth,
            "config-files",
        )
        .with_suggestion("Create the auth configuration module and export the provider setup"),
    )
}

struct AuthChecks {
    root: PathBuf,
    logger: Arc<Logger>,
    options: RwLock<AuthOptions>,
}

impl AuthChecks {
    fn options(&self) -> AuthOptions {
        self.options.read().map(|o| o.clone()).unwrap_or_default()
    }

    async fn run(&self) -> Vec<Issue> {
        let options = self.options();
        if !options.enabled {
            return Vec::new();
        }

        let files = EnvFiles::load(&self.root, &options.env_files).await;
        self.logger.debug(
            NAME,
            format!("Loaded {} variables from {:?}", files.vars.len(), files.found),
        );

        let mut issues = check_variables(&options, &files, |name| std::env::var(name).ok());
        issues.extend(check_config_files(&self.root, &options));
        issues
    }
}

/// Checks credential configuration.
pub struct AuthAgent {
    checks: Arc<AuthChecks>,
    hub: Arc<MonitorHub>,
}

impl AuthAgent {
    pub fn new(root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            checks: Arc::new(AuthChecks {
                root,
                logger,
                options: RwLock::new(AuthOptions::default()),
            }),
            hub: MonitorHub::new(NAME),
        }
    }

    pub fn options(&self) -> AuthOptions {
        self.checks.options()
    }
}

#[async_trait]
impl Agent for AuthAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Auth
    }

    fn configure(&self, options: &Value) -> anyhow::Result<()> {
        let updated = merge_options(NAME, &self.checks.options(), options)?;
        if let Ok(mut current) = self.checks.options.write() {
            *current = updated;
        }
        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<Vec<Issue>> {
        Ok(self.checks.run().await)
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
        let spawned = self.hub.spawn_periodic(interval, move || {
            let checks = Arc::clone(&checks);
            async move { checks.run().await }
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

    fn options() -> AuthOptions {
        AuthOptions {
            required_env: vec!["APP_SECRET".to_string(), "APP_URL".to_string(), "APP_ID".to_string()],
            secret_env: vec!["APP_SECRET".to_string()],
            url_env: vec!["APP_URL".to_string()],
            config_files: Vec::new(),
            ..AuthOptions::default()
        }
    }

    fn files(pairs: &[(&str, &str)]) -> EnvFiles {
        EnvFiles {
            vars: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), (v.to_string(), ".env.local".to_string())))
                .collect(),
            found: vec![".env.local".to_string()],
        }
    }

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# comment\nexport A=1\nB = \"two\"\nC='three'\n\nbroken line\n=nokey\nD=a=b\n",
        );
        assert_eq!(vars["A"], "1");
        assert_eq!(vars["B"], "two");
        assert_eq!(vars["C"], "three");
        assert_eq!(vars["D"], "a=b");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_missing_secret_is_critical() {
        let issues = check_variables(&options(), &files(&[("APP_URL", "http://localhost:3000")]), |_| None);
        let secret = issues.iter().find(|i| i.title.contains("APP_SECRET")).unwrap();
        assert_eq!(secret.severity, Severity::Critical);
        let id = issues.iter().find(|i| i.title.contains("APP_ID")).unwrap();
        assert_eq!(id.severity, Severity::High);
    }

    #[test]
    fn test_process_env_overrides_files() {
        let env = files(&[("APP_URL", "not a url")]);
        let issues = check_variables(&options(), &env, |name| match name {
            "APP_URL" => Some("https://example.com".to_string()),
            _ => None,
        });
        assert!(issues.iter().all(|i| i.source != "url-format"));
    }

    #[test]
    fn test_weak_secret_and_bad_url() {
        let env = files(&[
            ("APP_SECRET", "short"),
            ("APP_URL", "localhost:3000/path"),
            ("APP_ID", "id"),
        ]);
        let issues = check_variables(&options(), &env, |_| None);
        let weak = issues.iter().find(|i| i.source == "secret-strength").unwrap();
        assert_eq!(weak.severity, Severity::Medium);
        assert_eq!(weak.file(), Some(".env.local"));
        let url = issues.iter().find(|i| i.source == "url-format").unwrap();
        assert_eq!(url.severity, Severity::High);
    }

    #[test]
    fn test_plain_http_on_remote_host_is_flagged() {
        let secret = "x".repeat(40);
        let env = files(&[
            ("APP_SECRET", secret.as_str()),
            ("APP_URL", "http://app.example.com"),
            ("APP_ID", "id"),
        ]);
        let issues = check_variables(&options(), &env, |_| None);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, Category::Security);
        assert_eq!(issues[0].severity, Severity::Low);
    }

    #[test]
    fn test_no_env_files_is_informational() {
        let issues = check_variables(&options(), &EnvFiles::default(), |name| {
            Some(format!("{}-{}", name, "x".repeat(40)))
        });
        let note = issues.iter().find(|i| i.source == "env-files").unwrap();
        assert_eq!(note.severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_scan_reads_env_files_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env.local"), "DIAG_AUTH_TEST_SECRET=short\n").unwrap();
        std::fs::write(
            dir.path().join(".env"),
            format!("DIAG_AUTH_TEST_SECRET={}\n", "y".repeat(40)),
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/auth.ts"), "export {}").unwrap();

        let agent = AuthAgent::new(dir.path().to_path_buf(), Arc::new(Logger::silent(LogLevel::Error)));
        agent
            .configure(&json!({
                "required_env": ["DIAG_AUTH_TEST_SECRET"],
                "secret_env": ["DIAG_AUTH_TEST_SECRET"],
                "url_env": [],
                "config_files": ["lib/auth.ts"]
            }))
            .unwrap();

        let issues = agent.scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].source, "secret-strength");
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AuthAgent::new(dir.path().to_path_buf(), Arc::new(Logger::silent(LogLevel::Error)));
        agent
            .configure(&json!({ "required_env": [], "config_files": ["lib/auth.ts"] }))
            .unwrap();
        let issues = agent.scan().await.unwrap();
        assert!(issues.iter().any(|i| i.source == "config-files" && i.severity == Severity::High));
    }

    #[tokio::test]
    async fn test_disabled_agent_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AuthAgent::new(dir.path().to_path_buf(), Arc::new(Logger::silent(LogLevel::Error)));
        agent.configure(&json!({ "enabled": false })).unwrap();
        assert!(agent.scan().await.unwrap().is_empty());
    }

    #[test]
    fn test_configure_rejects_bad_options() {
        let agent = AuthAgent::new(PathBuf::from("."), Arc::new(Logger::silent(LogLevel::Error)));
        assert!(agent.configure(&json!({ "min_secret_length": "long" })).is_err());
        assert_eq!(agent.options().min_secret_length, 32);
    }

    #[tokio::test]
    async fn test_monitor_lifecycle() {
        let agent = AuthAgent::new(PathBuf::from("."), Arc::new(Logger::silent(LogLevel::Error)));
        agent.monitor(Arc::new(|_issue: Issue| {})).unwrap();
        assert!(agent.is_active());
        agent.stop();
        agent.stop();
        assert!(!agent.is_active());
    }
}
