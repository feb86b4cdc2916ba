//! Runtime error detection from application logs and the console probe.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use super::{display_path, merge_options, scan_failed_issue, Agent, IssueCallback, MonitorHub};
use crate::config::RuntimeOptions;
use crate::issue::{truncate, Category, Issue, IssueLocation, Severity};
use crate::logger::Logger;
use crate::probe::ConsoleProbe;

const NAME: &str = "runtime";
const LOG_SEARCH_DEPTH: usize = 3;

/// Compile the configured signatures. Invalid ones become scan-failed issues.
fn compile_patterns(patterns: &[String]) -> (Vec<Regex>, Vec<Issue>) {
    let mut compiled = Vec::new();
    let mut failures = Vec::new();
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(re) => compiled.push(re),
            Err(e) => failures.push(
                scan_failed_issue(NAME, Category::Runtime, "log-patterns", e)
                    .with_metadata("pattern", Value::String(pattern.clone())),
            ),
        }
    }
    (compiled, failures)
}

/// Log files under each configured path. Plain files are taken as-is;
/// directories are searched for `*.log`.
fn collect_log_files(root: &Path, log_paths: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in log_paths {
        let path = root.join(entry);
        if path.is_file() {
            files.push(path);
        } else if path.is_dir() {
            files.extend(
                WalkDir::new(&path)
                    .max_depth(LOG_SEARCH_DEPTH)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
                    .map(|e| e.into_path()),
            );
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Issues for the lines of one log file that match a signature.
///
/// `first_line` is the 1-based line number of the first line in `content`.
/// Repeated lines are reported once with an occurrence count.
pub(crate) fn scan_log_content(
    display_name: &str,
    content: &str,
    first_line: usize,
    patterns: &[Regex],
    max_issues: usize,
) -> Vec<Issue> {
    let mut issues: Vec<Issue> = Vec::new();
    let mut by_line: HashMap<String, (usize, u64)> = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        let text = line.trim();
        let Some(pattern) = patterns.iter().find(|p| p.is_match(text)) else {
            continue;
        };
        if let Some((slot, count)) = by_line.get_mut(text) {
            *count += 1;
            issues[*slot] = issues[*slot]
                .clone()
                .with_metadata("occurrences", (*count).into());
            continue;
        }
        if issues.len() >= max_issues {
            continue;
        }
        let line_number = u32::try_from(first_line + index).unwrap_or(u32::MAX);
        by_line.insert(text.to_string(), (issues.len(), 1));
        issues.push(
            Issue::new(
                format!("Runtime error: {}", truncate(text, 80)),
                format!("{}:{}: {}", display_name, line_number, text),
                Severity::Medium,
                Category::Runtime,
                "log-scan",
            )
            .with_location(IssueLocation::at(display_name, line_number, None))
            .with_metadata("pattern", Value::String(pattern.as_str().to_string()))
            .with_metadata("occurrences", 1.into())
            .with_suggestion("Reproduce the request that produced this log line and inspect its stack trace"),
        );
    }
    issues
}

/// Read position in a followed log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LogCursor {
    /// Byte offset just past the last complete line consumed.
    offset: usize,
    /// Number of lines consumed so far.
    lines: usize,
}

struct RuntimeChecks {
    root: PathBuf,
    logger: Arc<Logger>,
    options: Arc<RwLock<RuntimeOptions>>,
    captured: Arc<Mutex<VecDeque<Issue>>>,
    cursors: Mutex<HashMap<PathBuf, LogCursor>>,
}

impl RuntimeChecks {
    fn options(&self) -> RuntimeOptions {
        self.options.read().map(|o| o.clone()).unwrap_or_default()
    }

    /// Scan every log file. With `follow`, each file is read from where the
    /// previous follow pass stopped, so lines appended later are still found
    /// once the per-file cap was reached by older ones.
    async fn scan_logs(&self, follow: bool) -> Vec<Issue> {
        let options = self.options();
        if !options.enabled {
            return Vec::new();
        }

        let (patterns, mut issues) = compile_patterns(&options.error_patterns);
        let files = collect_log_files(&self.root, &options.log_paths);
        self.logger
            .debug(NAME, format!("Scanning {} log files", files.len()));

        for file in files {
            let bytes = match tokio::fs::read(&file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.logger
                        .warn(NAME, format!("Cannot read {}: {}", file.display(), e));
                    continue;
                }
            };
            let name = display_path(&self.root, &file);

            if !follow {
                let content = String::from_utf8_lossy(&bytes);
                issues.extend(scan_log_content(
                    &name,
                    &content,
                    1,
                    &patterns,
                    options.max_issues_per_file,
                ));
                continue;
            }

            let mut cursor = self.cursor(&file);
            if bytes.len() < cursor.offset {
                // Truncated or rotated.
                cursor = LogCursor::default();
            }
            let unread = &bytes[cursor.offset..];
            let Some(last_newline) = unread.iter().rposition(|b| *b == b'\n') else {
                continue;
            };
            let complete = &unread[..=last_newline];
            let content = String::from_utf8_lossy(complete);
            issues.extend(scan_log_content(
                &name,
                &content,
                cursor.lines + 1,
                &patterns,
                options.max_issues_per_file,
            ));
            self.set_cursor(
                file,
                LogCursor {
                    offset: cursor.offset + complete.len(),
                    lines: cursor.lines + complete.iter().filter(|b| **b == b'\n').count(),
                },
            );
        }
        issues
    }

    fn cursor(&self, file: &Path) -> LogCursor {
        self.cursors
            .lock()
            .ok()
            .and_then(|c| c.get(file).copied())
            .unwrap_or_default()
    }

    fn set_cursor(&self, file: PathBuf, cursor: LogCursor) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.insert(file, cursor);
        }
    }

    fn reset_cursors(&self) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.clear();
        }
    }

    /// Console errors recorded by the probe since the last scan.
    fn take_captured(&self) -> Vec<Issue> {
        self.captured
            .lock()
            .map(|mut c| c.drain(..).collect())
            .unwrap_or_default()
    }
}

/// Finds runtime errors in log files and host console output.
pub struct RuntimeAgent {
    checks: Arc<RuntimeChecks>,
    hub: Arc<MonitorHub>,
}

impl RuntimeAgent {
    pub fn new(root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            checks: Arc::new(RuntimeChecks {
                root,
                logger,
                options: Arc::new(RwLock::new(RuntimeOptions::default())),
                captured: Arc::new(Mutex::new(VecDeque::new())),
                cursors: Mutex::new(HashMap::new()),
            }),
            hub: MonitorHub::new(NAME),
        }
    }

    pub fn options(&self) -> RuntimeOptions {
        self.checks.options()
    }

    /// Probe the host feeds its console output into.
    pub fn console_probe(&self) -> ConsoleProbe {
        ConsoleProbe::new(
            Arc::clone(&self.hub),
            Arc::clone(&self.checks.options),
            Arc::clone(&self.checks.captured),
        )
    }
}

#[async_trait]
impl Agent for RuntimeAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Runtime
    }

    fn configure(&self, options: &Value) -> anyhow::Result<()> {
        let updated = merge_options(NAME, &self.checks.options(), options)?;
        if let Ok(mut current) = self.checks.options.write() {
            *current = updated;
        }
        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<Vec<Issue>> {
        let mut issues = self.checks.scan_logs(false).await;
        let captured = self.checks.take_captured();
        if self.checks.options().enabled {
            issues.extend(captured);
        }
        Ok(issues)
    }

    fn supports_monitoring(&self) -> bool {
        true
    }

    fn monitor(&self, callback: IssueCallback) -> anyhow::Result<()> {
        if !self.hub.register(callback) {
            return Ok(());
        }
        let interval = Duration::from_secs(self.checks.options().recheck_interval_secs);
        self.checks.reset_cursors();
        let checks = Arc::clone(&self.checks);
        let spawned = self.hub.spawn_periodic(interval, move || {
            let checks = Arc::clone(&checks);
            async move { checks.scan_logs(true).await }
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

    fn agent(root: &Path) -> RuntimeAgent {
        RuntimeAgent::new(root.to_path_buf(), Arc::new(Logger::silent(LogLevel::Error)))
    }

    #[test]
    fn test_scan_log_content_dedupes_and_caps() {
        let (patterns, failures) = compile_patterns(&RuntimeOptions::default().error_patterns);
        assert!(failures.is_empty());

        let content = "ok\nTypeError: a is undefined\nTypeError: a is undefined\nReferenceError: b\nconnect ECONNREFUSED 127.0.0.1:5432\n";
        let issues = scan_log_content("logs/app.log", content, 1, &patterns, 2);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line(), Some(2));
        assert_eq!(issues[0].metadata["occurrences"], 2);
        assert_eq!(issues[1].line(), Some(4));
    }

    #[tokio::test]
    async fn test_follow_reports_lines_appended_after_cap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        let log = dir.path().join("logs/app.log");
        std::fs::write(&log, "TypeError: a\nTypeError: b\nTypeError: c\n").unwrap();

        let a = agent(dir.path());
        a.configure(&json!({ "max_issues_per_file": 2 })).unwrap();
        assert_eq!(a.checks.scan_logs(true).await.len(), 2);
        assert!(a.checks.scan_logs(true).await.is_empty());

        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        std::io::Write::write_all(&mut file, b"ok\nReferenceError: d\nTypeError: partial").unwrap();
        let appended = a.checks.scan_logs(true).await;
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].line(), Some(5));

        std::io::Write::write_all(&mut file, b" line\n").unwrap();
        let completed = a.checks.scan_logs(true).await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].line(), Some(6));
        assert!(completed[0].title.contains("TypeError: partial line"));

        // A one-shot scan still reads the whole file under the cap.
        assert_eq!(a.scan().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_follow_restarts_after_truncation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        let log = dir.path().join("logs/app.log");
        std::fs::write(&log, "TypeError: first\nTypeError: second\n").unwrap();

        let a = agent(dir.path());
        assert_eq!(a.checks.scan_logs(true).await.len(), 2);

        std::fs::write(&log, "TypeError: new\n").unwrap();
        let issues = a.checks.scan_logs(true).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line(), Some(1));
    }

    #[test]
    fn test_invalid_pattern_is_scan_failure() {
        let (patterns, failures) = compile_patterns(&["(unclosed".to_string(), "ok".to_string()]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].title.contains("scan failed"));
    }

    #[tokio::test]
    async fn test_scan_walks_log_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs/api")).unwrap();
        std::fs::write(dir.path().join("logs/api/server.log"), "Unhandled promise rejection\n").unwrap();
        std::fs::write(dir.path().join("logs/notes.txt"), "TypeError: ignored\n").unwrap();

        let issues = agent(dir.path()).scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].file(), Some("logs/api/server.log"));
    }

    #[tokio::test]
    async fn test_scan_includes_captured_console_errors_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path());
        a.console_probe().error("Uncaught TypeError: x is undefined");

        let first = a.scan().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].severity, Severity::Critical);
        assert!(a.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_probe_pushes_while_monitoring() {
        let dir = tempfile::tempdir().unwrap();
        let a = agent(dir.path());
        a.configure(&json!({ "capture_console_warnings": true })).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        a.monitor(Arc::new(move |issue: Issue| s.lock().unwrap().push(issue)))
            .unwrap();

        let probe = a.console_probe();
        assert!(probe.warn("Each child in a list should have a unique key"));
        a.stop();
        assert!(!probe.error("after stop"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
