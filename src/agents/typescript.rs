//! TypeScript configuration and type-check diagnostics.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::process::run_command;
use super::{display_path, merge_options, scan_failed_issue, Agent, IssueCallback, MonitorHub};
use crate::config::TypeScriptOptions;
use crate::issue::{truncate, Category, Issue, IssueLocation, Severity};
use crate::logger::Logger;

const NAME: &str = "typescript";

/// Remove `//` and `/* */` comments and trailing commas so a tsconfig file
/// parses as JSON. String contents are left alone.
pub(crate) fn strip_jsonc(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            (',', _) => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// One compiler diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TscDiagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: String,
    pub message: String,
}

static PLAIN_DIAGNOSTIC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+?)\((\d+),(\d+)\): error (TS\d+): (.*)$").ok());

static PRETTY_DIAGNOSTIC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+):(\d+) - error (TS\d+): (.*)$").ok());

/// Parse compiler output in both the plain `file(l,c): error TSxxxx: msg`
/// and the pretty `file:l:c - error TSxxxx: msg` forms.
pub(crate) fn parse_tsc_output(output: &str) -> Vec<TscDiagnostic> {
    let (Some(plain), Some(pretty)) = (PLAIN_DIAGNOSTIC.as_ref(), PRETTY_DIAGNOSTIC.as_ref()) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            let caps = plain.captures(line).or_else(|| pretty.captures(line))?;
            Some(TscDiagnostic {
                file: caps[1].trim().to_string(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                code: caps[4].to_string(),
                message: caps[5].trim().to_string(),
            })
        })
        .collect()
}

fn diagnostic_issue(diag: &TscDiagnostic) -> Issue {
    Issue::new(
        format!("{}: {}", diag.code, truncate(&diag.message, 100)),
        diag.message.clone(),
        Severity::High,
        Category::Typescript,
        "type-check",
    )
    .with_location(IssueLocation::at(&diag.file, diag.line, Some(diag.column)))
    .with_metadata("code", Value::String(diag.code.clone()))
    .with_suggestion(format!(
        "See https://typescript.tv/errors/#{} for an explanation",
        diag.code.to_lowercase()
    ))
}

struct TypeScriptChecks {
    root: PathBuf,
    logger: Arc<Logger>,
    options: RwLock<TypeScriptOptions>,
}

impl TypeScriptChecks {
    fn options(&self) -> TypeScriptOptions {
        self.options.read().map(|o| o.clone()).unwrap_or_default()
    }

    async fn run(&self) -> Vec<Issue> {
        let options = self.options();
        if !options.enabled {
            return Vec::new();
        }

        let mut issues = Vec::new();
        let tsconfig_path = self.root.join(&options.tsconfig);
        let tsconfig_name = display_path(&self.root, &tsconfig_path);

        let content = match tokio::fs::read_to_string(&tsconfig_path).await {
            Ok(content) => content,
            Err(_) => {
                issues.push(
                    Issue::new(
                        format!("{} not found", tsconfig_name),
                        "The project has no TypeScript configuration, so type checking is not possible",
                        Severity::High,
                        Category::Typescript,
                        "tsconfig",
                    )
                    .with_suggestion("Run `npx tsc --init` to create a tsconfig.json"),
                );
                return issues;
            }
        };

        match serde_json::from_str::<Value>(&strip_jsonc(&content)) {
            Ok(tsconfig) => {
                let strict = tsconfig
                    .pointer("/compilerOptions/strict")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if options.require_strict && !strict {
                    issues.push(
                        Issue::new(
                            "Strict mode disabled",
                            "compilerOptions.strict is not enabled; many type errors go undetected",
                            Severity::Medium,
                            Category::Typescript,
                            "strict-mode",
                        )
                        .with_location(IssueLocation::file(&tsconfig_name))
                        .with_suggestion("Set \"strict\": true in compilerOptions"),
                    );
                }
            }
            Err(e) => {
                let line = u32::try_from(e.line()).unwrap_or(0);
                issues.push(
                    Issue::new(
                        format!("Invalid {}", tsconfig_name),
                        format!("Could not parse {}: {}", tsconfig_name, e),
                        Severity::Medium,
                        Category::Typescript,
                        "tsconfig",
                    )
                    .with_location(IssueLocation::at(&tsconfig_name, line, None))
                    .with_suggestion("Fix the JSON syntax of the configuration file"),
                );
            }
        }

        if options.run_type_check {
            issues.extend(self.type_check(&options).await);
        }
        issues
    }

    async fn type_check(&self, options: &TypeScriptOptions) -> Vec<Issue> {
        let timeout = Duration::from_secs(options.timeout_secs);
        self.logger
            .debug(NAME, format!("Running {}", options.command.join(" ")));

        let output = match run_command(&options.command, &self.root, timeout).await {
            Ok(output) => output,
            Err(e) => return vec![scan_failed_issue(NAME, Category::Typescript, "type-check", e)],
        };

        if output.timed_out {
            return vec![Issue::new(
                "Type check timed out",
                format!("The type-checker did not finish within {}s", options.timeout_secs),
                Severity::High,
                Category::Typescript,
                "type-check",
            )
            .with_suggestion("Raise typescript.timeout_secs or enable incremental compilation")];
        }

        let diagnostics = parse_tsc_output(&output.combined());
        self.logger.info(
            NAME,
            format!(
                "Type check finished in {}ms with {} errors",
                output.duration.as_millis(),
                diagnostics.len()
            ),
        );

        if diagnostics.is_empty() {
            if output.success() {
                return Vec::new();
            }
            return vec![Issue::new(
                "Type check failed",
                format!(
                    "The type-checker exited with {:?} without reporting diagnostics:\n{}",
                    output.exit_code,
                    output.tail(20)
                ),
                Severity::Medium,
                Category::Typescript,
                "type-check",
            )
            .with_suggestion("Run the type-checker manually to see the full output")];
        }

        let mut issues: Vec<Issue> = diagnostics
            .iter()
            .take(options.max_reported_errors)
            .map(diagnostic_issue)
            .collect();
        let hidden = diagnostics.len().saturating_sub(options.max_reported_errors);
        if hidden > 0 {
            issues.push(
                Issue::new(
                    format!("{} more type errors not shown", hidden),
                    format!(
                        "{} type errors were found; only the first {} are reported",
                        diagnostics.len(),
                        options.max_reported_errors
                    ),
                    Severity::Info,
                    Category::Typescript,
                    "type-check",
                )
                .with_metadata("total_errors", diagnostics.len().into()),
            );
        }
        issues
    }
}

/// Checks tsconfig settings and runs the type-checker.
pub struct TypeScriptAgent {
    checks: Arc<TypeScriptChecks>,
    hub: Arc<MonitorHub>,
}

impl TypeScriptAgent {
    pub fn new(root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            checks: Arc::new(TypeScriptChecks {
                root,
                logger,
                options: RwLock::new(TypeScriptOptions::default()),
            }),
            hub: MonitorHub::new(NAME),
        }
    }

    pub fn options(&self) -> TypeScriptOptions {
        self.checks.options()
    }
}

#[async_trait]
impl Agent for TypeScriptAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Typescript
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
