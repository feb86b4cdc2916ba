//! Explicit instrumentation probes.
//!
//! A host application opts into live detection by routing its outgoing HTTP
//! calls through an [`HttpProbe`] and its log output through a
//! [`ConsoleProbe`]. Probes turn observations into issues and push them to the
//! owning agent's monitor callbacks. While the agent is not monitoring, probes
//! push nothing.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agents::MonitorHub;
use crate::config::{NetworkOptions, RuntimeOptions};
use crate::issue::{truncate, Category, Issue, IssueLocation, Severity};

/// Number of console errors kept for the runtime agent's next scan.
pub const CONSOLE_CAPTURE_CAPACITY: usize = 100;

static STACK_FRAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(?((?:[A-Za-z]:)?[^\s():]+):(\d+):(\d+)\)?").ok());

/// One outgoing HTTP call as observed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HttpCall {
    pub fn completed(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        duration_ms: u64,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            status: Some(status),
            duration_ms,
            error: None,
        }
    }

    pub fn failed(
        method: impl Into<String>,
        url: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            status: None,
            duration_ms,
            error: Some(error.into()),
        }
    }
}

/// Issue for an observed call, if the call is a problem.
pub(crate) fn classify_http_call(call: &HttpCall, slow_threshold_ms: u64) -> Option<Issue> {
    let target = format!("{} {}", call.method, call.url);

    if let Some(error) = &call.error {
        return Some(
            Issue::new(
                format!("Request failed: {}", target),
                format!("Outgoing request failed after {}ms: {}", call.duration_ms, error),
                Severity::High,
                Category::Network,
                "http-probe",
            )
            .with_metadata("url", call.url.clone().into())
            .with_suggestions([
                "Verify the service is running and reachable",
                "Check proxy, DNS and firewall settings",
            ]),
        );
    }

    let status = call.status.unwrap_or(0);
    if status == 401 || status == 403 {
        return Some(
            Issue::new(
                format!("Unauthorized request: {}", target),
                format!("Request was rejected with status {}", status),
                Severity::Medium,
                Category::Auth,
                "http-probe",
            )
            .with_metadata("status", status.into())
            .with_suggestion("Check that the session or API credentials are attached to the request"),
        );
    }
    if status >= 500 {
        return Some(
            Issue::new(
                format!("Server error {}: {}", status, target),
                format!("Request returned status {} in {}ms", status, call.duration_ms),
                Severity::High,
                Category::Network,
                "http-probe",
            )
            .with_metadata("status", status.into())
            .with_suggestion("Inspect the server logs for the failing endpoint"),
        );
    }
    if status >= 400 {
        return Some(
            Issue::new(
                format!("Client error {}: {}", status, target),
                format!("Request returned status {}", status),
                Severity::Low,
                Category::Network,
                "http-probe",
            )
            .with_metadata("status", status.into())
            .with_suggestion("Check the request path and payload"),
        );
    }
    if slow_threshold_ms > 0 && call.duration_ms > slow_threshold_ms {
        return Some(
            Issue::new(
                format!("Slow request: {}", target),
                format!(
                    "Request took {}ms (threshold {}ms)",
                    call.duration_ms, slow_threshold_ms
                ),
                Severity::Low,
                Category::Performance,
                "http-probe",
            )
            .with_metadata("duration_ms", call.duration_ms.into())
            .with_suggestion("Consider caching or paginating this request"),
        );
    }
    None
}

/// Reports outgoing HTTP calls to the network agent.
#[derive(Clone)]
pub struct HttpProbe {
    hub: Arc<MonitorHub>,
    options: Arc<RwLock<NetworkOptions>>,
}

impl HttpProbe {
    pub(crate) fn new(hub: Arc<MonitorHub>, options: Arc<RwLock<NetworkOptions>>) -> Self {
        Self { hub, options }
    }

    /// Record a call. Returns `true` if an issue was pushed.
    pub fn record(&self, call: &HttpCall) -> bool {
        let threshold = self
            .options
            .read()
            .map(|o| o.slow_threshold_ms)
            .unwrap_or(0);
        match classify_http_call(call, threshold) {
            Some(issue) => self.hub.emit(issue),
            None => false,
        }
    }

    /// Execute `request` with `client`, recording the outcome.
    pub async fn execute(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
    ) -> reqwest::Result<reqwest::Response> {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let started = Instant::now();
        let result = client.execute(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let call = match &result {
            Ok(response) => HttpCall::completed(method, url, response.status().as_u16(), duration_ms),
            Err(e) => HttpCall::failed(method, url, e.to_string(), duration_ms),
        };
        self.record(&call);
        result
    }
}

/// Level of a console line reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
}

/// Issue for a console line, if the line is a problem.
pub(crate) fn classify_console(
    level: ConsoleLevel,
    message: &str,
    stack: Option<&str>,
    capture_warnings: bool,
) -> Option<Issue> {
    let first_line = message.lines().next().unwrap_or("").trim();
    let issue = match level {
        ConsoleLevel::Error => {
            let uncaught = message.contains("Uncaught") || message.contains("Unhandled");
            Issue::new(
                format!("Console error: {}", truncate(first_line, 80)),
                message.to_string(),
                if uncaught { Severity::Critical } else { Severity::High },
                Category::Runtime,
                "console-probe",
            )
            .with_suggestions([
                "Reproduce the failing interaction and inspect the stack trace",
                "Wrap the failing code path in an error boundary or try/catch",
            ])
        }
        ConsoleLevel::Warn if capture_warnings => Issue::new(
            format!("Console warning: {}", truncate(first_line, 80)),
            message.to_string(),
            Severity::Low,
            Category::Runtime,
            "console-probe",
        )
        .with_suggestion("Review the warning; it often precedes a runtime error"),
        _ => return None,
    };

    match stack {
        Some(stack) => {
            let mut location = first_stack_frame(stack).unwrap_or_else(|| IssueLocation::file("unknown"));
            location.stack_trace = Some(stack.to_string());
            Some(issue.with_location(location))
        }
        None => Some(issue),
    }
}

/// Location of the first `file:line:column` frame in a stack trace.
pub(crate) fn first_stack_frame(stack: &str) -> Option<IssueLocation> {
    let frame = STACK_FRAME.as_ref()?;
    stack
        .lines()
        .filter(|line| line.trim_start().starts_with("at "))
        .find_map(|line| frame.captures(line))
        .and_then(|caps| {
            let line = caps.get(2)?.as_str().parse().ok()?;
            let column = caps.get(3).and_then(|c| c.as_str().parse().ok());
            Some(IssueLocation::at(caps.get(1)?.as_str(), line, column))
        })
}

/// Reports host log output to the runtime agent.
#[derive(Clone)]
pub struct ConsoleProbe {
    hub: Arc<MonitorHub>,
    options: Arc<RwLock<RuntimeOptions>>,
    captured: Arc<Mutex<VecDeque<Issue>>>,
}

impl ConsoleProbe {
    pub(crate) fn new(
        hub: Arc<MonitorHub>,
        options: Arc<RwLock<RuntimeOptions>>,
        captured: Arc<Mutex<VecDeque<Issue>>>,
    ) -> Self {
        Self {
            hub,
            options,
            captured,
        }
    }

    pub fn error(&self, message: &str) -> bool {
        self.record(ConsoleLevel::Error, message, None)
    }

    pub fn warn(&self, message: &str) -> bool {
        self.record(ConsoleLevel::Warn, message, None)
    }

    /// Record a console line. Returns `true` if an issue was pushed live.
    ///
    /// Errors are also kept for the runtime agent's next `scan()`.
    pub fn record(&self, level: ConsoleLevel, message: &str, stack: Option<&str>) -> bool {
        let capture_warnings = self
            .options
            .read()
            .map(|o| o.capture_console_warnings)
            .unwrap_or(false);
        let Some(issue) = classify_console(level, message, stack, capture_warnings) else {
            return false;
        };

        if level == ConsoleLevel::Error {
            if let Ok(mut captured) = self.captured.lock() {
                if captured.len() == CONSOLE_CAPTURE_CAPACITY {
                    captured.pop_front();
                }
                captured.push_back(issue.clone());
            }
        }

        self.hub.emit(issue)
    }
}
