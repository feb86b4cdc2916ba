//! Issue model shared by every agent and the coordinator.
//!
//! An [`Issue`] is created once by an agent and never mutated in place. Status
//! transitions produce a new value via [`Issue::with_status`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Urgency of an issue. Ordering follows urgency: `Info < Low < ... < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most urgent first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Diagnostic domain an issue belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Auth,
    Typescript,
    Runtime,
    Build,
    Network,
    Performance,
    Security,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Auth,
        Category::Typescript,
        Category::Runtime,
        Category::Build,
        Category::Network,
        Category::Performance,
        Category::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Auth => "auth",
            Category::Typescript => "typescript",
            Category::Runtime => "runtime",
            Category::Build => "build",
            Category::Network => "network",
            Category::Performance => "performance",
            Category::Security => "security",
        }
    }

    /// Heading used in human-readable reports.
    pub fn title(&self) -> &'static str {
        match self {
            Category::Auth => "Authentication",
            Category::Typescript => "TypeScript",
            Category::Runtime => "Runtime",
            Category::Build => "Build",
            Category::Network => "Network",
            Category::Performance => "Performance",
            Category::Security => "Security",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[default]
    Active,
    Investigating,
    Resolved,
    Ignored,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Active => "active",
            IssueStatus::Investigating => "investigating",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Ignored => "ignored",
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(IssueStatus::Active),
            "investigating" => Ok(IssueStatus::Investigating),
            "resolved" => Ok(IssueStatus::Resolved),
            "ignored" => Ok(IssueStatus::Ignored),
            other => Err(format!("unknown issue status '{}'", other)),
        }
    }
}

/// Where in the code an issue was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLocation {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl IssueLocation {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
            stack_trace: None,
        }
    }

    pub fn at(file: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column,
            stack_trace: None,
        }
    }
}

/// A detected problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    #[serde(default)]
    pub status: IssueStatus,
    pub timestamp: DateTime<Utc>,
    /// Sub-check inside the owning agent that produced the issue.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<IssueLocation>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_issues: Vec<String>,
}

impl Issue {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        category: Category,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            severity,
            category,
            status: IssueStatus::Active,
            timestamp: Utc::now(),
            source: source.into(),
            location: None,
            suggestions: Vec::new(),
            metadata: BTreeMap::new(),
            related_issues: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: IssueLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_related(mut self, issue_id: impl Into<String>) -> Self {
        self.related_issues.push(issue_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Copy of this issue in another lifecycle state.
    pub fn with_status(&self, status: IssueStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Identity of the underlying problem, independent of `id` and `timestamp`.
    ///
    /// Two detections of the same problem on different ticks share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let (file, line) = match &self.location {
            Some(loc) => (loc.file.as_str(), loc.line.unwrap_or(0)),
            None => ("", 0),
        };
        format!("{}|{}|{}:{}", self.source, self.title, file, line)
    }

    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file.as_str())
    }

    pub fn line(&self) -> Option<u32> {
        self.location.as_ref().and_then(|l| l.line)
    }
}

/// `text` cut to at most `max` characters, with an ellipsis when cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
