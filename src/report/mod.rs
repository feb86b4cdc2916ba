//! Batch scan reports: model, summary, recommendations, export and persistence.

mod csv;
mod environment;
mod json;
mod markdown;

pub use self::csv::CsvReporter;
pub use environment::EnvironmentInfo;
pub use json::JsonReporter;
pub use markdown::MarkdownReporter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DiagnosticsError, Result};
use crate::issue::{Category, Issue, Severity};

/// Per-category issue count above which a category note is added.
pub const CATEGORY_NOTE_THRESHOLD: usize = 5;
/// Total issue count above which a process-level note is added.
pub const PROCESS_NOTE_THRESHOLD: usize = 20;

/// Issue counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub critical_issues: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub info_issues: usize,
    pub total_issues: usize,
}

impl Summary {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut summary = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => summary.critical_issues += 1,
                Severity::High => summary.high_issues += 1,
                Severity::Medium => summary.medium_issues += 1,
                Severity::Low => summary.low_issues += 1,
                Severity::Info => summary.info_issues += 1,
            }
        }
        summary.total_issues = issues.len();
        summary
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical_issues,
            Severity::High => self.high_issues,
            Severity::Medium => self.medium_issues,
            Severity::Low => self.low_issues,
            Severity::Info => self.info_issues,
        }
    }

    /// Process exit code: 2 with critical issues, 1 with high, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.critical_issues > 0 {
            2
        } else if self.high_issues > 0 {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    Success,
    Error,
    Timeout,
}

/// Outcome of one agent's scan within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentRunStatus,
    pub duration_ms: u64,
    pub issues_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of one batch scan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: Summary,
    pub issues: Vec<Issue>,
    pub agent_results: BTreeMap<String, AgentResult>,
    pub recommendations: Vec<String>,
    pub metadata: EnvironmentInfo,
}

impl Report {
    pub fn new(
        issues: Vec<Issue>,
        agent_results: BTreeMap<String, AgentResult>,
        metadata: EnvironmentInfo,
    ) -> Self {
        let summary = Summary::from_issues(&issues);
        let recommendations = recommendations(&summary, &issues);
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            summary,
            issues,
            agent_results,
            recommendations,
            metadata,
        }
    }

    /// Issues of one category, most severe first. Order is stable within a severity.
    pub fn issues_in(&self, category: Category) -> Vec<&Issue> {
        let mut issues: Vec<&Issue> = self.issues.iter().filter(|i| i.category == category).collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        issues
    }

    /// File stem shared by the persisted JSON and Markdown files.
    ///
    /// The timestamp is followed by milliseconds and the first block of the
    /// report id, so reports produced within the same second never share a name.
    pub fn file_stem(&self) -> String {
        let short_id = self.id.split('-').next().unwrap_or(&self.id);
        format!(
            "diagnostic-report-{}-{}",
            self.timestamp.format("%Y-%m-%dT%H-%M-%S-%3f"),
            short_id
        )
    }
}

fn category_note(category: Category, count: usize) -> String {
    match category {
        Category::Auth => format!(
            "Review the authentication setup: {} auth issues point to missing or inconsistent credentials",
            count
        ),
        Category::Typescript => format!(
            "Prioritize the {} TypeScript errors; type errors often hide runtime failures",
            count
        ),
        Category::Runtime => format!(
            "Investigate {} runtime errors and add error boundaries around the failing paths",
            count
        ),
        Category::Build => format!(
            "Stabilize the build: {} build issues were found; reinstall dependencies and pin versions",
            count
        ),
        Category::Network => format!(
            "Check API endpoints and network configuration: {} network issues were found",
            count
        ),
        Category::Performance => format!(
            "Profile slow requests: {} performance issues were found",
            count
        ),
        Category::Security => format!("Review {} security findings before deploying", count),
    }
}

/// Human-readable priorities derived from a batch.
pub fn recommendations(summary: &Summary, issues: &[Issue]) -> Vec<String> {
    let mut out = Vec::new();
    if summary.critical_issues > 0 {
        out.push(format!(
            "Address {} critical issues immediately",
            summary.critical_issues
        ));
    }
    if summary.high_issues > 0 {
        out.push(format!("Review {} high-priority issues", summary.high_issues));
    }
    for category in Category::ALL {
        let count = issues.iter().filter(|i| i.category == category).count();
        if count > CATEGORY_NOTE_THRESHOLD {
            out.push(category_note(category, count));
        }
    }
    if summary.total_issues > PROCESS_NOTE_THRESHOLD {
        out.push(
            "Consider adding automated testing and CI checks to catch issues earlier".to_string(),
        );
    }
    out
}

/// Renders a report to text.
pub trait Reporter {
    fn report(&self, report: &Report) -> String;
}

/// Export format of [`Report`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

impl ExportFormat {
    pub fn reporter(&self) -> Box<dyn Reporter> {
        match self {
            ExportFormat::Json => Box::new(JsonReporter::new()),
            ExportFormat::Markdown => Box::new(MarkdownReporter::new()),
            ExportFormat::Csv => Box::new(CsvReporter::new()),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DiagnosticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(DiagnosticsError::UnknownFormat(other.to_string())),
        }
    }
}

/// Paths of a persisted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// Write the JSON dump and the Markdown summary of `report` into `dir`.
pub async fn persist(report: &Report, dir: &Path) -> Result<ReportFiles> {
    tokio::fs::create_dir_all(dir).await?;
    let stem = report.file_stem();
    let files = ReportFiles {
        json: dir.join(format!("{}.json", stem)),
        markdown: dir.join(format!("{}.md", stem)),
    };

    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&files.json, json).await?;
    tokio::fs::write(&files.markdown, MarkdownReporter::new().report(report)).await?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: Severity, category: Category) -> Issue {
        Issue::new("t", "d", severity, category, "test")
    }

    #[test]
    fn test_summary_buckets_sum_to_total() {
        let issues = vec![
            issue(Severity::Critical, Category::Auth),
            issue(Severity::Medium, Category::Build),
            issue(Severity::Medium, Category::Build),
            issue(Severity::Info, Category::Network),
        ];
        let s = Summary::from_issues(&issues);
        assert_eq!(s.critical_issues, 1);
        assert_eq!(s.medium_issues, 2);
        assert_eq!(s.info_issues, 1);
        let sum: usize = Severity::ALL.iter().map(|sev| s.count(*sev)).sum();
        assert_eq!(sum, s.total_issues);
        assert_eq!(s.total_issues, issues.len());
    }

    #[test]
    fn test_exit_code() {
        let mut s = Summary::default();
        assert_eq!(s.exit_code(), 0);
        s.high_issues = 1;
        assert_eq!(s.exit_code(), 1);
        s.critical_issues = 1;
        assert_eq!(s.exit_code(), 2);
    }

    #[test]
    fn test_recommendations() {
        let mut issues = vec![issue(Severity::Critical, Category::Auth)];
        issues.extend((0..6).map(|_| issue(Severity::High, Category::Typescript)));
        let recs = recommendations(&Summary::from_issues(&issues), &issues);
        assert_eq!(recs[0], "Address 1 critical issues immediately");
        assert_eq!(recs[1], "Review 6 high-priority issues");
        assert!(recs[2].contains("6 TypeScript errors"));
        assert_eq!(recs.len(), 3);

        issues.extend((0..15).map(|_| issue(Severity::Low, Category::Runtime)));
        let recs = recommendations(&Summary::from_issues(&issues), &issues);
        assert!(recs
            .last()
            .unwrap()
            .contains("automated testing"));
    }

    #[test]
    fn test_no_recommendations_when_clean() {
        assert!(recommendations(&Summary::default(), &[]).is_empty());
    }

    #[test]
    fn test_issues_in_sorts_by_severity() {
        let report = Report::new(
            vec![
                issue(Severity::Low, Category::Build),
                issue(Severity::Critical, Category::Build),
                issue(Severity::High, Category::Auth),
                issue(Severity::Medium, Category::Build),
            ],
            BTreeMap::new(),
            EnvironmentInfo::unknown(),
        );
        let severities: Vec<Severity> = report.issues_in(Category::Build).iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Medium, Severity::Low]);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(DiagnosticsError::UnknownFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_same_instant_reports_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let first = Report::new(Vec::new(), BTreeMap::new(), EnvironmentInfo::unknown());
        let mut second = Report::new(Vec::new(), BTreeMap::new(), EnvironmentInfo::unknown());
        second.timestamp = first.timestamp;
        assert_ne!(first.file_stem(), second.file_stem());

        persist(&first, dir.path()).await.unwrap();
        persist(&second, dir.path()).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_persist_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = Report::new(
            vec![issue(Severity::High, Category::Network)],
            BTreeMap::new(),
            EnvironmentInfo::unknown(),
        );
        let files = persist(&report, &dir.path().join("out")).await.unwrap();

        let name = files.json.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("diagnostic-report-"));
        assert!(name.ends_with(".json"));
        assert_eq!(
            name.len(),
            "diagnostic-report-2024-01-01T00-00-00-000-0a1b2c3d.json".len()
        );

        let back: Report = serde_json::from_str(&std::fs::read_to_string(&files.json).unwrap()).unwrap();
        assert_eq!(back, report);
        assert!(std::fs::read_to_string(&files.markdown).unwrap().starts_with("# Diagnostic Report"));
    }
}
