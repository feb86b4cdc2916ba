//! Markdown reporter.
//!
//! Environment, counts, recommendations and agent results come first, then
//! one section per category with issues sorted critical to info.

use super::{AgentRunStatus, Report, Reporter};
use crate::issue::{Category, Issue, Severity};

pub struct MarkdownReporter;

impl MarkdownReporter {
    pub fn new() -> Self {
        Self
    }

    fn severity_emoji(&self, severity: Severity) -> &'static str {
        match severity {
            Severity::Critical => "\u{1F6A8}",    // 🚨
            Severity::High => "\u{26A0}\u{FE0F}", // ⚠️
            Severity::Medium => "\u{1F7E1}",      // 🟡
            Severity::Low => "\u{1F535}",         // 🔵
            Severity::Info => "\u{2139}\u{FE0F}", // ℹ️
        }
    }

    fn format_environment(&self, report: &Report) -> String {
        let env = &report.metadata;
        let mut output = String::from("## Environment\n\n");
        output.push_str(&format!("- **Environment:** {}\n", env.environment));
        output.push_str(&format!("- **Runtime:** {}\n", env.runtime_version));
        output.push_str(&format!("- **Working directory:** `{}`\n", env.working_directory));
        output.push_str(&format!("- **OS:** {}\n", env.os));
        output.push_str(&format!("- **Host:** {}\n", env.host_name));
        output.push_str(&format!("- **Tool version:** {}\n", env.tool_version));
        for (name, version) in &env.dependencies {
            output.push_str(&format!("- **{}:** {}\n", name, version));
        }
        output.push('\n');
        output
    }

    fn format_summary(&self, report: &Report) -> String {
        let mut output = String::from("## Summary\n\n");
        output.push_str("| Severity | Count |\n");
        output.push_str("|----------|-------|\n");
        for severity in Severity::ALL {
            output.push_str(&format!(
                "| {} {} | {} |\n",
                self.severity_emoji(severity),
                severity,
                report.summary.count(severity)
            ));
        }
        output.push_str(&format!("| Total | {} |\n\n", report.summary.total_issues));
        output
    }

    fn format_recommendations(&self, report: &Report) -> String {
        if report.recommendations.is_empty() {
            return String::new();
        }
        let mut output = String::from("## Recommendations\n\n");
        for rec in &report.recommendations {
            output.push_str(&format!("- {}\n", rec));
        }
        output.push('\n');
        output
    }

    fn format_agents(&self, report: &Report) -> String {
        if report.agent_results.is_empty() {
            return String::new();
        }
        let mut output = String::from("## Agents\n\n");
        output.push_str("| Agent | Status | Duration | Issues |\n");
        output.push_str("|-------|--------|----------|--------|\n");
        for (name, result) in &report.agent_results {
            let status = match result.status {
                AgentRunStatus::Success => "success".to_string(),
                AgentRunStatus::Error => format!(
                    "error: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                AgentRunStatus::Timeout => "timeout".to_string(),
            };
            output.push_str(&format!(
                "| {} | {} | {}ms | {} |\n",
                name, status, result.duration_ms, result.issues_found
            ));
        }
        output.push('\n');
        output
    }

    fn format_issue(&self, issue: &Issue) -> String {
        let mut output = format!(
            "### {} {}\n\n",
            self.severity_emoji(issue.severity),
            issue.title
        );
        output.push_str(&format!(
            "**Severity:** {} | **Source:** {}\n\n",
            issue.severity, issue.source
        ));
        if let Some(location) = &issue.location {
            match location.line {
                Some(line) => output.push_str(&format!("**Location:** `{}:{}`\n\n", location.file, line)),
                None => output.push_str(&format!("**Location:** `{}`\n\n", location.file)),
            }
        }
        if !issue.description.is_empty() {
            output.push_str(&format!("{}\n\n", issue.description));
        }
        if !issue.suggestions.is_empty() {
            output.push_str("**Suggestions:**\n\n");
            for suggestion in &issue.suggestions {
                output.push_str(&format!("- {}\n", suggestion));
            }
            output.push('\n');
        }
        output
    }

    fn format_issues(&self, report: &Report) -> String {
        if report.issues.is_empty() {
            return String::from("## Issues\n\n\u{2705} No issues found.\n\n");
        }
        let mut output = String::new();
        for category in Category::ALL {
            let issues = report.issues_in(category);
            if issues.is_empty() {
                continue;
            }
            output.push_str(&format!("## {} ({})\n\n", category.title(), issues.len()));
            for issue in issues {
                output.push_str(&self.format_issue(issue));
            }
        }
        output
    }
}

impl Default for MarkdownReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for MarkdownReporter {
    fn report(&self, report: &Report) -> String {
        let mut output = String::from("# Diagnostic Report\n\n");
        output.push_str(&format!(
            "Generated {} (report `{}`)\n\n",
            report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            report.id
        ));
        output.push_str(&self.format_environment(report));
        output.push_str(&self.format_summary(report));
        output.push_str(&self.format_recommendations(report));
        output.push_str(&self.format_agents(report));
        output.push_str(&self.format_issues(report));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueLocation;
    use crate::report::EnvironmentInfo;
    use std::collections::BTreeMap;

    fn report(issues: Vec<Issue>) -> Report {
        Report::new(issues, BTreeMap::new(), EnvironmentInfo::unknown())
    }

    #[test]
    fn test_empty_report() {
        let output = MarkdownReporter::new().report(&report(Vec::new()));
        assert!(output.starts_with("# Diagnostic Report"));
        assert!(output.contains("## Environment"));
        assert!(output.contains("No issues found"));
        assert!(!output.contains("## Recommendations"));
    }

    #[test]
    fn test_sections_in_order_and_sorted() {
        let issues = vec![
            Issue::new("Low build", "", Severity::Low, Category::Build, "scripts"),
            Issue::new("Critical auth", "", Severity::Critical, Category::Auth, "env-vars")
                .with_suggestion("Add the variable"),
            Issue::new("Critical build", "", Severity::Critical, Category::Build, "manifest")
                .with_location(IssueLocation::at("package.json", 1, None)),
        ];
        let output = MarkdownReporter::new().report(&report(issues));

        let env = output.find("## Environment").unwrap();
        let summary = output.find("## Summary").unwrap();
        let recs = output.find("## Recommendations").unwrap();
        let auth = output.find("## Authentication (1)").unwrap();
        let build = output.find("## Build (2)").unwrap();
        assert!(env < summary && summary < recs && recs < auth && auth < build);

        let critical_build = output.find("Critical build").unwrap();
        let low_build = output.find("Low build").unwrap();
        assert!(critical_build < low_build);
        assert!(output.contains("`package.json:1`"));
        assert!(output.contains("- Add the variable"));
    }
}
