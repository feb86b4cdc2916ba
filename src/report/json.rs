use super::{Report, Reporter};

pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn report(&self, report: &Report) -> String {
        serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!(r#"{{"error": "Failed to serialize report: {}"}}"#, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, Issue, IssueLocation, Severity};
    use crate::report::{AgentResult, AgentRunStatus, EnvironmentInfo};
    use std::collections::BTreeMap;

    #[test]
    fn test_json_round_trips() {
        let mut results = BTreeMap::new();
        results.insert(
            "build".to_string(),
            AgentResult {
                status: AgentRunStatus::Error,
                duration_ms: 12,
                issues_found: 0,
                error: Some("boom".to_string()),
            },
        );
        let issue = Issue::new("Build failed", "exit 1", Severity::High, Category::Build, "build")
            .with_location(IssueLocation::at("next.config.js", 3, Some(1)))
            .with_suggestion("Run the build locally")
            .with_metadata("duration_ms", 42.into());
        let report = Report::new(vec![issue], results, EnvironmentInfo::unknown());

        let output = JsonReporter::new().report(&report);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["summary"]["high_issues"], 1);
        assert_eq!(parsed["agent_results"]["build"]["status"], "error");
        assert_eq!(parsed["issues"][0]["severity"], "high");

        let back: Report = serde_json::from_str(&output).unwrap();
        assert_eq!(back, report);
    }
}
