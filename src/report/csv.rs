//! CSV reporter: one row per issue, every field quoted.

use super::{Report, Reporter};

pub const CSV_HEADER: [&str; 7] = ["Title", "Severity", "Category", "Source", "File", "Line", "Description"];

/// Quote a field, doubling embedded quotes.
pub(crate) fn escape_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

pub struct CsvReporter;

impl CsvReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CsvReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for CsvReporter {
    fn report(&self, report: &Report) -> String {
        let mut lines = vec![row(CSV_HEADER)];
        for issue in &report.issues {
            lines.push(row([
                issue.title.clone(),
                issue.severity.as_str().to_string(),
                issue.category.as_str().to_string(),
                issue.source.clone(),
                issue.file().unwrap_or("").to_string(),
                issue.line().map(|l| l.to_string()).unwrap_or_default(),
                issue.description.clone(),
            ]));
        }
        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, Issue, IssueLocation, Severity};
    use crate::report::EnvironmentInfo;
    use std::collections::BTreeMap;

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field(r#"contains "quotes""#), r#""contains ""quotes""""#);
        assert_eq!(escape_field("a,b"), "\"a,b\"");
    }

    #[test]
    fn test_rows() {
        let issues = vec![
            Issue::new(r#"contains "quotes""#, "line one\nline two", Severity::High, Category::Typescript, "type-check")
                .with_location(IssueLocation::at("src/a.ts", 7, Some(2))),
            Issue::new("plain", "", Severity::Info, Category::Auth, "env-files"),
        ];
        let report = Report::new(issues, BTreeMap::new(), EnvironmentInfo::unknown());
        let output = CsvReporter::new().report(&report);

        assert!(output.starts_with(
            "\"Title\",\"Severity\",\"Category\",\"Source\",\"File\",\"Line\",\"Description\"\n"
        ));
        assert!(output.contains(
            r#""contains ""quotes""","high","typescript","type-check","src/a.ts","7","line one"#
        ));
        assert!(output.contains(r#""plain","info","auth","env-files","","","""#));
    }
}
