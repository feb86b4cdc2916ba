//! Environment snapshot attached to every report.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::process::run_command;

const UNKNOWN: &str = "unknown";

/// Dependencies whose versions are recorded when the manifest declares them.
pub const TRACKED_DEPENDENCIES: [&str; 5] = ["next", "react", "typescript", "next-auth", "@prisma/client"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub runtime_version: String,
    pub dependencies: BTreeMap<String, String>,
    pub working_directory: String,
    pub os: String,
    pub host_name: String,
    pub tool_version: String,
    pub environment: String,
}

impl EnvironmentInfo {
    /// Snapshot with every probe-able field set to "unknown".
    pub fn unknown() -> Self {
        Self {
            runtime_version: UNKNOWN.to_string(),
            dependencies: BTreeMap::new(),
            working_directory: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            host_name: UNKNOWN.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: UNKNOWN.to_string(),
        }
    }

    /// Best-effort snapshot of `root`. Never fails.
    pub async fn collect(root: &Path, environment: &str) -> Self {
        let mut info = Self::unknown();
        info.environment = environment.to_string();

        let node = vec!["node".to_string(), "--version".to_string()];
        if let Ok(output) = run_command(&node, root, Duration::from_secs(5)).await {
            let version = output.stdout.trim();
            if output.success() && !version.is_empty() {
                info.runtime_version = format!("node {}", version);
            }
        }

        if let Ok(content) = tokio::fs::read_to_string(root.join("package.json")).await {
            if let Ok(manifest) = serde_json::from_str::<Value>(&content) {
                info.dependencies = tracked_versions(&manifest);
            }
        }

        info.working_directory = std::fs::canonicalize(root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| root.display().to_string());
        info.os = sysinfo::System::long_os_version()
            .or_else(sysinfo::System::name)
            .unwrap_or_else(|| std::env::consts::OS.to_string());
        info.host_name = sysinfo::System::host_name().unwrap_or_else(|| UNKNOWN.to_string());
        info
    }
}

/// Versions of [`TRACKED_DEPENDENCIES`] as declared in a manifest.
pub(crate) fn tracked_versions(manifest: &Value) -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    for section in ["dependencies", "devDependencies"] {
        let Some(deps) = manifest.get(section).and_then(Value::as_object) else {
            continue;
        };
        for name in TRACKED_DEPENDENCIES {
            if let Some(version) = deps.get(name).and_then(Value::as_str) {
                versions
                    .entry(name.to_string())
                    .or_insert_with(|| version.to_string());
            }
        }
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tracked_versions() {
        let manifest = json!({
            "dependencies": { "next": "14.2.3", "left-pad": "1.0.0" },
            "devDependencies": { "typescript": "^5.4.0" }
        });
        let versions = tracked_versions(&manifest);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions["next"], "14.2.3");
        assert_eq!(versions["typescript"], "^5.4.0");
    }

    #[tokio::test]
    async fn test_collect_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let info = EnvironmentInfo::collect(dir.path(), "test").await;
        assert_eq!(info.environment, "test");
        assert!(info.dependencies.is_empty());
        assert!(!info.working_directory.is_empty());
        assert!(!info.runtime_version.is_empty());
    }
}
