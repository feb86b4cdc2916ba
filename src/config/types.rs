//! Typed configuration tree.
//!
//! Every struct is `#[serde(default)]` so a partially specified layer
//! deserializes cleanly once merged over the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::logger::{LogLevel, LoggerOptions, DEFAULT_BUFFER_CAPACITY};

/// Runtime environment used to pick a configuration preset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
    Ci,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
            Environment::Ci => "ci",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            "ci" => Some(Environment::Ci),
            _ => None,
        }
    }

    /// Detect the environment from process variables.
    ///
    /// `DIAGNOSTICS_ENV` wins, then a truthy `CI`, then `NODE_ENV`.
    pub fn detect() -> Self {
        Self::detect_with(|key| std::env::var(key).ok())
    }

    /// Detection against an arbitrary variable lookup.
    pub fn detect_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("DIAGNOSTICS_ENV").and_then(|v| Self::parse(&v)) {
            return env;
        }
        if let Some(ci) = lookup("CI") {
            let ci = ci.trim().to_ascii_lowercase();
            if !ci.is_empty() && ci != "false" && ci != "0" {
                return Environment::Ci;
            }
        }
        lookup("NODE_ENV")
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully merged configuration for one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub environment: Environment,
    /// Root of the project being diagnosed.
    pub project_root: PathBuf,
    pub log_level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub console_logging: bool,
    pub log_buffer_size: usize,
    /// Report directory, relative to `project_root` unless absolute.
    pub output_dir: PathBuf,
    pub auto_fix: bool,
    pub real_time_monitoring: bool,
    /// Upper bound on a single agent's `scan()`.
    pub scan_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// Age after which live issues are evicted by the health check.
    pub active_issue_ttl_hours: i64,
    pub history_capacity: usize,
    pub agents: AgentsConfig,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            project_root: PathBuf::from("."),
            log_level: LogLevel::Info,
            log_file: None,
            console_logging: true,
            log_buffer_size: DEFAULT_BUFFER_CAPACITY,
            output_dir: PathBuf::from("diagnostic-reports"),
            auto_fix: false,
            real_time_monitoring: false,
            scan_timeout_secs: 120,
            health_check_interval_secs: 60,
            active_issue_ttl_hours: 24,
            history_capacity: 50,
            agents: AgentsConfig::default(),
        }
    }
}

impl DiagnosticsConfig {
    /// Output directory resolved against the project root.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    /// Resolve a project-relative path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn logger_options(&self) -> LoggerOptions {
        LoggerOptions {
            level: self.log_level,
            buffer_capacity: self.log_buffer_size,
            console: self.console_logging,
            file: self.log_file.as_deref().map(|p| self.resolve(p)),
        }
    }
}

/// Option bags, one per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub auth: AuthOptions,
    pub typescript: TypeScriptOptions,
    pub runtime: RuntimeOptions,
    pub build: BuildOptions,
    pub network: NetworkOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    pub enabled: bool,
    /// Credential variables that must be present.
    pub required_env: Vec<String>,
    /// Variables holding secrets, checked for minimum length.
    pub secret_env: Vec<String>,
    pub min_secret_length: usize,
    /// Variables that must be absolute http(s) URLs.
    pub url_env: Vec<String>,
    /// `.env`-style files read from the project root, in priority order.
    pub env_files: Vec<String>,
    /// Auth configuration files; at least one must exist when non-empty.
    pub config_files: Vec<String>,
    pub recheck_interval_secs: u64,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            required_env: vec![
                "NEXTAUTH_SECRET".to_string(),
                "NEXTAUTH_URL".to_string(),
                "GOOGLE_CLIENT_ID".to_string(),
                "GOOGLE_CLIENT_SECRET".to_string(),
            ],
            secret_env: vec!["NEXTAUTH_SECRET".to_string()],
            min_secret_length: 32,
            url_env: vec!["NEXTAUTH_URL".to_string()],
            env_files: vec![".env.local".to_string(), ".env".to_string()],
            config_files: vec![
                "lib/auth.ts".to_string(),
                "src/lib/auth.ts".to_string(),
                "auth.ts".to_string(),
                "app/api/auth/[...nextauth]/route.ts".to_string(),
            ],
            recheck_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeScriptOptions {
    pub enabled: bool,
    pub tsconfig: String,
    pub require_strict: bool,
    /// Run the external type-checker during scans.
    pub run_type_check: bool,
    /// Program and arguments of the type-checker.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_reported_errors: usize,
    pub recheck_interval_secs: u64,
}

impl Default for TypeScriptOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            tsconfig: "tsconfig.json".to_string(),
            require_strict: true,
            run_type_check: true,
            command: vec![
                "npx".to_string(),
                "tsc".to_string(),
                "--noEmit".to_string(),
                "--pretty".to_string(),
                "false".to_string(),
            ],
            timeout_secs: 90,
            max_reported_errors: 50,
            recheck_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub enabled: bool,
    /// Log files or directories (searched for `*.log`), project-relative.
    pub log_paths: Vec<String>,
    /// Regex signatures that mark a runtime error line.
    pub error_patterns: Vec<String>,
    pub max_issues_per_file: usize,
    /// Report console warnings from the probe, not just errors.
    pub capture_console_warnings: bool,
    pub recheck_interval_secs: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log_paths: vec!["logs".to_string(), ".next/trace".to_string()],
            error_patterns: vec![
                r"\bTypeError\b".to_string(),
                r"\bReferenceError\b".to_string(),
                r"\bSyntaxError\b".to_string(),
                r"(?i)unhandled ?(promise )?rejection".to_string(),
                r"\bECONNREFUSED\b".to_string(),
                r"(?i)hydration (failed|error|mismatch)".to_string(),
            ],
            max_issues_per_file: 20,
            capture_console_warnings: false,
            recheck_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub enabled: bool,
    pub manifest: String,
    pub lockfiles: Vec<String>,
    pub run_build: bool,
    pub build_command: Vec<String>,
    pub timeout_secs: u64,
    /// Used by the auto-fixer when dependencies are missing.
    pub install_command: Vec<String>,
    pub recheck_interval_secs: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: "package.json".to_string(),
            lockfiles: vec![
                "package-lock.json".to_string(),
                "yarn.lock".to_string(),
                "pnpm-lock.yaml".to_string(),
                "bun.lockb".to_string(),
            ],
            run_build: false,
            build_command: vec!["npm".to_string(), "run".to_string(), "build".to_string()],
            timeout_secs: 300,
            install_command: vec!["npm".to_string(), "install".to_string()],
            recheck_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    pub enabled: bool,
    pub endpoints: Vec<EndpointConfig>,
    pub timeout_ms: u64,
    /// Responses slower than this produce a performance issue.
    pub slow_threshold_ms: u64,
    pub ping_interval_secs: u64,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: Vec::new(),
            timeout_ms: 5000,
            slow_threshold_ms: 2000,
            ping_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Expected status; any 2xx is accepted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_detect_defaults_to_development() {
        assert_eq!(Environment::detect_with(lookup(&[])), Environment::Development);
    }

    #[test]
    fn test_detect_prefers_explicit_variable() {
        let env = Environment::detect_with(lookup(&[
            ("DIAGNOSTICS_ENV", "production"),
            ("CI", "true"),
            ("NODE_ENV", "test"),
        ]));
        assert_eq!(env, Environment::Production);
    }

    #[test]
    fn test_detect_ci_before_node_env() {
        let env = Environment::detect_with(lookup(&[("CI", "1"), ("NODE_ENV", "production")]));
        assert_eq!(env, Environment::Ci);

        let env = Environment::detect_with(lookup(&[("CI", "false"), ("NODE_ENV", "test")]));
        assert_eq!(env, Environment::Test);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DiagnosticsConfig =
            serde_json::from_str(r#"{ "agents": { "network": { "timeout_ms": 100 } } }"#).unwrap();
        assert_eq!(config.agents.network.timeout_ms, 100);
        assert_eq!(config.agents.network.ping_interval_secs, 30);
        assert_eq!(config.history_capacity, 50);
    }

    #[test]
    fn test_resolved_output_dir() {
        let config = DiagnosticsConfig {
            project_root: PathBuf::from("/srv/app"),
            ..DiagnosticsConfig::default()
        };
        assert_eq!(
            config.resolved_output_dir(),
            PathBuf::from("/srv/app/diagnostic-reports")
        );
    }

    #[test]
    fn test_endpoint_method_defaults_to_get() {
        let endpoint: EndpointConfig =
            serde_json::from_str(r#"{ "name": "api", "url": "http://localhost/api" }"#).unwrap();
        assert_eq!(endpoint.method, "GET");
        assert!(endpoint.expected_status.is_none());
    }
}
