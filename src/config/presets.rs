//! Environment presets, applied over the built-in defaults.

use serde_json::{json, Value};

use super::types::Environment;

/// Partial configuration layer for an environment.
pub fn preset(environment: Environment) -> Value {
    match environment {
        Environment::Development => json!({
            "log_level": "debug",
            "real_time_monitoring": true,
            "auto_fix": false,
            "agents": {
                "runtime": { "capture_console_warnings": true }
            }
        }),
        Environment::Production => json!({
            "log_level": "warn",
            "real_time_monitoring": true,
            "auto_fix": false,
            "agents": {
                "typescript": { "run_type_check": false },
                "network": { "timeout_ms": 3000, "slow_threshold_ms": 1000 }
            }
        }),
        Environment::Test => json!({
            "log_level": "error",
            "console_logging": false,
            "real_time_monitoring": false,
            "auto_fix": false,
            "scan_timeout_secs": 30,
            "agents": {
                "typescript": { "timeout_secs": 30 },
                "build": { "timeout_secs": 60 },
                "network": { "timeout_ms": 1000 }
            }
        }),
        Environment::Ci => json!({
            "log_level": "info",
            "real_time_monitoring": false,
            "auto_fix": false,
            "agents": {
                "build": { "run_build": true }
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::merge::deep_merge;
    use crate::config::DiagnosticsConfig;
    use crate::logger::LogLevel;

    fn apply(environment: Environment) -> DiagnosticsConfig {
        let mut base = serde_json::to_value(DiagnosticsConfig::default()).unwrap();
        deep_merge(&mut base, &preset(environment));
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_every_preset_deserializes() {
        for env in [
            Environment::Development,
            Environment::Production,
            Environment::Test,
            Environment::Ci,
        ] {
            apply(env);
        }
    }

    #[test]
    fn test_production_preset_keeps_sibling_network_options() {
        let config = apply(Environment::Production);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.agents.network.timeout_ms, 3000);
        assert_eq!(config.agents.network.ping_interval_secs, 30);
        assert!(!config.agents.typescript.run_type_check);
        assert!(config.agents.typescript.require_strict);
    }

    #[test]
    fn test_ci_preset_enables_build_without_monitoring() {
        let config = apply(Environment::Ci);
        assert!(config.agents.build.run_build);
        assert!(!config.real_time_monitoring);
    }
}
