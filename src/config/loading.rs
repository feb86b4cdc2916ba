//! Layered configuration loading.
//!
//! Layers, lowest priority first:
//! 1. Built-in defaults (`DiagnosticsConfig::default()`)
//! 2. Environment preset
//! 3. Config file (explicit path, or the first conventional name found)
//! 4. Caller override

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::merge::merge_layers;
use super::presets::preset;
use super::types::{DiagnosticsConfig, Environment};
use crate::error::{DiagnosticsError, Result};

/// Conventional config file names, searched in order in the project root.
pub const CONFIG_FILE_NAMES: &[&str] = &[
    "diagnostics.config.json",
    ".diagnosticsrc.json",
    "diagnostics.config.yaml",
    "diagnostics.config.yml",
    ".diagnosticsrc.yaml",
];

/// Builds a [`DiagnosticsConfig`] from the four configuration layers.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    project_root: PathBuf,
    environment: Option<Environment>,
    config_file: Option<PathBuf>,
    discover_file: bool,
    overrides: Value,
}

impl ConfigBuilder {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            environment: None,
            config_file: None,
            discover_file: true,
            overrides: Value::Null,
        }
    }

    /// Use this preset instead of detecting one from the environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn environment_opt(mut self, environment: Option<Environment>) -> Self {
        self.environment = environment.or(self.environment);
        self
    }

    /// Load this file instead of searching for a conventional one.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Skip the conventional file search.
    pub fn without_file_discovery(mut self) -> Self {
        self.discover_file = false;
        self
    }

    /// Caller override layer. Repeated calls merge into each other.
    pub fn override_with(mut self, overrides: Value) -> Self {
        super::merge::deep_merge(&mut self.overrides, &overrides);
        self
    }

    pub fn build(self) -> Result<DiagnosticsConfig> {
        let environment = self.environment.unwrap_or_else(Environment::detect);

        let defaults = serde_json::to_value(DiagnosticsConfig::default())?;
        let preset_layer = preset(environment);
        let file_layer = match self.file_path()? {
            Some(path) => {
                tracing::debug!("Loading diagnostics config from {}", path.display());
                load_file(&path)?
            }
            None => Value::Null,
        };

        let merged = merge_layers([&defaults, &preset_layer, &file_layer, &self.overrides]);
        let mut config: DiagnosticsConfig = serde_json::from_value(merged)
            .map_err(|e| DiagnosticsError::InvalidConfig(e.to_string()))?;

        config.environment = environment;
        if file_layer.get("project_root").is_none() && self.overrides.get("project_root").is_none()
        {
            config.project_root = self.project_root;
        }

        Ok(config)
    }

    fn file_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.config_file {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.project_root.join(path)
            };
            if !path.exists() {
                return Err(DiagnosticsError::ConfigRead {
                    path: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "config file not found",
                    ),
                });
            }
            return Ok(Some(path));
        }

        if !self.discover_file {
            return Ok(None);
        }

        Ok(find_config_file(&self.project_root))
    }
}

/// First conventional config file present in `root`.
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Parse a JSON or YAML config file into an untyped layer.
pub fn load_file(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|e| DiagnosticsError::ConfigRead {
        path: path.display().to_string(),
        source: e,
    })?;

    match extension(path).as_str() {
        "json" => serde_json::from_str(&content).map_err(|e| DiagnosticsError::ConfigJson {
            path: path.display().to_string(),
            source: e,
        }),
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).map_err(|e| DiagnosticsError::ConfigYaml {
                path: path.display().to_string(),
                source: e,
            })
        }
        ext => Err(DiagnosticsError::UnsupportedFormat(
            path.display().to_string(),
            ext.to_string(),
        )),
    }
}

/// Write a configuration as JSON or YAML depending on the file extension.
pub fn write_config(path: &Path, config: &DiagnosticsConfig) -> Result<()> {
    let content = match extension(path).as_str() {
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        ext => {
            return Err(DiagnosticsError::UnsupportedFormat(
                path.display().to_string(),
                ext.to_string(),
            ))
        }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)?;
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}
