//! Configuration layer.
//!
//! A configuration is built once per coordinator by deep-merging built-in
//! defaults, an environment preset, an optional config file and a caller
//! override. It is immutable afterwards.

mod loading;
pub mod merge;
mod presets;
mod types;

pub use loading::{find_config_file, load_file, write_config, ConfigBuilder, CONFIG_FILE_NAMES};
pub use presets::preset;
pub use types::{
    AgentsConfig, AuthOptions, BuildOptions, DiagnosticsConfig, EndpointConfig, Environment,
    NetworkOptions, RuntimeOptions, TypeScriptOptions,
};
