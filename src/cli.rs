use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Environment;

/// How a finished run is printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Counts per severity and the recommendations.
    #[default]
    Summary,
    Json,
    Markdown,
    Csv,
}

#[derive(Parser, Debug)]
#[command(
    name = "diagnostics",
    version,
    about = "Diagnostic coordinator for web application projects",
    long_about = "diagnostics runs auth, TypeScript, runtime, build and network checks against a project, \
                  writes reports and can keep monitoring it live."
)]
pub struct Cli {
    /// Configuration preset (detected from DIAGNOSTICS_ENV, CI or NODE_ENV when omitted)
    #[arg(long, value_enum, global = true)]
    pub env: Option<Environment>,

    /// Explicit config file (JSON or YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root to diagnose
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every agent and write a report
    Scan(ScanArgs),
    /// Check environment variables, secrets and auth config files
    Auth(ScanArgs),
    /// Check tsconfig and run the type checker
    Typescript(ScanArgs),
    /// Scan application logs for runtime errors
    Runtime(ScanArgs),
    /// Check the manifest, installed dependencies and the build
    Build(ScanArgs),
    /// Probe configured endpoints
    Network(ScanArgs),
    /// Monitor the project and re-scan periodically until Ctrl-C
    Monitor {
        /// Seconds between full re-scans
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value_t = 3001)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the resolved configuration to a file
    Init {
        /// Destination file
        #[arg(short, long, default_value = "diagnostics.config.json")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ScanArgs {
    /// Report directory (overrides the configured one)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
    pub format: OutputFormat,

    /// Attempt automatic fixes for issues that carry a suggestion
    #[arg(long)]
    pub auto_fix: bool,
}

impl Command {
    /// Agent selected by a single-agent subcommand.
    pub fn agent_name(&self) -> Option<&'static str> {
        match self {
            Command::Auth(_) => Some("auth"),
            Command::Typescript(_) => Some("typescript"),
            Command::Runtime(_) => Some("runtime"),
            Command::Build(_) => Some("build"),
            Command::Network(_) => Some("network"),
            _ => None,
        }
    }

    pub fn scan_args(&self) -> Option<&ScanArgs> {
        match self {
            Command::Scan(args)
            | Command::Auth(args)
            | Command::Typescript(args)
            | Command::Runtime(args)
            | Command::Build(args)
            | Command::Network(args) => Some(args),
            _ => None,
        }
    }
}
