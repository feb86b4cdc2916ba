//! diagnostics command line entry point.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diagnostics::cli::{Cli, Command, ConfigCommand, OutputFormat, ScanArgs};
use diagnostics::config::{write_config, ConfigBuilder, DiagnosticsConfig};
use diagnostics::coordinator::{Coordinator, CoordinatorEvent};
use diagnostics::issue::Severity;
use diagnostics::logger::LogLevel;
use diagnostics::report::{ExportFormat, Report};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("diagnostics={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match &cli.command {
        Command::Config {
            action: ConfigCommand::Init { output, force },
        } => init_config(&config, output, *force)?,
        Command::Monitor { interval } => monitor(config, *interval).await?,
        Command::Serve { port, host } => {
            let coordinator = Coordinator::new(config)?;
            diagnostics::api::serve(coordinator, host, *port).await?;
            0
        }
        command => {
            let args = command.scan_args().cloned().unwrap_or_default();
            scan(config, command.agent_name(), &args).await?
        }
    };

    std::process::exit(code);
}

fn load_config(cli: &Cli) -> anyhow::Result<DiagnosticsConfig> {
    let mut builder = ConfigBuilder::new(&cli.root).environment_opt(cli.env);
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if cli.quiet {
        builder = builder.override_with(json!({ "log_level": LogLevel::Error }));
    }
    if let Some(dir) = cli.command.scan_args().and_then(|a| a.output_dir.as_ref()) {
        builder = builder.override_with(json!({ "output_dir": dir }));
    }
    Ok(builder.build()?)
}

async fn scan(
    mut config: DiagnosticsConfig,
    agent: Option<&str>,
    args: &ScanArgs,
) -> anyhow::Result<i32> {
    // One-shot runs exit right after the report.
    config.real_time_monitoring = false;
    let coordinator = Coordinator::new(config)?;
    let report = match agent {
        Some(name) => coordinator.run_agent(name).await?,
        None => coordinator.run_diagnostic().await,
    };

    match args.format {
        OutputFormat::Summary => print_summary(&report),
        OutputFormat::Json => print!("{}", export(&report, ExportFormat::Json)),
        OutputFormat::Markdown => print!("{}", export(&report, ExportFormat::Markdown)),
        OutputFormat::Csv => print!("{}", export(&report, ExportFormat::Csv)),
    }

    if args.auto_fix {
        for outcome in coordinator.fix_issues(&report.issues).await {
            let mark = if outcome.fixed { "fixed" } else { "not fixed" };
            println!("[{}] {}", mark, outcome.message);
        }
    }

    Ok(report.summary.exit_code())
}

fn export(report: &Report, format: ExportFormat) -> String {
    let mut text = format.reporter().report(report);
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn print_summary(report: &Report) {
    println!("Diagnostic report {}", report.id);
    println!();
    for severity in Severity::ALL {
        println!("  {:<9} {}", severity.as_str(), report.summary.count(severity));
    }
    println!("  {:<9} {}", "total", report.summary.total_issues);

    if !report.agent_results.is_empty() {
        println!();
        println!("Agents:");
        for (name, result) in &report.agent_results {
            let status = serde_json::to_value(result.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            match &result.error {
                Some(error) => println!("  {:<11} {} ({})", name, status, error),
                None => println!(
                    "  {:<11} {} {} issues in {}ms",
                    name, status, result.issues_found, result.duration_ms
                ),
            }
        }
    }

    if !report.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &report.issues {
            let location = issue
                .file()
                .map(|f| match issue.line() {
                    Some(line) => format!(" ({}:{})", f, line),
                    None => format!(" ({})", f),
                })
                .unwrap_or_default();
            println!("  [{}] {}{}", issue.severity, issue.title, location);
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for recommendation in &report.recommendations {
            println!("  - {}", recommendation);
        }
    }
}

fn init_config(config: &DiagnosticsConfig, output: &Path, force: bool) -> anyhow::Result<i32> {
    let path = config.resolve(output);
    if path.exists() && !force {
        eprintln!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        );
        return Ok(1);
    }
    write_config(&path, config)?;
    println!("Wrote configuration to {}", path.display());
    Ok(0)
}

async fn monitor(mut config: DiagnosticsConfig, interval: u64) -> anyhow::Result<i32> {
    config.real_time_monitoring = true;
    let coordinator = Coordinator::new(config)?;
    let mut events = coordinator.subscribe();

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut exit_code = 0;

    println!("Monitoring {} agents. Press Ctrl-C to stop.", coordinator.agent_names().len());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = coordinator.run_diagnostic().await;
                exit_code = report.summary.exit_code();
                println!(
                    "Scan complete: {} issues ({} critical, {} high)",
                    report.summary.total_issues,
                    report.summary.critical_issues,
                    report.summary.high_issues
                );
            }
            event = events.recv() => match event {
                Ok(CoordinatorEvent::Issue { agent_name, issue }) => {
                    println!("[{}] {}: {}", issue.severity, agent_name, issue.title);
                }
                Ok(CoordinatorEvent::AutoFix { issue_id, fixed, message }) => {
                    println!("auto-fix {} ({}): {}", issue_id, if fixed { "fixed" } else { "not fixed" }, message);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} monitoring events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    coordinator.stop_monitoring();
    Ok(exit_code)
}
