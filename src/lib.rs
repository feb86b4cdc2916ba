//! # Diagnostics
//!
//! A pluggable diagnostic coordinator for web application projects.
//!
//! This library provides:
//! - Domain agents that scan a project (auth, TypeScript, runtime, build, network)
//! - A coordinator that runs batch scans, keeps live issues and emits events
//! - Reports in JSON, Markdown and CSV
//! - An HTTP API and a CLI
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           Coordinator            │
//!        │  (scans, live issues, event bus) │
//!        └───────┬──────────────────┬───────┘
//!                │                  │
//!                ▼                  ▼
//!      ┌──────────────────┐  ┌─────────────┐
//!      │  Agents          │  │  AutoFixer  │
//!      │  auth, ts, build │  └─────────────┘
//!      │  runtime, network│
//!      └──────────────────┘
//! ```
//!
//! ## Scan Flow
//! 1. Run each agent's scan in turn, each under a timeout
//! 2. Build a report with a summary and recommendations
//! 3. Persist it as JSON and Markdown
//! 4. Publish `ScanComplete` to subscribers
//!
//! ## Modules
//! - `agents`: the `Agent` trait and the built-in agents
//! - `coordinator`: orchestration, live issues and events
//! - `report`: report model and exporters

pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fix;
pub mod issue;
pub mod logger;
pub mod probe;
pub mod report;

pub use coordinator::Coordinator;
pub use error::{DiagnosticsError, Result};
