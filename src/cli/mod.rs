//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::StopOnError;
use crate::pool::MIN_HEARTBEAT_INTERVAL;
use crate::testing::RunSettings;
use crate::utils::LogLevel;

/// Positive, finite number of seconds
pub fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|e| format!("{e}: {s}"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("expected a positive number of seconds, got {s}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn parse_stop_on_error(s: &str) -> Result<StopOnError, String> {
    StopOnError::from_str(s).ok_or_else(|| format!("expected off, suite or test, got {s}"))
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::from_str(s).ok_or_else(|| format!("unknown log level: {s}"))
}

/// Concurrent test plan runner
#[derive(Parser, Debug)]
#[command(name = "plan-runner")]
#[command(version = "0.1.0")]
#[command(about = "Run test plans on worker pools and merge split tests into one report")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the test plan
    Run(RunArgs),

    /// Show the structure of registered targets without running them
    List(ListArgs),

    /// Inspect saved reports
    Report(ReportArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Process worker entry point
    #[command(hide = true)]
    Child(ChildArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Targets to schedule (all registered targets when omitted)
    pub targets: Vec<String>,

    /// Split every target into this many parts
    #[arg(short, long)]
    pub parts: Option<u32>,

    /// Workers in the default pool
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Run tasks in child processes instead of in-process
    #[arg(long)]
    pub process: bool,

    /// Rerun budget of each task
    #[arg(long)]
    pub rerun: Option<u32>,

    /// Timeout of each task in seconds
    #[arg(long, value_parser = parse_secs)]
    pub timeout: Option<Duration>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the JSON report to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only show nodes matching these tags (e.g. "smoke,team=core")
    #[arg(short, long)]
    pub tags: Option<String>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show testcases, not only suites
    #[arg(short, long)]
    pub detailed: bool,

    /// Only list this part of each target (m/n)
    #[arg(long)]
    pub part: Option<String>,
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub action: ReportAction,
}

#[derive(Subcommand, Debug)]
pub enum ReportAction {
    /// Render a saved JSON report
    Show {
        /// Report file
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Only show nodes matching these tags
        #[arg(short, long)]
        tags: Option<String>,

        /// Require every tag instead of any
        #[arg(long)]
        all: bool,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Destination
        #[arg(default_value = "plan-runner.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Output format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Check a configuration file
    Validate {
        /// File to check (the discovered file when omitted)
        file: Option<PathBuf>,
    },
}

/// Arguments for child command
#[derive(Parser, Debug)]
pub struct ChildArgs {
    /// Target to run
    #[arg(long)]
    pub target: String,

    /// Part to run (m/n)
    #[arg(long)]
    pub part: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "5", value_parser = parse_secs)]
    pub heartbeat_secs: Duration,

    /// Concurrent testcases per execution group
    #[arg(long)]
    pub thread_pool_size: Option<usize>,

    /// Phase timeout used when a phase declares none
    #[arg(long, value_parser = parse_secs)]
    pub default_timeout_secs: Option<Duration>,

    /// Stop-on-error scope (off, suite, test)
    #[arg(long, value_parser = parse_stop_on_error)]
    pub stop_on_error: Option<StopOnError>,

    /// Log level of the parent process
    #[arg(long, value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,
}

impl ChildArgs {
    /// Overlay the settings the parent passed down
    pub fn apply(&self, settings: &mut RunSettings) {
        settings.heartbeat_interval = self.heartbeat_secs.max(MIN_HEARTBEAT_INTERVAL);
        if let Some(size) = self.thread_pool_size {
            settings.thread_pool_size = size.max(1);
        }
        if let Some(timeout) = self.default_timeout_secs {
            settings.default_timeout = Some(timeout);
        }
        if let Some(stop_on_error) = self.stop_on_error {
            settings.stop_on_error = stop_on_error;
        }
        if let Some(level) = self.log_level {
            settings.log_level = Some(level);
        }
    }
}
