//! Plan Runner - concurrent test plan scheduler
//!
//! Runs registered test targets on worker pools, optionally split into
//! parts, and merges the results into a single plan report.
//!
//! ## Usage
//!
//! ```bash
//! # Run every demo target on four threads
//! plan-runner run --workers 4
//!
//! # Split a target into three parts run by child processes
//! plan-runner run arithmetic --parts 3 --process
//!
//! # Show the structure of a part without running it
//! plan-runner list --detailed --part 0/3
//!
//! # Render a saved report, keeping smoke tests only
//! plan-runner report show plan.json --tags smoke
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use plan_runner::cli::{self, Args, Command};
use plan_runner::config::{ConfigFile, EnvOverrides};
use plan_runner::coordinator::{TestPlan, DEFAULT_POOL};
use plan_runner::demo::demo_registry;
use plan_runner::models::Task;
use plan_runner::output::{load_report, save_report, OutputFormat, ResultFormatter};
use plan_runner::pool::{run_child, Pool, ProcessBackend, ThreadBackend};
use plan_runner::report::{Part, Tags};
use plan_runner::testing::RunContext;
use plan_runner::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = EnvOverrides::load();
    let config_path = args
        .config
        .clone()
        .or_else(|| overrides.config_file.clone().map(PathBuf::from));
    let mut config = ConfigFile::load_or_default(config_path.as_deref())?;
    overrides.apply(&mut config.runner);
    if args.verbose {
        config.runner.log_level = LogLevel::Debug;
    }
    if let Command::Child(cli::ChildArgs {
        log_level: Some(level),
        ..
    }) = &args.command
    {
        config.runner.log_level = *level;
    }
    init_logger(config.runner.log_level);
    if overrides.has_any() {
        debug!("Applied environment overrides: {:?}", overrides);
    }

    match args.command {
        Command::Run(run_args) => {
            let passed = run_plan(run_args, &config).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Command::List(list_args) => {
            list_targets(list_args)?;
        }
        Command::Report(report_args) => {
            show_report(report_args)?;
        }
        Command::Config(config_args) => {
            manage_config(config_args, &config)?;
        }
        Command::Child(child_args) => {
            run_child_task(child_args, &config).await?;
        }
    }

    Ok(())
}

async fn run_plan(args: cli::RunArgs, config: &ConfigFile) -> Result<bool> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;

    let registry = demo_registry();
    let targets: Vec<String> = if args.targets.is_empty() {
        registry.names().map(str::to_string).collect()
    } else {
        args.targets.clone()
    };

    let runner = &config.runner;
    let mut pool_config = runner.pool_config(DEFAULT_POOL)?;
    if let Some(workers) = args.workers {
        pool_config = pool_config.with_size(workers.max(1));
    }
    let pool = if args.process {
        Pool::new(pool_config, ProcessBackend::new())
    } else {
        Pool::new(pool_config, ThreadBackend)
    };

    let ctx = RunContext::new(registry).with_settings(runner.run_settings()?);
    let plan = TestPlan::new("Plan", ctx)
        .with_default_pool(pool)
        .with_part_merging(runner.execution.merge_parts);

    let parts = args.parts.unwrap_or(1).max(1);
    let rerun = args.rerun.unwrap_or(runner.pool.rerun);
    let timeout = args.timeout;

    for target in &targets {
        for index in 0..parts {
            let mut task = Task::new(target.as_str()).with_rerun(rerun);
            if parts > 1 {
                task = task.with_part(Part::new(index, parts)?);
            }
            if let Some(timeout) = timeout {
                task = task.with_timeout(timeout);
            }
            plan.schedule(task, None).await?;
        }
    }

    info!(
        "Running {} targets in {} parts ({})",
        targets.len(),
        parts,
        if args.process { "process" } else { "thread" }
    );
    let mut report = plan.run().await;
    if let Some(output) = &args.output {
        save_report(&report, output)?;
        info!("Report saved to {}", output.display());
    }

    let passed = !report.status().is_failure();
    if let Some(tags) = &args.tags {
        report = report.filter_by_tags(&Tags::parse(tags), false);
    }
    println!("{}", ResultFormatter::new(format).format_report(&report)?);
    Ok(passed)
}

fn list_targets(args: cli::ListArgs) -> Result<()> {
    let part: Option<Part> = args.part.as_deref().map(str::parse::<Part>).transpose()?;
    let registry = demo_registry();
    let mut formatter = ResultFormatter::new(OutputFormat::Table).no_color();
    if !args.detailed {
        formatter = formatter.suites_only();
    }

    for name in registry.names() {
        let mut test = registry.build(name)?;
        test.set_part(part);
        let skeleton = test.dry_run();
        println!("{name}:");
        println!("{}", formatter.format_report(&skeleton)?);
    }
    Ok(())
}

fn show_report(args: cli::ReportArgs) -> Result<()> {
    match args.action {
        cli::ReportAction::Show {
            file,
            format,
            tags,
            all,
        } => {
            let format = OutputFormat::from_str(&format)
                .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))?;
            let mut report = load_report(&file)?;
            if let Some(tags) = tags {
                report = report.filter_by_tags(&Tags::parse(&tags), all);
            }
            println!("{}", ResultFormatter::new(format).format_report(&report)?);
        }
    }
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, effective: &ConfigFile) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }
            ConfigFile::default().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
        }

        cli::ConfigAction::Show { format } => {
            let output = if format == "json" {
                serde_json::to_string_pretty(effective)?
            } else {
                serde_yaml::to_string(effective)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(ConfigFile::find)
                .context("No configuration file found")?;
            validate_file(&path)?;
        }
    }
    Ok(())
}

fn validate_file(path: &Path) -> Result<()> {
    match ConfigFile::load(path) {
        Ok(_) => {
            println!("✓ Configuration file is valid: {}", path.display());
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration file is invalid: {}", path.display());
            println!("  Error: {e:#}");
            Err(e)
        }
    }
}

async fn run_child_task(args: cli::ChildArgs, config: &ConfigFile) -> Result<()> {
    let part: Option<Part> = args.part.as_deref().map(str::parse::<Part>).transpose()?;
    let mut settings = config.runner.run_settings()?;
    args.apply(&mut settings);
    let ctx = RunContext::new(demo_registry()).with_settings(settings);
    run_child(ctx, &args.target, part).await
}
