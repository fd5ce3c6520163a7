//! Process-backed workers
//!
//! Each execution spawns a child `plan-runner child` process that runs the
//! target and reports back over stdout as JSON lines.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::worker::{Heartbeat, WorkerBackend, MIN_HEARTBEAT_INTERVAL};
use crate::models::Task;
use crate::report::{Part, ReportNode};
use crate::testing::{RunContext, RunSettings};

/// One line of the child protocol
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    Heartbeat,
    Report { report: ReportNode },
    Error { message: String },
}

impl ChildMessage {
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode child message")
    }
}

/// What a child process reported before its stdout closed
#[derive(Debug, Default)]
pub struct ChildOutput {
    pub report: Option<ReportNode>,
    pub error: Option<String>,
    pub heartbeats: usize,
}

/// Read protocol lines until EOF, beating `heartbeat` on every heartbeat line
pub async fn read_child_output<R>(reader: R, heartbeat: &Heartbeat) -> Result<ChildOutput>
where
    R: AsyncBufRead + Unpin,
{
    let mut output = ChildOutput::default();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChildMessage>(trimmed) {
            Ok(ChildMessage::Heartbeat) => {
                output.heartbeats += 1;
                heartbeat.beat().await;
            }
            Ok(ChildMessage::Report { report }) => output.report = Some(report),
            Ok(ChildMessage::Error { message }) => output.error = Some(message),
            Err(_) => debug!("child: {}", trimmed),
        }
    }
    Ok(output)
}

/// Arguments of the `child` command running `task` under the parent's settings
pub fn child_args(task: &Task, settings: &RunSettings, heartbeat: Duration) -> Vec<String> {
    let mut args = vec![
        "child".to_string(),
        "--target".to_string(),
        task.target.clone(),
        "--heartbeat-secs".to_string(),
        heartbeat.as_secs_f64().to_string(),
        "--thread-pool-size".to_string(),
        settings.thread_pool_size.to_string(),
        "--stop-on-error".to_string(),
        settings.stop_on_error.as_str().to_string(),
    ];
    if let Some(part) = task.part {
        args.push("--part".to_string());
        args.push(format!("{}/{}", part.index, part.total));
    }
    if let Some(timeout) = settings.default_timeout {
        args.push("--default-timeout-secs".to_string());
        args.push(timeout.as_secs_f64().to_string());
    }
    if let Some(level) = settings.log_level {
        args.push("--log-level".to_string());
        args.push(level.to_string());
    }
    args
}

/// Spawns `<program> child --target <name> [--part m/n]` per execution
#[derive(Clone, Debug, Default)]
pub struct ProcessBackend {
    program: Option<PathBuf>,
}

impl ProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    fn program(&self, ctx: &RunContext) -> Result<PathBuf> {
        match self.program.clone().or_else(|| ctx.settings.child_program.clone()) {
            Some(program) => Ok(program),
            None => std::env::current_exe().context("Failed to locate the current executable"),
        }
    }
}

#[async_trait]
impl WorkerBackend for ProcessBackend {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, task: &Task, ctx: &RunContext, heartbeat: Heartbeat) -> Result<ReportNode> {
        let program = self.program(ctx)?;
        let mut cmd = Command::new(&program);
        cmd.args(child_args(task, &ctx.settings, heartbeat.interval()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} for {}", program.display(), task))?;
        info!("Started child process {:?} for {}", child.id(), task);

        let stdout = child
            .stdout
            .take()
            .context("Child process stdout is not piped")?;
        let output = read_child_output(BufReader::new(stdout), &heartbeat).await?;
        let status = child.wait().await.context("Failed to wait for child process")?;
        if !status.success() {
            warn!("Child process for {} exited with {}", task, status);
        }

        match (output.report, output.error) {
            (Some(report), _) => Ok(report),
            (None, Some(message)) => bail!(message),
            (None, None) => bail!("child process exited with {status} without a report"),
        }
    }
}

fn emit(message: &ChildMessage) -> Result<()> {
    println!("{}", message.to_line()?);
    Ok(())
}

/// Child side of the protocol: run `target` and print its report
pub async fn run_child(ctx: RunContext, target: &str, part: Option<Part>) -> Result<()> {
    let interval = ctx.settings.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
    let beats = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = emit(&ChildMessage::Heartbeat) {
                warn!("Stopping heartbeats: {:#}", e);
                break;
            }
        }
    });

    let result = async {
        let mut test = ctx.registry.build(target)?;
        test.set_part(part);
        test.run(&ctx).await
    }
    .await;
    beats.abort();

    match result {
        Ok(report) => emit(&ChildMessage::Report { report }),
        Err(e) => emit(&ChildMessage::Error {
            message: format!("{e:#}"),
        }),
    }
}
