//! Task models
//!
//! Defines schedulable tasks and their terminal results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::report::{Part, ReportNode, Status};

/// Upper bound on reruns of a single task
pub const MAX_RERUN_LIMIT: u32 = 3;

/// Stable identifier of a task, shared by all of its attempts
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work: materialise `target` and run it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub target: String,
    pub part: Option<Part>,
    pub rerun: u32,
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
    pub weight: i32,
    /// Name of the test the target produces, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Task {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: TaskId::random(),
            target: target.into(),
            part: None,
            rerun: 0,
            timeout: None,
            weight: 0,
            name: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = TaskId::new(id);
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.part = Some(part);
        self
    }

    /// Rerun budget, clamped to [`MAX_RERUN_LIMIT`]
    pub fn with_rerun(mut self, rerun: u32) -> Self {
        if rerun > MAX_RERUN_LIMIT {
            warn!(
                "Rerun count {} for task {} exceeds the limit, using {}",
                rerun, self.target, MAX_RERUN_LIMIT
            );
        }
        self.rerun = rerun.min(MAX_RERUN_LIMIT);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Logical test name, falling back to the target
    pub fn test_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.target)
    }

    /// Uid of the report this task produces
    pub fn report_uid(&self) -> String {
        match self.part {
            Some(part) => format!("{}{}", self.test_name(), part.suffix()),
            None => self.test_name().to_string(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report_uid())?;
        if self.target != self.test_name() {
            write!(f, " ({})", self.target)?;
        }
        Ok(())
    }
}

/// Terminal status of a task execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Done,
    Error,
    Timeout,
    Lost,
}

impl TaskStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Done => "✓",
            TaskStatus::Error => "!",
            TaskStatus::Timeout => "⏱",
            TaskStatus::Lost => "✗",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Done => write!(f, "DONE"),
            TaskStatus::Error => write!(f, "ERROR"),
            TaskStatus::Timeout => write!(f, "TIMEOUT"),
            TaskStatus::Lost => write!(f, "LOST"),
        }
    }
}

/// Result of running a task, after reruns
#[derive(Clone, Debug)]
pub struct TaskResult {
    pub task: Task,
    pub status: TaskStatus,
    pub report: ReportNode,
    pub reason: Option<String>,
    pub attempts: u32,
    pub worker: Option<String>,
    /// Reports of earlier, superseded attempts
    pub previous_attempts: Vec<ReportNode>,
}

impl TaskResult {
    pub fn done(task: Task, report: ReportNode) -> Self {
        Self {
            task,
            status: TaskStatus::Done,
            report,
            reason: None,
            attempts: 1,
            worker: None,
            previous_attempts: Vec::new(),
        }
    }

    /// Non-`Done` result carrying an ERROR placeholder report
    pub fn failed(task: Task, status: TaskStatus, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut report = ReportNode::error_placeholder(task.report_uid(), task.report_uid(), &reason)
            .with_definition_name(task.test_name());
        report.part = task.part;
        Self {
            task,
            status,
            report,
            reason: Some(reason),
            attempts: 1,
            worker: None,
            previous_attempts: Vec::new(),
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Finished normally with a passing report
    pub fn passed(&self) -> bool {
        self.status == TaskStatus::Done && self.report.status().is_passed()
    }

    pub fn report_status(&self) -> Status {
        self.report.status()
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.status.symbol(),
            self.task,
            self.status,
            self.report.status()
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64))
    }
}
