//! Error types
//!
//! Library errors raised by the scheduler, pools and part coordinator.

use std::fmt;
use thiserror::Error;

/// Broad classification of runner failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Lost,
    Crash,
    SchedulingConflict,
    MergeInconsistent,
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Lost => "lost",
            ErrorKind::Crash => "crash",
            ErrorKind::SchedulingConflict => "scheduling conflict",
            ErrorKind::MergeInconsistent => "merge inconsistent",
            ErrorKind::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("`{phase}` timeout after {seconds}s")]
    Timeout { phase: String, seconds: f64 },

    #[error("worker {worker} lost after missing {missed} heartbeats")]
    Lost { worker: String, missed: u32 },

    #[error("{context} crashed: {message}")]
    Crash { context: String, message: String },

    #[error("scheduling conflict for {test}: {reason}")]
    SchedulingConflict { test: String, reason: String },

    #[error("inconsistent parts for {test}: {reason}")]
    MergeInconsistent { test: String, reason: String },

    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("pool {0} already exists")]
    DuplicatePool(String),

    #[error("task {0} is already scheduled in this pool")]
    DuplicateTask(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("invalid part {index}/{total}")]
    InvalidPart { index: u32, total: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RunnerError {
    pub fn timeout(phase: impl Into<String>, duration: std::time::Duration) -> Self {
        RunnerError::Timeout {
            phase: phase.into(),
            seconds: duration.as_secs_f64(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::Timeout { .. } => ErrorKind::Timeout,
            RunnerError::Lost { .. } => ErrorKind::Lost,
            RunnerError::Crash { .. } => ErrorKind::Crash,
            RunnerError::SchedulingConflict { .. } => ErrorKind::SchedulingConflict,
            RunnerError::MergeInconsistent { .. } => ErrorKind::MergeInconsistent,
            RunnerError::UnknownPool(_)
            | RunnerError::DuplicatePool(_)
            | RunnerError::DuplicateTask(_)
            | RunnerError::UnknownTarget(_)
            | RunnerError::InvalidPart { .. }
            | RunnerError::Config(_) => ErrorKind::Configuration,
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
