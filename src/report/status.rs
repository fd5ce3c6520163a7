//! Report status types
//!
//! Defines result statuses, their precedence rules and runtime statuses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Precedence category of a status, most significant first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCategory {
    Error,
    Failed,
    Unknown,
    Passed,
    Unstable,
}

/// Result status of a report node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Error,
    Incomplete,
    XpassStrict,
    Failed,
    Unknown,
    Passed,
    Skipped,
    Xfail,
    Xpass,
    Unstable,
}

impl Status {
    /// Precedence category this status belongs to
    pub fn category(&self) -> StatusCategory {
        match self {
            Status::Error => StatusCategory::Error,
            Status::Incomplete | Status::XpassStrict | Status::Failed => StatusCategory::Failed,
            Status::Unknown => StatusCategory::Unknown,
            Status::Passed => StatusCategory::Passed,
            Status::Skipped | Status::Xfail | Status::Xpass | Status::Unstable => {
                StatusCategory::Unstable
            }
        }
    }

    /// Representative status of this status' category
    pub fn normalised(&self) -> Status {
        match self.category() {
            StatusCategory::Error => Status::Error,
            StatusCategory::Failed => Status::Failed,
            StatusCategory::Unknown => Status::Unknown,
            StatusCategory::Passed => Status::Passed,
            StatusCategory::Unstable => Status::Unstable,
        }
    }

    /// True when `self` strictly outranks `other`
    pub fn precedes(&self, other: &Status) -> bool {
        self.category() < other.category()
    }

    /// Combine two statuses, keeping the one with higher precedence.
    ///
    /// Two different members of the same category collapse to the
    /// category's representative.
    pub fn combine(self, other: Status) -> Status {
        match self.category().cmp(&other.category()) {
            std::cmp::Ordering::Less => self,
            std::cmp::Ordering::Greater => other,
            std::cmp::Ordering::Equal if self == other => self,
            std::cmp::Ordering::Equal => self.normalised(),
        }
    }

    /// Precedent status of a collection, `None` when it is empty
    pub fn precedent<I>(statuses: I) -> Option<Status>
    where
        I: IntoIterator<Item = Status>,
    {
        statuses.into_iter().reduce(Status::combine)
    }

    /// Precedent of two optional statuses, used for overrides
    pub fn precedent_opt(a: Option<Status>, b: Option<Status>) -> Option<Status> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.combine(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Failed or errored
    pub fn is_failure(&self) -> bool {
        self.category() <= StatusCategory::Failed
    }

    pub fn is_passed(&self) -> bool {
        self.category() == StatusCategory::Passed
    }

    pub fn symbol(&self) -> &'static str {
        match self.category() {
            StatusCategory::Passed => "✓",
            StatusCategory::Failed => "✗",
            StatusCategory::Unstable => "○",
            StatusCategory::Unknown => "?",
            StatusCategory::Error => "!",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Error => "ERROR",
            Status::Incomplete => "INCOMPLETE",
            Status::XpassStrict => "XPASS-STRICT",
            Status::Failed => "FAILED",
            Status::Unknown => "UNKNOWN",
            Status::Passed => "PASSED",
            Status::Skipped => "SKIPPED",
            Status::Xfail => "XFAIL",
            Status::Xpass => "XPASS",
            Status::Unstable => "UNSTABLE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Execution progress of a report node
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Running,
    Resetting,
    Waiting,
    #[default]
    Ready,
    NotRun,
    Finished,
}

impl RuntimeStatus {
    /// The least advanced status wins
    pub fn precedent<I>(statuses: I) -> Option<RuntimeStatus>
    where
        I: IntoIterator<Item = RuntimeStatus>,
    {
        statuses.into_iter().min()
    }
}
