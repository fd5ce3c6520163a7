//! Per-testcase result collector

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::report::{Assertion, LogRecord, Severity};

#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub assertions: Vec<Assertion>,
    pub logs: Vec<LogRecord>,
    pub skipped: Option<String>,
}

/// Handle used by testcase bodies and hooks to record checks and logs.
///
/// Clones share the same underlying record.
#[derive(Clone, Debug, Default)]
pub struct CaseResult {
    inner: Arc<Mutex<Collected>>,
}

impl CaseResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a boolean check, returning it
    pub fn check(&self, passed: bool, description: impl Into<String>) -> bool {
        self.lock().assertions.push(Assertion {
            description: description.into(),
            passed,
            detail: None,
        });
        passed
    }

    /// Record an equality check
    pub fn equal<T>(&self, actual: T, expected: T, description: impl Into<String>) -> bool
    where
        T: PartialEq + Debug,
    {
        let passed = actual == expected;
        let detail = (!passed).then(|| format!("{actual:?} != {expected:?}"));
        self.lock().assertions.push(Assertion {
            description: description.into(),
            passed,
            detail,
        });
        passed
    }

    pub fn log(&self, message: impl Into<String>) {
        self.lock().logs.push(LogRecord::new(Severity::Info, message));
    }

    /// End the testcase as skipped
    pub fn skip(&self, reason: impl Into<String>) {
        self.lock().skipped = Some(reason.into());
    }

    pub fn passed(&self) -> bool {
        self.lock().assertions.iter().all(|a| a.passed)
    }

    /// Move everything recorded so far out of the handle
    pub(crate) fn take(&self) -> Collected {
        std::mem::take(&mut *self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let result = CaseResult::new();
        let handle = result.clone();
        assert!(handle.check(true, "first"));
        assert!(!handle.equal(1, 2, "numbers"));
        handle.log("note");
        assert!(!result.passed());

        let collected = result.take();
        assert_eq!(collected.assertions.len(), 2);
        assert_eq!(collected.assertions[1].detail.as_deref(), Some("1 != 2"));
        assert_eq!(collected.logs.len(), 1);
        assert!(result.take().assertions.is_empty());
    }

    #[test]
    fn test_skip_reason() {
        let result = CaseResult::new();
        result.skip("not supported");
        assert_eq!(result.take().skipped.as_deref(), Some("not supported"));
    }
}
