//! Single phase execution
//!
//! Runs one hook, driver call or testcase body on its own tokio task with
//! an optional timeout, turning errors and panics into outcomes.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::report::ReportNode;

/// How a phase ended
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseOutcome {
    Completed,
    Failed(String),
    Panicked(String),
    TimedOut(Duration),
}

impl PhaseOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, PhaseOutcome::Completed)
    }

    /// Human readable description naming the phase, `None` on success
    pub fn describe(&self, label: &str) -> Option<String> {
        match self {
            PhaseOutcome::Completed => None,
            PhaseOutcome::Failed(message) => Some(format!("`{label}` failed: {message}")),
            PhaseOutcome::Panicked(message) => Some(format!("`{label}` panicked: {message}")),
            PhaseOutcome::TimedOut(limit) => Some(RunnerError::timeout(label, *limit).to_string()),
        }
    }

    /// Mark `node` as ERROR with a log describing the failure
    pub fn record(&self, label: &str, node: &mut ReportNode) -> bool {
        match self.describe(label) {
            None => true,
            Some(message) => {
                node.fail_with_error(message);
                false
            }
        }
    }
}

/// Join handle that aborts its task when dropped, so spawned work cannot
/// outlive the execution awaiting it
pub(crate) struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self(tokio::spawn(fut))
    }

    fn abort(&self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` to completion on a fresh task, abandoning it after `timeout`.
/// Dropping the returned future aborts the task.
pub async fn run_phase<F>(label: &str, fut: F, timeout: Option<Duration>) -> PhaseOutcome
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    debug!("Running phase {}", label);
    let mut handle = AbortOnDrop::spawn(fut);

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                warn!("Phase {} timed out after {:?}", label, limit);
                return PhaseOutcome::TimedOut(limit);
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(())) => PhaseOutcome::Completed,
        Ok(Err(e)) => PhaseOutcome::Failed(format!("{e:#}")),
        Err(e) if e.is_panic() => PhaseOutcome::Panicked(panic_message(e.into_panic())),
        Err(e) => PhaseOutcome::Failed(e.to_string()),
    }
}

/// Best effort extraction of a panic payload message
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Category, Status};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_phase() {
        let outcome = run_phase(
            "slow case",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Some(Duration::from_secs(2)),
        )
        .await;
        assert_eq!(outcome, PhaseOutcome::TimedOut(Duration::from_secs(2)));

        let mut node = ReportNode::named("slow case", Category::Case);
        assert!(!outcome.record("slow case", &mut node));
        assert_eq!(node.status_override, Some(Status::Error));
        assert_eq!(node.logs[0].message, "`slow case` timeout after 2s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_phase_does_not_keep_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let phase = run_phase(
            "teardown",
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        let outer = tokio::spawn(phase);
        tokio::time::sleep(Duration::from_secs(1)).await;
        outer.abort();
        assert!(outer.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_error_and_panic_are_captured() {
        let failed = run_phase("setup", async { anyhow::bail!("no database") }, None).await;
        assert_eq!(failed, PhaseOutcome::Failed("no database".into()));

        let panicked = run_phase(
            "body",
            async {
                panic!("kaboom");
                #[allow(unreachable_code)]
                Ok(())
            },
            None,
        )
        .await;
        assert_eq!(panicked, PhaseOutcome::Panicked("kaboom".into()));
        assert_eq!(
            panicked.describe("body").as_deref(),
            Some("`body` panicked: kaboom")
        );
    }

    #[test]
    fn test_completed_records_nothing() {
        let mut node = ReportNode::named("ok", Category::Case);
        assert!(PhaseOutcome::Completed.record("ok", &mut node));
        assert!(node.logs.is_empty());
    }
}
