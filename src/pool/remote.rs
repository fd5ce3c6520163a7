//! Remote workers
//!
//! Delegates executions to remote hosts through an explicit RPC interface.
//! Successful pings count as heartbeats.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::worker::{Heartbeat, WorkerBackend};
use crate::models::Task;
use crate::report::ReportNode;
use crate::testing::RunContext;

/// RPC surface of a remote execution host
#[async_trait]
pub trait RemoteHost: Send + Sync {
    fn address(&self) -> &str;

    async fn run_task(&self, task: &Task) -> Result<ReportNode>;

    async fn ping(&self) -> Result<()>;
}

/// Worker `i` of the pool executes on host `i mod hosts`
#[derive(Clone, Default)]
pub struct RemoteBackend {
    hosts: Vec<Arc<dyn RemoteHost>>,
}

impl RemoteBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host<H: RemoteHost + 'static>(mut self, host: H) -> Self {
        self.hosts.push(Arc::new(host));
        self
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[async_trait]
impl WorkerBackend for RemoteBackend {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn execute(&self, task: &Task, _ctx: &RunContext, heartbeat: Heartbeat) -> Result<ReportNode> {
        if self.hosts.is_empty() {
            bail!("no remote hosts configured");
        }
        let host = &self.hosts[heartbeat.worker() % self.hosts.len()];
        debug!("Running {} on {}", task, host.address());

        let run = host.run_task(task);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(heartbeat.interval());
        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => match host.ping().await {
                    Ok(()) => heartbeat.beat().await,
                    Err(e) => warn!("Ping to {} failed: {:#}", host.address(), e),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Category, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeHost {
        address: String,
        pings: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteHost for FakeHost {
        fn address(&self) -> &str {
            &self.address
        }

        async fn run_task(&self, task: &Task) -> Result<ReportNode> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let mut node = ReportNode::new(task.report_uid(), task.test_name(), Category::Test);
            node.host = Some(self.address.clone());
            node.set_status(Status::Passed);
            Ok(node)
        }

        async fn ping(&self) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_host_and_pings() {
        let pings = Arc::new(AtomicUsize::new(0));
        let backend = RemoteBackend::new().with_host(FakeHost {
            address: "10.0.0.1:9000".into(),
            pings: pings.clone(),
        });
        let report = backend
            .execute(
                &Task::new("remote"),
                &RunContext::default(),
                Heartbeat::detached(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(report.host.as_deref(), Some("10.0.0.1:9000"));
        assert!(pings.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let err = RemoteBackend::new()
            .execute(
                &Task::new("remote"),
                &RunContext::default(),
                Heartbeat::detached(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no remote hosts"));
    }
}
