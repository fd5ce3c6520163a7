//! Test plans
//!
//! The scheduling surface: named pools, task scheduling and the run that
//! collects every pool's results into one plan report.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use super::parts::PartCoordinator;
use crate::error::RunnerError;
use crate::models::{Task, TaskId, TaskResult};
use crate::pool::{Pool, PoolConfig, ThreadBackend};
use crate::report::{Category, ReportNode, RuntimeStatus, Severity, Status, Tags};
use crate::testing::RunContext;
use crate::utils::Interval;

pub const DEFAULT_POOL: &str = "default";

pub struct TestPlan {
    name: String,
    ctx: RunContext,
    pools: IndexMap<String, Pool>,
    coordinator: Arc<RwLock<PartCoordinator>>,
    created: DateTime<Utc>,
}

impl TestPlan {
    /// Plan with a thread-backed `default` pool
    pub fn new(name: impl Into<String>, ctx: RunContext) -> Self {
        let mut pools = IndexMap::new();
        pools.insert(
            DEFAULT_POOL.to_string(),
            Pool::new(PoolConfig::new(DEFAULT_POOL), ThreadBackend),
        );
        Self {
            name: name.into(),
            ctx,
            pools,
            coordinator: Arc::new(RwLock::new(PartCoordinator::new())),
            created: Utc::now(),
        }
    }

    /// Keep part fragments apart in the plan report
    pub fn with_part_merging(self, enabled: bool) -> Self {
        let coordinator = PartCoordinator::new().with_part_merging(enabled);
        Self {
            coordinator: Arc::new(RwLock::new(coordinator)),
            ..self
        }
    }

    /// Replace the `default` pool
    pub fn with_default_pool(mut self, pool: Pool) -> Self {
        self.pools.insert(DEFAULT_POOL.to_string(), pool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Register an additional pool under its configured name
    pub fn add_resource(&mut self, pool: Pool) -> Result<(), RunnerError> {
        let name = pool.name().to_string();
        if self.pools.contains_key(&name) {
            return Err(RunnerError::DuplicatePool(name));
        }
        info!("Added {} pool {}", pool.backend_kind(), name);
        self.pools.insert(name, pool);
        Ok(())
    }

    /// Schedule `task` on `pool`, or on the default pool
    pub async fn schedule(&self, mut task: Task, pool: Option<&str>) -> Result<TaskId> {
        let pool_name = pool.unwrap_or(DEFAULT_POOL);
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| RunnerError::UnknownPool(pool_name.to_string()))?;

        if task.name.is_none() {
            let test = self.ctx.registry.build(&task.target)?;
            task.name = Some(test.name().to_string());
        }

        if pool.contains(&task.id).await {
            return Err(RunnerError::DuplicateTask(task.id.to_string()).into());
        }
        self.coordinator
            .write()
            .await
            .register(task.test_name(), task.part)?;

        let id = task.id.clone();
        let (name, part) = (task.test_name().to_string(), task.part);
        info!("Scheduled {} on pool {}", task, pool_name);
        if let Err(e) = pool.add(task).await {
            self.coordinator.write().await.unregister(&name, part);
            return Err(e.into());
        }
        Ok(id)
    }

    /// Run every pool to completion and return the plan report
    pub async fn run(&self) -> ReportNode {
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskResult>();
        let coordinator = self.coordinator.clone();
        let collector = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                coordinator.write().await.accept(result);
            }
        });

        let runs = self
            .pools
            .values()
            .map(|pool| pool.run(&self.ctx, Some(tx.clone())));
        let finished: usize = join_all(runs).await.iter().map(Vec::len).sum();
        drop(tx);
        if let Err(e) = collector.await {
            error!("Result collector failed: {}", e);
        }
        info!("Plan {} finished {} tasks", self.name, finished);

        let mut root = self.root().await;
        root.timer.end("run");
        root.set_runtime_status(RuntimeStatus::Finished);
        root
    }

    /// Current plan report, optionally filtered by tags
    pub async fn snapshot(&self, tags: Option<&Tags>) -> ReportNode {
        let root = self.root().await;
        match tags {
            Some(tags) if !tags.is_empty() => root.filter_by_tags(tags, false),
            _ => root,
        }
    }

    async fn root(&self) -> ReportNode {
        let mut root = ReportNode::new(self.name.clone(), self.name.clone(), Category::Plan);
        root.timer.set(
            "run",
            Interval {
                start: self.created,
                end: None,
            },
        );
        for report in self.coordinator.read().await.reports() {
            if let Err(e) = root.append(report) {
                root.log(Severity::Error, e.to_string());
            }
        }
        root.set_status(Status::Passed);
        root
    }
}
