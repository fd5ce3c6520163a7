//! Multi-suite tests
//!
//! A `MultiTest` owns an environment and a list of suites, schedules the
//! suites' testcases through the execution group scheduler and can run a
//! single part of itself.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::environment::{Driver, Environment, EnvironmentHooks};
use super::suite::TestSuite;
use super::target::{RunContext, Test};
use crate::executor::{discover, skeleton, ExecutionGroupScheduler, StopOnError};
use crate::report::{Category, Part, ReportNode, RuntimeStatus, Status, Tags};

/// Settings of a multitest
#[derive(Clone, Debug, Default)]
pub struct MultiTestConfig {
    pub name: String,
    pub description: Option<String>,
    pub tags: Tags,
    pub part: Option<Part>,
    pub stop_on_error: Option<StopOnError>,
    /// Bound on concurrently running testcases of a group
    pub thread_pool_size: Option<usize>,
    /// Timeout for phases that declare none
    pub default_timeout: Option<Duration>,
}

/// Test made of suites run against an environment
#[derive(Clone)]
pub struct MultiTest {
    config: MultiTestConfig,
    suites: Vec<Arc<dyn TestSuite>>,
    environment: Environment,
}

impl MultiTest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: MultiTestConfig {
                name: name.into(),
                ..Default::default()
            },
            suites: Vec::new(),
            environment: Environment::default(),
        }
    }

    pub fn from_config(config: MultiTestConfig) -> Self {
        Self {
            config,
            suites: Vec::new(),
            environment: Environment::default(),
        }
    }

    pub fn with_suite<S: TestSuite + 'static>(mut self, suite: S) -> Self {
        self.suites.push(Arc::new(suite));
        self
    }

    pub fn with_driver<D: Driver + 'static>(mut self, driver: D) -> Self {
        self.environment.drivers.push(Arc::new(driver));
        self
    }

    pub fn with_hooks(mut self, hooks: EnvironmentHooks) -> Self {
        self.environment.hooks = hooks;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.config.tags = tags;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: StopOnError) -> Self {
        self.config.stop_on_error = Some(stop_on_error);
        self
    }

    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.config.thread_pool_size = Some(size);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &MultiTestConfig {
        &self.config
    }

    fn root(&self) -> ReportNode {
        let mut root = ReportNode::new(self.uid(), self.config.name.clone(), Category::Test)
            .with_tags(self.config.tags.clone());
        root.description = self.config.description.clone();
        root
    }
}

#[async_trait]
impl Test for MultiTest {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn part(&self) -> Option<Part> {
        self.config.part
    }

    fn set_part(&mut self, part: Option<Part>) {
        self.config.part = part;
    }

    fn dry_run(&self) -> ReportNode {
        let mut root = self.root();
        let plans = match discover(&self.suites, self.config.part) {
            Ok(plans) => plans,
            Err(e) => {
                root.fail_with_error(format!("Discovery failed: {e:#}"));
                return root;
            }
        };
        for node in self.environment.dry_run() {
            root.insert_ordered(node);
        }
        for plan in &plans {
            root.insert_ordered(skeleton(plan));
        }
        if let Some(part) = self.config.part {
            root.annotate_part(part);
        }
        root.propagate_tags();
        root
    }

    async fn run(&self, ctx: &RunContext) -> anyhow::Result<ReportNode> {
        let plans = discover(&self.suites, self.config.part)?;
        let default_timeout = self.config.default_timeout.or(ctx.settings.default_timeout);
        let stop_on_error = self.config.stop_on_error.unwrap_or(ctx.settings.stop_on_error);
        let pool_size = self
            .config
            .thread_pool_size
            .unwrap_or(ctx.settings.thread_pool_size);

        info!(
            "Running {} ({} suites, {} testcases)",
            self.uid(),
            plans.len(),
            plans.iter().map(|p| p.case_count()).sum::<usize>()
        );

        let mut root = self.root();
        root.set_runtime_status(RuntimeStatus::Running);
        root.timer.start("run");

        let started = self.environment.start(default_timeout).await;
        let env_failed = started.failed();
        if let Some(node) = started.node.clone() {
            root.append(node)?;
        }

        if env_failed {
            warn!("Environment of {} failed to start, skipping suites", self.uid());
        } else {
            let scheduler = ExecutionGroupScheduler::new(pool_size)
                .with_stop_on_error(stop_on_error)
                .with_default_timeout(default_timeout)
                .with_env(started.metadata.clone());
            for plan in &plans {
                let outcome = scheduler.run_suite(plan).await;
                root.append(outcome.node)?;
                if outcome.stop_test {
                    warn!("Stopping {} after a failure in {}", self.uid(), plan.suite.name());
                    break;
                }
            }
        }

        if let Some(node) = self.environment.stop(&started.drivers, default_timeout).await {
            root.append(node)?;
        }

        if root.status() == Status::Error {
            if let Some(node) = self.environment.handle_error(default_timeout).await {
                root.append(node)?;
            }
        }

        if let Some(part) = self.config.part {
            root.annotate_part(part);
        }
        root.set_status(Status::Passed);
        root.timer.end("run");
        root.set_runtime_status(RuntimeStatus::Finished);
        Ok(root)
    }
}
