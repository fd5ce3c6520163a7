//! Test environments
//!
//! Drivers started before and stopped after a test's suites, plus the
//! environment hooks wrapped around them.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::suite::{CaseContext, Hook};
use crate::executor::run_phase;
use crate::report::{Category, Position, ReportNode, RuntimeStatus, Severity, Status};

pub const ENVIRONMENT_START: &str = "Environment Start";
pub const ENVIRONMENT_STOP: &str = "Environment Stop";
pub const ERROR_HANDLER: &str = "Error Handler";

/// A resource the test depends on
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Values published to testcases once the driver is up
    fn metadata(&self) -> IndexMap<String, Value> {
        IndexMap::new()
    }

    fn start_timeout(&self) -> Option<Duration> {
        None
    }

    fn stop_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Client side of a driver living on another host
#[async_trait]
pub trait DriverRpc: Send + Sync {
    async fn start(&self, driver: &str) -> anyhow::Result<()>;

    async fn stop(&self, driver: &str) -> anyhow::Result<()>;

    async fn metadata(&self, driver: &str) -> anyhow::Result<IndexMap<String, Value>>;
}

/// Driver forwarding its lifecycle to a [`DriverRpc`] client
pub struct RemoteDriver {
    name: String,
    rpc: Arc<dyn DriverRpc>,
    metadata: Mutex<IndexMap<String, Value>>,
    timeout: Option<Duration>,
}

impl RemoteDriver {
    pub fn new(name: impl Into<String>, rpc: Arc<dyn DriverRpc>) -> Self {
        Self {
            name: name.into(),
            rpc,
            metadata: Mutex::new(IndexMap::new()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Driver for RemoteDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.rpc.start(&self.name).await?;
        let metadata = self.rpc.metadata(&self.name).await?;
        *self.metadata.lock().unwrap_or_else(|e| e.into_inner()) = metadata;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.rpc.stop(&self.name).await
    }

    fn metadata(&self) -> IndexMap<String, Value> {
        self.metadata
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn start_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn stop_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Optional hooks around driver start and stop
#[derive(Clone, Debug, Default)]
pub struct EnvironmentHooks {
    pub before_start: Option<Hook>,
    pub after_start: Option<Hook>,
    pub before_stop: Option<Hook>,
    pub after_stop: Option<Hook>,
    pub error_handler: Option<Hook>,
}

/// Drivers and hooks of a test
#[derive(Clone, Default)]
pub struct Environment {
    pub drivers: Vec<Arc<dyn Driver>>,
    pub hooks: EnvironmentHooks,
}

/// Result of starting an environment
pub struct Started {
    pub node: Option<ReportNode>,
    /// Indices of drivers that started, in start order
    pub drivers: Vec<usize>,
    pub metadata: Arc<IndexMap<String, Value>>,
}

impl Started {
    pub fn failed(&self) -> bool {
        self.node
            .as_ref()
            .is_some_and(|node| node.status().is_failure())
    }
}

impl Environment {
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
            && self.hooks.before_start.is_none()
            && self.hooks.after_start.is_none()
            && self.hooks.before_stop.is_none()
            && self.hooks.after_stop.is_none()
    }

    /// Run `Before Start`, start drivers in order, run `After Start`
    pub async fn start(&self, default_timeout: Option<Duration>) -> Started {
        let mut started = Vec::new();
        if self.is_empty() {
            return Started {
                node: None,
                drivers: started,
                metadata: Arc::new(IndexMap::new()),
            };
        }

        let mut suite = synthesized_suite(ENVIRONMENT_START, Position::lead(0));
        let mut ok = true;

        if let Some(hook) = &self.hooks.before_start {
            let node = run_hook("Before Start", 0, hook, default_timeout).await;
            ok = !node.status().is_failure();
            append(&mut suite, node);
        }

        if ok && !self.drivers.is_empty() {
            let mut node = synthesized_case("Starting", 1);
            for (i, driver) in self.drivers.iter().enumerate() {
                let d = driver.clone();
                let label = format!("{} start", driver.name());
                let outcome = run_phase(
                    &label,
                    async move { d.start().await },
                    driver.start_timeout().or(default_timeout),
                )
                .await;
                if !outcome.record(&label, &mut node) {
                    ok = false;
                    break;
                }
                info!("Driver {} started", driver.name());
                node.log(Severity::Info, format!("{} started", driver.name()));
                started.push(i);
            }
            finish_case(&mut node);
            append(&mut suite, node);
        }

        if ok {
            if let Some(hook) = &self.hooks.after_start {
                append(&mut suite, run_hook("After Start", 2, hook, default_timeout).await);
            }
        }

        let mut metadata = IndexMap::new();
        for &i in &started {
            let driver = &self.drivers[i];
            let values: serde_json::Map<String, Value> = driver.metadata().into_iter().collect();
            metadata.insert(driver.name().to_string(), Value::Object(values));
        }

        Started {
            node: Some(suite),
            drivers: started,
            metadata: Arc::new(metadata),
        }
    }

    /// Run `Before Stop`, stop started drivers in reverse, run `After Stop`
    pub async fn stop(&self, started: &[usize], default_timeout: Option<Duration>) -> Option<ReportNode> {
        if self.is_empty() {
            return None;
        }
        let mut suite = synthesized_suite(ENVIRONMENT_STOP, Position::trail(0));

        if let Some(hook) = &self.hooks.before_stop {
            append(&mut suite, run_hook("Before Stop", 0, hook, default_timeout).await);
        }

        if !started.is_empty() {
            let mut node = synthesized_case("Stopping", 1);
            for &i in started.iter().rev() {
                let driver = &self.drivers[i];
                let d = driver.clone();
                let label = format!("{} stop", driver.name());
                let outcome = run_phase(
                    &label,
                    async move { d.stop().await },
                    driver.stop_timeout().or(default_timeout),
                )
                .await;
                if outcome.record(&label, &mut node) {
                    debug!("Driver {} stopped", driver.name());
                    node.log(Severity::Info, format!("{} stopped", driver.name()));
                } else {
                    warn!("Driver {} failed to stop", driver.name());
                }
            }
            finish_case(&mut node);
            append(&mut suite, node);
        }

        if let Some(hook) = &self.hooks.after_stop {
            append(&mut suite, run_hook("After Stop", 2, hook, default_timeout).await);
        }

        (!suite.entries().is_empty()).then_some(suite)
    }

    /// Run the error handler hook, if any
    pub async fn handle_error(&self, default_timeout: Option<Duration>) -> Option<ReportNode> {
        let hook = self.hooks.error_handler.as_ref()?;
        let mut suite = synthesized_suite(ERROR_HANDLER, Position::trail(1));
        append(&mut suite, run_hook(ERROR_HANDLER, 0, hook, default_timeout).await);
        Some(suite)
    }

    /// Structure of the environment nodes without running anything
    pub fn dry_run(&self) -> Vec<ReportNode> {
        let mut nodes = Vec::new();
        if self.is_empty() {
            return nodes;
        }
        let mut start = synthesized_suite(ENVIRONMENT_START, Position::lead(0));
        let mut stop = synthesized_suite(ENVIRONMENT_STOP, Position::trail(0));
        if self.hooks.before_start.is_some() {
            append(&mut start, synthesized_case("Before Start", 0));
        }
        if self.hooks.before_stop.is_some() {
            append(&mut stop, synthesized_case("Before Stop", 0));
        }
        if !self.drivers.is_empty() {
            append(&mut start, synthesized_case("Starting", 1));
            append(&mut stop, synthesized_case("Stopping", 1));
        }
        if self.hooks.after_start.is_some() {
            append(&mut start, synthesized_case("After Start", 2));
        }
        if self.hooks.after_stop.is_some() {
            append(&mut stop, synthesized_case("After Stop", 2));
        }
        nodes.push(start);
        nodes.push(stop);
        nodes.retain(|node| !node.entries().is_empty());
        nodes
    }
}

pub(crate) fn synthesized_suite(name: &str, position: Position) -> ReportNode {
    ReportNode::named(name, Category::SynthesizedSuite).with_position(position)
}

pub(crate) fn synthesized_case(name: &str, index: u64) -> ReportNode {
    ReportNode::named(name, Category::SynthesizedCase).with_position(Position::body(index))
}

fn append(suite: &mut ReportNode, node: ReportNode) {
    if let Err(e) = suite.append(node) {
        warn!("Dropping duplicate environment node: {}", e);
    }
}

fn finish_case(node: &mut ReportNode) {
    if node.status_override.is_none() {
        node.set_status(Status::Passed);
    }
    node.set_runtime_status(RuntimeStatus::Finished);
}

/// Run a hook as a synthesized testcase node
pub(crate) async fn run_hook(
    name: &str,
    index: u64,
    hook: &Hook,
    default_timeout: Option<Duration>,
) -> ReportNode {
    let mut node = synthesized_case(name, index);
    node.timer.start("run");
    let ctx = CaseContext::new(name);
    let outcome = run_phase(name, (hook.body)(ctx.clone()), hook.timeout.or(default_timeout)).await;
    let collected = ctx.result.take();
    node.assertions = collected.assertions;
    node.logs.extend(collected.logs);
    outcome.record(name, &mut node);
    node.timer.end("run");
    if node.assertions.is_empty() {
        finish_case(&mut node);
    } else {
        node.set_runtime_status(RuntimeStatus::Finished);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::step;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDriver {
        name: String,
        fail_start: bool,
        events: Arc<Mutex<Vec<String>>>,
        stopped: AtomicBool,
    }

    impl FakeDriver {
        fn new(name: &str, fail_start: bool, events: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail_start,
                events: events.clone(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("cannot bind port");
            }
            self.events.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            self.events.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }

        fn metadata(&self) -> IndexMap<String, Value> {
            let mut values = IndexMap::new();
            values.insert("port".to_string(), Value::from(8080));
            values
        }
    }

    #[tokio::test]
    async fn test_drivers_stop_in_reverse_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let env = Environment {
            drivers: vec![
                FakeDriver::new("db", false, &events) as Arc<dyn Driver>,
                FakeDriver::new("server", false, &events) as Arc<dyn Driver>,
            ],
            hooks: EnvironmentHooks::default(),
        };
        let started = env.start(None).await;
        assert!(!started.failed());
        assert_eq!(started.metadata["db"]["port"], 8080);
        let stop = env.stop(&started.drivers, None).await.unwrap();
        assert_eq!(stop.status(), Status::Passed);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start db", "start server", "stop server", "stop db"]
        );
    }

    #[tokio::test]
    async fn test_only_started_drivers_are_stopped() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let broken = FakeDriver::new("broken", true, &events);
        let env = Environment {
            drivers: vec![
                FakeDriver::new("db", false, &events) as Arc<dyn Driver>,
                broken.clone() as Arc<dyn Driver>,
            ],
            hooks: EnvironmentHooks {
                after_start: Some(Hook::new(step(|_ctx| async { Ok(()) }))),
                ..Default::default()
            },
        };
        let started = env.start(None).await;
        assert!(started.failed());
        assert_eq!(started.drivers, vec![0]);
        let node = started.node.as_ref().unwrap();
        assert!(node.child("After Start").is_none());
        let starting = node.child("Starting").unwrap();
        assert!(starting.logs.iter().any(|l| l.message.contains("cannot bind port")));

        env.stop(&started.drivers, None).await;
        assert!(!broken.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_environment_has_no_nodes() {
        let env = Environment::default();
        assert!(env.start(None).await.node.is_none());
        assert!(env.stop(&[], None).await.is_none());
        assert!(env.handle_error(None).await.is_none());
        assert!(env.dry_run().is_empty());
    }

    struct FakeRpc;

    #[async_trait]
    impl DriverRpc for FakeRpc {
        async fn start(&self, _driver: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self, _driver: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn metadata(&self, driver: &str) -> anyhow::Result<IndexMap<String, Value>> {
            let mut values = IndexMap::new();
            values.insert("host".to_string(), Value::from(format!("{driver}.remote")));
            Ok(values)
        }
    }

    #[tokio::test]
    async fn test_remote_driver_caches_metadata() {
        let driver = RemoteDriver::new("cache", Arc::new(FakeRpc));
        assert!(driver.metadata().is_empty());
        driver.start().await.unwrap();
        assert_eq!(driver.metadata()["host"], "cache.remote");
        driver.stop().await.unwrap();
    }
}
