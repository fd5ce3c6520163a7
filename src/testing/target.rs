//! Test targets
//!
//! The `Test` adapter contract, the registry workers materialise targets
//! from, and the context handed to running tests.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RunnerError;
use crate::executor::StopOnError;
use crate::report::{Part, ReportNode};
use crate::utils::LogLevel;

/// Anything that can run and produce a report fragment
#[async_trait]
pub trait Test: Send + Sync {
    fn name(&self) -> &str;

    fn part(&self) -> Option<Part>;

    fn set_part(&mut self, part: Option<Part>);

    /// Uid of the produced report, suffixed when running a part
    fn uid(&self) -> String {
        match self.part() {
            Some(part) => format!("{}{}", self.name(), part.suffix()),
            None => self.name().to_string(),
        }
    }

    /// Report skeleton without running anything
    fn dry_run(&self) -> ReportNode;

    async fn run(&self, ctx: &RunContext) -> anyhow::Result<ReportNode>;
}

/// Builds a fresh target instance
pub type TargetFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Test>> + Send + Sync>;

/// Named target factories
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: IndexMap<String, TargetFactory>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Test>> + Send + Sync + 'static,
    {
        self.targets.insert(name.into(), Arc::new(factory));
    }

    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Test>> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Materialise a new instance of `name`
    pub fn build(&self, name: &str) -> anyhow::Result<Box<dyn Test>> {
        let factory = self
            .targets
            .get(name)
            .ok_or_else(|| RunnerError::UnknownTarget(name.to_string()))?;
        factory()
    }
}

/// Settings shared by every execution of a run
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Used when a test declares no thread pool size
    pub thread_pool_size: usize,
    /// Used when a phase declares no timeout
    pub default_timeout: Option<Duration>,
    /// Used when a test declares no stop-on-error scope
    pub stop_on_error: StopOnError,
    /// Executable started by process workers
    pub child_program: Option<PathBuf>,
    /// Interval at which process workers report liveness
    pub heartbeat_interval: Duration,
    /// Log level handed on to child processes
    pub log_level: Option<LogLevel>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            default_timeout: None,
            stop_on_error: StopOnError::Off,
            child_program: None,
            heartbeat_interval: Duration::from_secs(5),
            log_level: None,
        }
    }
}

/// Registry and settings passed into pools and workers
#[derive(Clone, Default)]
pub struct RunContext {
    pub registry: Arc<TargetRegistry>,
    pub settings: RunSettings,
}

impl RunContext {
    pub fn new(registry: TargetRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Category;

    struct Named {
        name: String,
        part: Option<Part>,
    }

    #[async_trait]
    impl Test for Named {
        fn name(&self) -> &str {
            &self.name
        }

        fn part(&self) -> Option<Part> {
            self.part
        }

        fn set_part(&mut self, part: Option<Part>) {
            self.part = part;
        }

        fn dry_run(&self) -> ReportNode {
            ReportNode::new(self.uid(), self.name.clone(), Category::Test)
        }

        async fn run(&self, _ctx: &RunContext) -> anyhow::Result<ReportNode> {
            Ok(self.dry_run())
        }
    }

    #[test]
    fn test_registry_builds_fresh_instances() {
        let registry = TargetRegistry::new().with("named", || {
            Ok(Box::new(Named {
                name: "Named".into(),
                part: None,
            }) as Box<dyn Test>)
        });
        assert!(registry.contains("named"));
        let mut test = registry.build("named").unwrap();
        test.set_part(Some(Part::new(0, 2).unwrap()));
        assert_eq!(test.uid(), "Named - part(0/2)");
        assert_eq!(registry.build("named").unwrap().uid(), "Named");
    }

    #[test]
    fn test_unknown_target() {
        let err = TargetRegistry::new().build("missing").err().unwrap();
        assert!(matches!(
            err.downcast_ref::<RunnerError>(),
            Some(RunnerError::UnknownTarget(name)) if name == "missing"
        ));
    }
}
