//! Test suites and testcase declarations
//!
//! Suites register their testcases explicitly through [`TestSuite::cases`].

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::result::CaseResult;
use crate::report::Tags;

/// Everything a testcase body or hook gets to work with
#[derive(Clone, Debug)]
pub struct CaseContext {
    pub name: String,
    pub result: CaseResult,
    pub params: IndexMap<String, Value>,
    /// Metadata published by the started drivers, keyed by driver name
    pub env: Arc<IndexMap<String, Value>>,
}

impl CaseContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: CaseResult::new(),
            params: IndexMap::new(),
            env: Arc::new(IndexMap::new()),
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// Body of a testcase or hook
pub type StepFn = Arc<dyn Fn(CaseContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`StepFn`]
pub fn step<F, Fut>(f: F) -> StepFn
where
    F: Fn(CaseContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// A suite or environment hook with its own timeout
#[derive(Clone)]
pub struct Hook {
    pub body: StepFn,
    pub timeout: Option<Duration>,
}

impl Hook {
    pub fn new(body: StepFn) -> Self {
        Self {
            body,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("timeout", &self.timeout).finish()
    }
}

/// Execution group of a testcase
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionGroup {
    /// Run one by one, before any named group
    #[default]
    Sequential,
    /// Run concurrently with the other members of the group
    Named(String),
}

/// Expected failure marker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Xfail {
    pub reason: String,
    pub strict: bool,
}

/// Declaration of a single testcase
#[derive(Clone)]
pub struct CaseDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub group: ExecutionGroup,
    pub timeout: Option<Duration>,
    pub tags: Tags,
    /// Template name for generated, parametrized cases
    pub template: Option<String>,
    pub params: IndexMap<String, Value>,
    pub xfail: Option<Xfail>,
    pub body: StepFn,
}

impl CaseDescriptor {
    pub fn new(name: impl Into<String>, body: StepFn) -> Self {
        Self {
            name: name.into(),
            description: None,
            group: ExecutionGroup::Sequential,
            timeout: None,
            tags: Tags::new(),
            template: None,
            params: IndexMap::new(),
            xfail: None,
            body,
        }
    }

    /// Generate one case per parameter set, named `template <k=v, ...>`
    pub fn parametrized<I>(template: impl Into<String>, body: StepFn, param_sets: I) -> Vec<Self>
    where
        I: IntoIterator<Item = IndexMap<String, Value>>,
    {
        let template = template.into();
        param_sets
            .into_iter()
            .enumerate()
            .map(|(i, params)| {
                let label = if params.is_empty() {
                    i.to_string()
                } else {
                    params
                        .iter()
                        .map(|(k, v)| format!("{k}={}", display_value(v)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let mut case = Self::new(format!("{template} <{label}>"), body.clone());
                case.template = Some(template.clone());
                case.params = params;
                case
            })
            .collect()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = ExecutionGroup::Named(group.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn xfail(mut self, reason: impl Into<String>, strict: bool) -> Self {
        self.xfail = Some(Xfail {
            reason: reason.into(),
            strict,
        });
        self
    }
}

impl fmt::Debug for CaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("timeout", &self.timeout)
            .field("template", &self.template)
            .finish()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A collection of testcases with optional lifecycle hooks
pub trait TestSuite: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn tags(&self) -> Tags {
        Tags::new()
    }

    /// Run every case sequentially in declaration order, ignoring groups
    fn strict_order(&self) -> bool {
        false
    }

    fn cases(&self) -> Vec<CaseDescriptor>;

    fn setup(&self) -> Option<Hook> {
        None
    }

    fn teardown(&self) -> Option<Hook> {
        None
    }

    fn pre_testcase(&self) -> Option<Hook> {
        None
    }

    fn post_testcase(&self) -> Option<Hook> {
        None
    }
}

/// Builder-style [`TestSuite`]
#[derive(Clone, Default)]
pub struct Suite {
    name: String,
    description: Option<String>,
    tags: Tags,
    strict_order: bool,
    cases: Vec<CaseDescriptor>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
    pre_testcase: Option<Hook>,
    post_testcase: Option<Hook>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_order = true;
        self
    }

    pub fn case(mut self, case: CaseDescriptor) -> Self {
        self.cases.push(case);
        self
    }

    pub fn cases_from<I: IntoIterator<Item = CaseDescriptor>>(mut self, cases: I) -> Self {
        self.cases.extend(cases);
        self
    }

    pub fn with_setup(mut self, hook: Hook) -> Self {
        self.setup = Some(hook);
        self
    }

    pub fn with_teardown(mut self, hook: Hook) -> Self {
        self.teardown = Some(hook);
        self
    }

    pub fn with_pre_testcase(mut self, hook: Hook) -> Self {
        self.pre_testcase = Some(hook);
        self
    }

    pub fn with_post_testcase(mut self, hook: Hook) -> Self {
        self.post_testcase = Some(hook);
        self
    }
}

impl TestSuite for Suite {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn tags(&self) -> Tags {
        self.tags.clone()
    }

    fn strict_order(&self) -> bool {
        self.strict_order
    }

    fn cases(&self) -> Vec<CaseDescriptor> {
        self.cases.clone()
    }

    fn setup(&self) -> Option<Hook> {
        self.setup.clone()
    }

    fn teardown(&self) -> Option<Hook> {
        self.teardown.clone()
    }

    fn pre_testcase(&self) -> Option<Hook> {
        self.pre_testcase.clone()
    }

    fn post_testcase(&self) -> Option<Hook> {
        self.post_testcase.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> StepFn {
        step(|_ctx| async { Ok(()) })
    }

    #[test]
    fn test_parametrized_names() {
        let sets = (1..=3).map(|n| {
            let mut params = IndexMap::new();
            params.insert("n".to_string(), json!(n));
            params
        });
        let cases = CaseDescriptor::parametrized("square", noop(), sets);
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["square <n=1>", "square <n=2>", "square <n=3>"]);
        assert!(cases.iter().all(|c| c.template.as_deref() == Some("square")));
        assert_eq!(cases[2].params["n"], json!(3));
    }

    #[test]
    fn test_suite_builder() {
        let suite = Suite::new("Basic")
            .strict()
            .case(CaseDescriptor::new("a", noop()))
            .case(CaseDescriptor::new("b", noop()).in_group("io"))
            .with_setup(Hook::new(noop()).with_timeout(Duration::from_secs(1)));
        assert_eq!(suite.name(), "Basic");
        assert!(suite.strict_order());
        assert_eq!(suite.cases().len(), 2);
        assert_eq!(suite.cases()[1].group, ExecutionGroup::Named("io".into()));
        assert_eq!(suite.setup().unwrap().timeout, Some(Duration::from_secs(1)));
        assert!(suite.teardown().is_none());
    }

    #[tokio::test]
    async fn test_step_runs_body() {
        let body = step(|ctx: CaseContext| async move {
            ctx.result.check(true, "ran");
            Ok(())
        });
        let ctx = CaseContext::new("x");
        body(ctx.clone()).await.unwrap();
        assert!(ctx.result.passed());
        assert_eq!(ctx.result.take().assertions.len(), 1);
    }
}
