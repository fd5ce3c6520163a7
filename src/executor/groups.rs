//! Execution group scheduling
//!
//! Resolves the testcases of each suite into ordered execution groups and
//! runs them: the sequential group first, then every named group
//! concurrently on a bounded pool, one group at a time.

use anyhow::{bail, Result};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::phase::{run_phase, AbortOnDrop};
use crate::report::{Category, Part, Position, ReportNode, RuntimeStatus, Severity, Status};
use crate::testing::{
    run_hook, CaseContext, CaseDescriptor, ExecutionGroup, Hook, TestSuite, Xfail,
};

/// Scope of truncation after a failing phase or testcase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopOnError {
    #[default]
    Off,
    /// Skip the remaining testcases of the suite
    Suite,
    /// Also skip the remaining suites of the test
    Test,
}

impl StopOnError {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "false" => Some(StopOnError::Off),
            "suite" => Some(StopOnError::Suite),
            "test" => Some(StopOnError::Test),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StopOnError::Off => "off",
            StopOnError::Suite => "suite",
            StopOnError::Test => "test",
        }
    }
}

/// State of a suite run, logged on every transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Ready,
    Running { group: usize },
    Finished,
    Error,
}

/// A selected testcase with its global declaration ordinal
#[derive(Clone, Debug)]
pub struct DiscoveredCase {
    pub ordinal: usize,
    pub descriptor: CaseDescriptor,
}

#[derive(Clone, Debug)]
pub struct GroupPlan {
    pub group: ExecutionGroup,
    pub cases: Vec<DiscoveredCase>,
}

/// Everything needed to run one suite
#[derive(Clone)]
pub struct SuitePlan {
    pub index: usize,
    pub suite: Arc<dyn TestSuite>,
    pub groups: Vec<GroupPlan>,
    /// Ordinal of the first declared case of each parametrization template
    pub templates: HashMap<String, usize>,
}

impl SuitePlan {
    pub fn case_count(&self) -> usize {
        self.groups.iter().map(|g| g.cases.len()).sum()
    }
}

/// Resolve suites into execution plans.
///
/// Testcases are numbered across suites in declaration order; with a part
/// set only cases whose ordinal falls into it are kept, and suites left
/// without cases are dropped.
pub fn discover(suites: &[Arc<dyn TestSuite>], part: Option<Part>) -> Result<Vec<SuitePlan>> {
    let mut plans = Vec::new();
    let mut suite_names = HashSet::new();
    let mut ordinal = 0usize;

    for (index, suite) in suites.iter().enumerate() {
        if !suite_names.insert(suite.name().to_string()) {
            bail!("Duplicate suite name: {}", suite.name());
        }

        let mut names = HashSet::new();
        let mut templates = HashMap::new();
        let mut selected = Vec::new();

        for case in suite.cases() {
            if !names.insert(case.name.clone()) {
                bail!("Duplicate testcase {} in suite {}", case.name, suite.name());
            }
            if let Some(template) = &case.template {
                templates.entry(template.clone()).or_insert(ordinal);
            }
            if part.map_or(true, |p| p.owns(ordinal)) {
                selected.push(DiscoveredCase {
                    ordinal,
                    descriptor: case,
                });
            }
            ordinal += 1;
        }

        if let Some(clash) = templates.keys().find(|t| names.contains(*t)) {
            bail!(
                "Parametrization template {} clashes with a testcase in suite {}",
                clash,
                suite.name()
            );
        }
        if part.is_some() && selected.is_empty() {
            continue;
        }

        plans.push(SuitePlan {
            index,
            suite: suite.clone(),
            groups: resolve_groups(selected, suite.strict_order()),
            templates,
        });
    }

    Ok(plans)
}

fn resolve_groups(cases: Vec<DiscoveredCase>, strict_order: bool) -> Vec<GroupPlan> {
    if strict_order {
        return vec![GroupPlan {
            group: ExecutionGroup::Sequential,
            cases,
        }];
    }

    let mut sequential = Vec::new();
    let mut named: IndexMap<String, Vec<DiscoveredCase>> = IndexMap::new();
    for case in cases {
        match &case.descriptor.group {
            ExecutionGroup::Sequential => sequential.push(case),
            ExecutionGroup::Named(name) => named.entry(name.clone()).or_default().push(case),
        }
    }

    let mut groups = Vec::new();
    if !sequential.is_empty() {
        groups.push(GroupPlan {
            group: ExecutionGroup::Sequential,
            cases: sequential,
        });
    }
    groups.extend(named.into_iter().map(|(name, cases)| GroupPlan {
        group: ExecutionGroup::Named(name),
        cases,
    }));
    groups
}

/// Report of a suite run
pub struct SuiteOutcome {
    pub node: ReportNode,
    /// Remaining suites of the test must be skipped
    pub stop_test: bool,
}

/// Runs the testcases of one suite honouring group order and timeouts
#[derive(Clone)]
pub struct ExecutionGroupScheduler {
    pool_size: usize,
    stop_on_error: StopOnError,
    default_timeout: Option<Duration>,
    env: Arc<IndexMap<String, Value>>,
}

impl ExecutionGroupScheduler {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size: pool_size.max(1),
            stop_on_error: StopOnError::Off,
            default_timeout: None,
            env: Arc::new(IndexMap::new()),
        }
    }

    pub fn with_stop_on_error(mut self, stop_on_error: StopOnError) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_env(mut self, env: Arc<IndexMap<String, Value>>) -> Self {
        self.env = env;
        self
    }

    fn transition(&self, suite: &str, state: &mut SchedulerState, next: SchedulerState) {
        debug!("Suite {}: {:?} -> {:?}", suite, state, next);
        *state = next;
    }

    pub async fn run_suite(&self, plan: &SuitePlan) -> SuiteOutcome {
        let suite = &plan.suite;
        let mut state = SchedulerState::Ready;
        let mut node = suite_node(plan);
        node.set_runtime_status(RuntimeStatus::Running);
        node.timer.start("run");

        info!("Running suite {} ({} testcases)", suite.name(), plan.case_count());

        let mut stopped = false;
        let setup_ok = match suite.setup() {
            Some(hook) => {
                let setup = self.run_fixture("setup", Position::lead(0), &hook).await;
                let ok = !setup.status().is_failure();
                node.insert_ordered(setup);
                ok
            }
            None => true,
        };

        if setup_ok {
            let runner = CaseRunner {
                pre: suite.pre_testcase(),
                post: suite.post_testcase(),
                default_timeout: self.default_timeout,
                env: self.env.clone(),
            };
            for (index, group) in plan.groups.iter().enumerate() {
                self.transition(suite.name(), &mut state, SchedulerState::Running { group: index });
                let (results, failed) = match &group.group {
                    ExecutionGroup::Sequential => self.run_sequential(&runner, &group.cases).await,
                    ExecutionGroup::Named(_) => self.run_concurrent(&runner, &group.cases).await,
                };
                for (case, case_node) in results {
                    place(&mut node, plan, case, case_node);
                }
                if failed && self.stop_on_error != StopOnError::Off {
                    warn!(
                        "Stopping suite {} after a failure in group {}",
                        suite.name(),
                        index
                    );
                    stopped = true;
                    break;
                }
            }
        } else {
            warn!("Setup of suite {} failed, skipping its testcases", suite.name());
            stopped = self.stop_on_error != StopOnError::Off;
        }

        if let Some(hook) = suite.teardown() {
            let teardown = self.run_fixture("teardown", Position::trail(0), &hook).await;
            if teardown.status().is_failure() && self.stop_on_error != StopOnError::Off {
                stopped = true;
            }
            node.insert_ordered(teardown);
        }

        let end = if node.status().is_failure() {
            SchedulerState::Error
        } else {
            SchedulerState::Finished
        };
        self.transition(suite.name(), &mut state, end);

        node.set_status(Status::Passed);
        node.propagate_tags();
        node.timer.end("run");
        node.set_runtime_status(RuntimeStatus::Finished);

        SuiteOutcome {
            node,
            stop_test: stopped && self.stop_on_error == StopOnError::Test,
        }
    }

    async fn run_fixture(&self, name: &str, position: Position, hook: &Hook) -> ReportNode {
        let mut node = run_hook(name, 0, hook, self.default_timeout).await;
        node.position = Some(position);
        node
    }

    async fn run_sequential(
        &self,
        runner: &CaseRunner,
        cases: &[DiscoveredCase],
    ) -> (Vec<(DiscoveredCase, ReportNode)>, bool) {
        let mut results = Vec::new();
        for case in cases {
            let case_node = runner.run(case.clone()).await;
            let failed = case_node.status().is_failure();
            results.push((case.clone(), case_node));
            if failed && self.stop_on_error != StopOnError::Off {
                return (results, true);
            }
        }
        (results, false)
    }

    async fn run_concurrent(
        &self,
        runner: &CaseRunner,
        cases: &[DiscoveredCase],
    ) -> (Vec<(DiscoveredCase, ReportNode)>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut handles = Vec::new();

        for case in cases {
            let semaphore = semaphore.clone();
            let runner = runner.clone();
            let case = case.clone();

            let handle = AbortOnDrop::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                runner.run(case).await
            });

            handles.push(handle);
        }

        let joined = join_all(handles).await;
        let mut failed = false;
        let results: Vec<(DiscoveredCase, ReportNode)> = cases
            .iter()
            .cloned()
            .zip(joined)
            .map(|(case, joined)| {
                let case_node = joined.unwrap_or_else(|e| {
                    let mut node = case_skeleton(&case);
                    node.fail_with_error(format!("`{}` crashed: {}", case.descriptor.name, e));
                    node
                });
                failed |= case_node.status().is_failure();
                (case, case_node)
            })
            .collect();
        (results, failed)
    }
}

fn suite_node(plan: &SuitePlan) -> ReportNode {
    let suite = &plan.suite;
    let mut node = ReportNode::named(suite.name(), Category::Suite)
        .with_position(Position::body(plan.index as u64))
        .with_tags(suite.tags());
    node.description = suite.description().map(str::to_string);
    node
}

fn case_skeleton(case: &DiscoveredCase) -> ReportNode {
    let descriptor = &case.descriptor;
    let mut node = ReportNode::named(&descriptor.name, Category::Case)
        .with_position(Position::body(case.ordinal as u64))
        .with_tags(descriptor.tags.clone());
    node.description = descriptor.description.clone();
    node
}

/// Put a case node at its declaration position, inside its
/// parametrization group when it has one
fn place(suite: &mut ReportNode, plan: &SuitePlan, case: DiscoveredCase, node: ReportNode) {
    match &case.descriptor.template {
        None => suite.insert_ordered(node),
        Some(template) => {
            if !suite.has_child(template) {
                let first = plan.templates.get(template).copied().unwrap_or(case.ordinal);
                suite.insert_ordered(
                    ReportNode::named(template, Category::Parametrization)
                        .with_position(Position::body(first as u64)),
                );
            }
            if let Some(group) = suite.child_mut(template) {
                group.insert_ordered(node);
            }
        }
    }
}

/// Structure of a suite run without executing anything
pub fn skeleton(plan: &SuitePlan) -> ReportNode {
    let mut node = suite_node(plan);
    if plan.suite.setup().is_some() {
        node.insert_ordered(
            ReportNode::named("setup", Category::SynthesizedCase).with_position(Position::lead(0)),
        );
    }
    for case in plan.groups.iter().flat_map(|g| g.cases.iter()) {
        place(&mut node, plan, case.clone(), case_skeleton(case));
    }
    if plan.suite.teardown().is_some() {
        node.insert_ordered(
            ReportNode::named("teardown", Category::SynthesizedCase)
                .with_position(Position::trail(0)),
        );
    }
    node.propagate_tags();
    node
}

/// Runs single testcases: `pre_testcase`, body, `post_testcase`
#[derive(Clone)]
struct CaseRunner {
    pre: Option<Hook>,
    post: Option<Hook>,
    default_timeout: Option<Duration>,
    env: Arc<IndexMap<String, Value>>,
}

impl CaseRunner {
    async fn run(&self, case: DiscoveredCase) -> ReportNode {
        let mut node = case_skeleton(&case);
        let descriptor = case.descriptor;
        node.set_runtime_status(RuntimeStatus::Running);
        node.timer.start("run");

        let ctx = CaseContext {
            name: descriptor.name.clone(),
            result: Default::default(),
            params: descriptor.params.clone(),
            env: self.env.clone(),
        };

        let mut ok = true;
        if let Some(hook) = &self.pre {
            let outcome = run_phase(
                "pre_testcase",
                (hook.body)(ctx.clone()),
                hook.timeout.or(self.default_timeout),
            )
            .await;
            ok = outcome.record("pre_testcase", &mut node);
        }

        if ok {
            let outcome = run_phase(
                &descriptor.name,
                (descriptor.body)(ctx.clone()),
                descriptor.timeout.or(self.default_timeout),
            )
            .await;
            outcome.record(&descriptor.name, &mut node);
        }

        if let Some(hook) = &self.post {
            let outcome = run_phase(
                "post_testcase",
                (hook.body)(ctx.clone()),
                hook.timeout.or(self.default_timeout),
            )
            .await;
            outcome.record("post_testcase", &mut node);
        }

        let collected = ctx.result.take();
        node.assertions = collected.assertions;
        node.logs.extend(collected.logs);
        node.logs.sort_by_key(|log| log.created);

        if let Some(reason) = collected.skipped {
            if node.status_override.is_none() {
                node.log(Severity::Info, format!("Skipped: {reason}"));
                node.status_override = Some(Status::Skipped);
            }
        }
        if node.status_override.is_none() && node.assertions.is_empty() {
            node.set_status(Status::Passed);
        }
        if let Some(xfail) = &descriptor.xfail {
            apply_xfail(&mut node, xfail);
        }

        node.timer.end("run");
        node.set_runtime_status(RuntimeStatus::Finished);
        debug!("Testcase {} finished: {}", node.name, node.status());
        node
    }
}

fn apply_xfail(node: &mut ReportNode, xfail: &Xfail) {
    let status = node.status();
    let rewritten = if status.is_failure() {
        Status::Xfail
    } else if status.is_passed() {
        if xfail.strict {
            Status::XpassStrict
        } else {
            Status::Xpass
        }
    } else {
        return;
    };
    node.log(Severity::Info, format!("Expected failure: {}", xfail.reason));
    node.status_override = Some(rewritten);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{step, Suite};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn ok_case(name: &str) -> CaseDescriptor {
        CaseDescriptor::new(name, step(|_ctx| async { Ok(()) }))
    }

    fn failing_case(name: &str) -> CaseDescriptor {
        CaseDescriptor::new(name, step(|_ctx| async { anyhow::bail!("boom") }))
    }

    fn plans_for(suite: Suite, part: Option<Part>) -> Vec<SuitePlan> {
        let suites: Vec<Arc<dyn TestSuite>> = vec![Arc::new(suite)];
        discover(&suites, part).unwrap()
    }

    fn child_uids(node: &ReportNode) -> Vec<String> {
        node.entries().iter().map(|e| e.uid.clone()).collect()
    }

    #[tokio::test]
    async fn test_stop_on_error_truncates_sequential_cases() {
        let suite = Suite::new("S")
            .case(ok_case("c1"))
            .case(failing_case("c2"))
            .case(ok_case("c3"));
        let plan = &plans_for(suite, None)[0];
        let outcome = ExecutionGroupScheduler::new(2)
            .with_stop_on_error(StopOnError::Suite)
            .run_suite(plan)
            .await;

        assert_eq!(child_uids(&outcome.node), vec!["c1", "c2"]);
        assert_eq!(outcome.node.child("c1").unwrap().status(), Status::Passed);
        assert_eq!(outcome.node.child("c2").unwrap().status(), Status::Error);
        assert!(!outcome.stop_test);
    }

    #[tokio::test]
    async fn test_without_stop_on_error_all_cases_run() {
        let suite = Suite::new("S")
            .case(ok_case("c1"))
            .case(failing_case("c2"))
            .case(ok_case("c3"));
        let plan = &plans_for(suite, None)[0];
        let outcome = ExecutionGroupScheduler::new(2).run_suite(plan).await;
        assert_eq!(child_uids(&outcome.node), vec!["c1", "c2", "c3"]);
        assert_eq!(outcome.node.status(), Status::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_case_timeout_marks_error() {
        let slow = CaseDescriptor::new(
            "slow",
            step(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .with_timeout(Duration::from_secs(2));
        let plan = &plans_for(Suite::new("S").case(slow).case(ok_case("next")), None)[0];

        let started = tokio::time::Instant::now();
        let outcome = ExecutionGroupScheduler::new(1).run_suite(plan).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let slow = outcome.node.child("slow").unwrap();
        assert_eq!(slow.status_override, Some(Status::Error));
        assert!(slow.logs.iter().any(|l| l.message.contains("timeout")));
        assert_eq!(outcome.node.child("next").unwrap().status(), Status::Passed);
    }

    #[tokio::test]
    async fn test_setup_failure_skips_cases_and_runs_teardown() {
        let torn_down = Arc::new(Mutex::new(false));
        let flag = torn_down.clone();
        let suite = Suite::new("S")
            .case(ok_case("c1"))
            .with_setup(Hook::new(step(|_ctx| async { anyhow::bail!("no fixture") })))
            .with_teardown(Hook::new(step(move |_ctx| {
                let flag = flag.clone();
                async move {
                    *flag.lock().unwrap() = true;
                    Ok(())
                }
            })));
        let plan = &plans_for(suite, None)[0];
        let outcome = ExecutionGroupScheduler::new(1).run_suite(plan).await;

        assert_eq!(child_uids(&outcome.node), vec!["setup", "teardown"]);
        assert_eq!(outcome.node.status(), Status::Error);
        assert!(*torn_down.lock().unwrap());
    }

    #[tokio::test]
    async fn test_groups_run_in_succession() {
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let traced = |name: &str, group: &str| {
            let events = events.clone();
            let label = name.to_string();
            CaseDescriptor::new(
                name,
                step(move |_ctx| {
                    let events = events.clone();
                    let label = label.clone();
                    async move {
                        events.lock().unwrap().push(format!("start {label}"));
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        events.lock().unwrap().push(format!("end {label}"));
                        Ok(())
                    }
                }),
            )
            .in_group(group)
        };
        let suite = Suite::new("S")
            .case(traced("a1", "A"))
            .case(traced("b1", "B"))
            .case(traced("a2", "A"))
            .case(traced("b2", "B"))
            .case(traced("a3", "A"));
        let plan = &plans_for(suite, None)[0];
        assert_eq!(plan.groups.len(), 2);

        let outcome = ExecutionGroupScheduler::new(4).run_suite(plan).await;
        assert_eq!(child_uids(&outcome.node), vec!["a1", "b1", "a2", "b2", "a3"]);

        let events = events.lock().unwrap();
        let last_a_end = events.iter().rposition(|e| e.starts_with("end a")).unwrap();
        let first_b_start = events.iter().position(|e| e.starts_with("start b")).unwrap();
        assert!(last_a_end < first_b_start);
    }

    #[tokio::test]
    async fn test_parametrized_cases_grouped_under_template() {
        let sets = (0..4).map(|n| {
            let mut params = IndexMap::new();
            params.insert("n".to_string(), Value::from(n));
            params
        });
        let cases = CaseDescriptor::parametrized(
            "square",
            step(|ctx: CaseContext| async move {
                let n = ctx.param("n").and_then(Value::as_i64).unwrap_or_default();
                ctx.result.equal(n * n, n.pow(2), "square");
                Ok(())
            }),
            sets,
        );
        let suite = Suite::new("S").case(ok_case("first")).cases_from(cases);
        let plan = &plans_for(suite, None)[0];
        let outcome = ExecutionGroupScheduler::new(2).run_suite(plan).await;

        assert_eq!(child_uids(&outcome.node), vec!["first", "square"]);
        let group = outcome.node.child("square").unwrap();
        assert_eq!(group.category, Category::Parametrization);
        assert_eq!(group.entries().len(), 4);
        assert_eq!(group.status(), Status::Passed);
    }

    #[tokio::test]
    async fn test_xfail_and_skip() {
        let suite = Suite::new("S")
            .case(failing_case("known bug").xfail("tracked upstream", false))
            .case(ok_case("fixed bug").xfail("should fail", true))
            .case(CaseDescriptor::new(
                "unsupported",
                step(|ctx: CaseContext| async move {
                    ctx.result.skip("not on this platform");
                    Ok(())
                }),
            ));
        let plan = &plans_for(suite, None)[0];
        let outcome = ExecutionGroupScheduler::new(1).run_suite(plan).await;

        assert_eq!(outcome.node.child("known bug").unwrap().status(), Status::Xfail);
        assert_eq!(
            outcome.node.child("fixed bug").unwrap().status(),
            Status::XpassStrict
        );
        assert_eq!(outcome.node.child("unsupported").unwrap().status(), Status::Skipped);
    }

    #[test]
    fn test_discover_rejects_duplicate_cases() {
        let suite = Suite::new("S").case(ok_case("a")).case(ok_case("a"));
        let suites: Vec<Arc<dyn TestSuite>> = vec![Arc::new(suite)];
        assert!(discover(&suites, None).is_err());
    }

    #[test]
    fn test_skeleton_has_no_results() {
        let suite = Suite::new("S")
            .case(ok_case("a"))
            .with_teardown(Hook::new(step(|_ctx| async { Ok(()) })));
        let node = skeleton(&plans_for(suite, None)[0]);
        assert_eq!(child_uids(&node), vec!["a", "teardown"]);
        assert_eq!(node.status(), Status::Unknown);
    }

    proptest! {
        #[test]
        fn round_robin_covers_every_case_once(sizes in prop::collection::vec(0usize..6, 1..5), n in 1u32..5) {
            let suites: Vec<Arc<dyn TestSuite>> = sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| {
                    let suite = (0..size).fold(Suite::new(format!("suite {i}")), |s, c| {
                        s.case(ok_case(&format!("case {c}")))
                    });
                    Arc::new(suite) as Arc<dyn TestSuite>
                })
                .collect();
            let total: usize = sizes.iter().sum();

            let mut seen = Vec::new();
            for m in 0..n {
                let plans = discover(&suites, Some(Part::new(m, n).unwrap())).unwrap();
                for plan in plans {
                    for group in &plan.groups {
                        seen.extend(group.cases.iter().map(|c| c.ordinal));
                    }
                }
            }
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..total).collect::<Vec<_>>());
        }
    }
}
