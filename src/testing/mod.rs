//! Test definitions
//!
//! Suites, testcases, environments and the `Test` contract the pools run.

mod environment;
mod multitest;
mod result;
mod suite;
mod target;

pub use environment::{
    Driver, DriverRpc, Environment, EnvironmentHooks, RemoteDriver, Started, ENVIRONMENT_START,
    ENVIRONMENT_STOP, ERROR_HANDLER,
};
pub use multitest::{MultiTest, MultiTestConfig};
pub use result::CaseResult;
pub use suite::{
    step, CaseContext, CaseDescriptor, ExecutionGroup, Hook, StepFn, Suite, TestSuite, Xfail,
};
pub use target::{RunContext, RunSettings, TargetFactory, TargetRegistry, Test};

pub(crate) use environment::run_hook;
