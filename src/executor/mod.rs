//! Test execution engine
//!
//! Guarded phase execution and the execution group scheduler that runs a
//! suite's testcases sequentially or in bounded parallel groups.

mod groups;
mod phase;

pub use groups::{
    discover, skeleton, DiscoveredCase, ExecutionGroupScheduler, GroupPlan, SchedulerState,
    StopOnError, SuiteOutcome, SuitePlan,
};
pub use phase::{panic_message, run_phase, PhaseOutcome};
