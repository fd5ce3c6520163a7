//! Data models for task scheduling
//!
//! Tasks handed to pools and the results they produce.

mod task;

pub use task::{Task, TaskId, TaskResult, TaskStatus, MAX_RERUN_LIMIT};
