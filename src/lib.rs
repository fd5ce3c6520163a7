//! Plan Runner
//!
//! A concurrent test plan scheduler. Tests are materialised from named
//! targets, optionally split into parts, dispatched to worker pools backed
//! by threads, child processes or remote hosts, and their report trees are
//! merged back into one plan report.
//!
//! ## Layout
//!
//! - [`report`]: mergeable report trees with status precedence and tags
//! - [`testing`]: multitests, suites, testcases and environments
//! - [`executor`]: case discovery, part selection and execution groups
//! - [`pool`]: worker pools, heartbeats and backends
//! - [`coordinator`]: test plans and part merging

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod demo;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod pool;
pub mod report;
pub mod testing;
pub mod utils;
