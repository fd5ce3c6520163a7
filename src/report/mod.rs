//! Report tree model
//!
//! Hierarchical, mergeable test reports with status precedence and tag indices.

mod filter;
mod merge;
mod node;
mod status;
mod tags;

pub use merge::{MergeEngine, MergeError};
pub use node::{
    Assertion, Category, Counter, LogRecord, Part, Phase, Position, ReportNode, Severity,
};
pub use status::{RuntimeStatus, Status, StatusCategory};
pub use tags::{Tags, SIMPLE_TAG};
