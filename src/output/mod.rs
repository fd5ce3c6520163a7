//! Output formatting module
//!
//! Renders report trees as tables, JSON, CSV or one-line summaries.

mod formatter;

pub use formatter::{load_report, save_report, OutputFormat, ResultFormatter};
