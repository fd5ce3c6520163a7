//! Utility helpers
//!
//! Logging setup and report timers.

pub mod logger;
mod timer;

pub use logger::{init_logger, LogLevel};
pub use timer::{Interval, Timer};
