//! Plan coordination
//!
//! Part bookkeeping and reassembly, and the test plan that ties pools and
//! coordinator together.

mod parts;
mod plan;

pub use parts::PartCoordinator;
pub use plan::{TestPlan, DEFAULT_POOL};
