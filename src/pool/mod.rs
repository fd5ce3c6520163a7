//! Worker pools
//!
//! Task queueing, worker liveness, timeouts and reruns, plus the thread,
//! process and remote worker backends.

mod dispatch;
mod process;
mod queue;
mod remote;
mod worker;

pub use dispatch::{Pool, PoolConfig};
pub use process::{
    child_args, read_child_output, run_child, ChildMessage, ChildOutput, ProcessBackend,
};
pub use queue::{QueuedTask, TaskQueue};
pub use remote::{RemoteBackend, RemoteHost};
pub use worker::{
    Heartbeat, ThreadBackend, WorkerBackend, WorkerSlot, WorkerState, MIN_HEARTBEAT_INTERVAL,
};
