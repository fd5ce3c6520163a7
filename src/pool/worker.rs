//! Workers
//!
//! Worker slots tracked by a pool, the liveness signal executions emit and
//! the backend contract plus its in-process implementation.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::dispatch::PoolState;
use crate::models::{Task, TaskId};
use crate::report::ReportNode;
use crate::testing::RunContext;

/// Lifecycle of a worker slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Idle,
    Assigned,
    Busy,
    /// Missed too many heartbeats, never reused
    Lost,
}

impl WorkerState {
    pub fn is_live(&self) -> bool {
        !matches!(self, WorkerState::Lost)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            WorkerState::Idle => "○",
            WorkerState::Assigned => "◐",
            WorkerState::Busy => "●",
            WorkerState::Lost => "✗",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Assigned => write!(f, "assigned"),
            WorkerState::Busy => write!(f, "busy"),
            WorkerState::Lost => write!(f, "lost"),
        }
    }
}

/// A worker as seen by its pool
#[derive(Clone, Debug)]
pub struct WorkerSlot {
    pub id: String,
    pub state: WorkerState,
    pub last_heartbeat: Instant,
    pub current: Option<TaskId>,
    /// Executions finished by this worker
    pub executed: usize,
}

impl WorkerSlot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: WorkerState::Idle,
            last_heartbeat: Instant::now(),
            current: None,
            executed: 0,
        }
    }

    pub fn transition(&mut self, next: WorkerState) {
        trace!("Worker {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    /// Time since the last heartbeat exceeds `window`
    pub fn missed(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > window
    }
}

/// Shortest heartbeat interval a pool accepts
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Liveness signal handed to an execution
#[derive(Clone)]
pub struct Heartbeat {
    worker: usize,
    interval: Duration,
    state: Option<Arc<Mutex<PoolState>>>,
}

impl Heartbeat {
    pub(crate) fn new(worker: usize, interval: Duration, state: Arc<Mutex<PoolState>>) -> Self {
        Self {
            worker,
            interval: interval.max(MIN_HEARTBEAT_INTERVAL),
            state: Some(state),
        }
    }

    /// Heartbeat not attached to any pool
    pub fn detached(interval: Duration) -> Self {
        Self {
            worker: 0,
            interval: interval.max(MIN_HEARTBEAT_INTERVAL),
            state: None,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// How often the execution is expected to beat
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn beat(&self) {
        let Some(state) = &self.state else {
            return;
        };
        let mut state = state.lock().await;
        if let Some(slot) = state.workers.get_mut(self.worker) {
            if slot.state.is_live() {
                slot.last_heartbeat = Instant::now();
            }
        }
    }
}

/// Executes tasks on behalf of a worker
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Run `task` to a report, beating `heartbeat` while alive
    async fn execute(
        &self,
        task: &Task,
        ctx: &RunContext,
        heartbeat: Heartbeat,
    ) -> anyhow::Result<ReportNode>;
}

/// Runs targets on the pool's own runtime
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadBackend;

#[async_trait]
impl WorkerBackend for ThreadBackend {
    fn kind(&self) -> &'static str {
        "thread"
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &RunContext,
        heartbeat: Heartbeat,
    ) -> anyhow::Result<ReportNode> {
        let mut test = ctx.registry.build(&task.target)?;
        test.set_part(task.part);

        let run = test.run(ctx);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(heartbeat.interval());
        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => heartbeat.beat().await,
            }
        }
    }
}
