//! Worker pool
//!
//! Assigns queued tasks to idle workers and drives executions to terminal
//! results: timeouts abort the execution, missing heartbeats mark the
//! worker lost, failing tasks are rerun while budget remains.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::queue::{QueuedTask, TaskQueue};
use super::worker::{Heartbeat, WorkerBackend, WorkerSlot, WorkerState, MIN_HEARTBEAT_INTERVAL};
use crate::error::{RunnerError, RunnerResult};
use crate::executor::panic_message;
use crate::models::{Task, TaskId, TaskResult, TaskStatus};
use crate::report::ReportNode;
use crate::testing::RunContext;

/// Pool settings
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub name: String,
    pub size: usize,
    pub heartbeat_interval: Duration,
    /// Heartbeats a worker may miss before it is considered lost
    pub heartbeat_miss_limit: u32,
    pub allow_task_rerun: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            size: 4,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_limit: 3,
            allow_task_rerun: true,
        }
    }
}

impl PoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// Intervals below [`MIN_HEARTBEAT_INTERVAL`] are raised to it
    pub fn with_heartbeat(mut self, interval: Duration, miss_limit: u32) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self.heartbeat_miss_limit = miss_limit.max(1);
        self
    }

    pub fn with_task_rerun(mut self, allow: bool) -> Self {
        self.allow_task_rerun = allow;
        self
    }

    /// Silence after which a worker is lost
    pub fn heartbeat_window(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_miss_limit
    }
}

struct Running {
    run_id: u64,
    entry: QueuedTask,
    handle: JoinHandle<()>,
    deadline: Option<Instant>,
}

/// Worker table and queue, guarded by one lock
pub(crate) struct PoolState {
    pub(crate) workers: Vec<WorkerSlot>,
    queue: TaskQueue,
    running: HashMap<usize, Running>,
    /// Task ids in scheduling order
    order: Vec<TaskId>,
    next_run: u64,
}

enum PoolEvent {
    Started {
        worker: usize,
        run_id: u64,
    },
    Finished {
        worker: usize,
        run_id: u64,
        outcome: anyhow::Result<ReportNode>,
    },
}

pub struct Pool {
    config: PoolConfig,
    backend: Arc<dyn WorkerBackend>,
    state: Arc<Mutex<PoolState>>,
    notify: Arc<Notify>,
}

impl Pool {
    pub fn new<B: WorkerBackend + 'static>(config: PoolConfig, backend: B) -> Self {
        let config = PoolConfig {
            heartbeat_interval: config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
            heartbeat_miss_limit: config.heartbeat_miss_limit.max(1),
            ..config
        };
        let workers = (0..config.size.max(1))
            .map(|i| WorkerSlot::new(format!("{}-worker-{}", config.name, i)))
            .collect();
        Self {
            config,
            backend: Arc::new(backend),
            state: Arc::new(Mutex::new(PoolState {
                workers,
                queue: TaskQueue::new(),
                running: HashMap::new(),
                order: Vec::new(),
                next_run: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Whether `id` is pending or running here
    pub async fn contains(&self, id: &TaskId) -> bool {
        let state = self.state.lock().await;
        state.queue.contains(id) || state.running.values().any(|r| &r.entry.task.id == id)
    }

    /// Enqueue a task, rejecting ids already pending or running here
    pub async fn add(&self, task: Task) -> RunnerResult<()> {
        let mut state = self.state.lock().await;
        let running = state.running.values().any(|r| r.entry.task.id == task.id);
        if running || state.queue.contains(&task.id) {
            return Err(RunnerError::DuplicateTask(task.id.to_string()));
        }
        debug!("Pool {}: queued {} (weight {})", self.config.name, task, task.weight);
        state.order.push(task.id.clone());
        state.queue.push(task);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn worker_states(&self) -> Vec<(String, WorkerState)> {
        let state = self.state.lock().await;
        state.workers.iter().map(|w| (w.id.clone(), w.state)).collect()
    }

    /// Run until every queued task is terminal. Results are returned in
    /// scheduling order and also streamed to `sink` as they complete.
    pub async fn run(
        &self,
        ctx: &RunContext,
        sink: Option<UnboundedSender<TaskResult>>,
    ) -> Vec<TaskResult> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut results: HashMap<TaskId, TaskResult> = HashMap::new();
        info!(
            "Pool {} starting with {} {} workers",
            self.config.name,
            self.config.size,
            self.backend.kind()
        );

        loop {
            let (finished, wake, done) = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let mut finished = self.reap(&mut state, now);
                finished.extend(self.fail_without_workers(&mut state));
                self.assign(&mut state, ctx, &tx);
                let done = state.running.is_empty() && state.queue.is_empty();
                let wake = state
                    .running
                    .values()
                    .filter_map(|r| r.deadline)
                    .fold(now + self.config.heartbeat_interval, Instant::min);
                (finished, wake, done)
            };

            for result in finished {
                self.publish(result, &mut results, sink.as_ref());
            }
            if done {
                break;
            }

            tokio::select! {
                Some(event) = rx.recv() => {
                    if let Some(result) = self.on_event(event).await {
                        self.publish(result, &mut results, sink.as_ref());
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
                _ = self.notify.notified() => {}
            }
        }

        let order = std::mem::take(&mut self.state.lock().await.order);
        info!("Pool {} finished {} tasks", self.config.name, results.len());
        order.iter().filter_map(|id| results.remove(id)).collect()
    }

    fn publish(
        &self,
        result: TaskResult,
        results: &mut HashMap<TaskId, TaskResult>,
        sink: Option<&UnboundedSender<TaskResult>>,
    ) {
        info!("Pool {}: {}", self.config.name, result);
        if let Some(sink) = sink {
            if sink.send(result.clone()).is_err() {
                debug!("Result sink of pool {} closed", self.config.name);
            }
        }
        results.insert(result.task.id.clone(), result);
    }

    fn assign(&self, state: &mut PoolState, ctx: &RunContext, tx: &UnboundedSender<PoolEvent>) {
        while !state.queue.is_empty() {
            let Some(worker) = state
                .workers
                .iter()
                .position(|w| w.state == WorkerState::Idle)
            else {
                break;
            };
            let Some(entry) = state.queue.pop() else {
                break;
            };

            let run_id = state.next_run;
            state.next_run += 1;
            let slot = &mut state.workers[worker];
            slot.transition(WorkerState::Assigned);
            slot.last_heartbeat = Instant::now();
            slot.current = Some(entry.task.id.clone());
            info!(
                "Pool {}: assigned {} to {} (attempt {})",
                self.config.name,
                entry.task,
                slot.id,
                entry.attempt + 1
            );

            let heartbeat = Heartbeat::new(worker, self.config.heartbeat_interval, self.state.clone());
            let handle = self.spawn(worker, run_id, entry.task.clone(), ctx.clone(), heartbeat, tx.clone());
            let deadline = entry.task.timeout.map(|t| Instant::now() + t);
            state.running.insert(
                worker,
                Running {
                    run_id,
                    entry,
                    handle,
                    deadline,
                },
            );
        }
    }

    fn spawn(
        &self,
        worker: usize,
        run_id: u64,
        task: Task,
        ctx: RunContext,
        heartbeat: Heartbeat,
        tx: UnboundedSender<PoolEvent>,
    ) -> JoinHandle<()> {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            let _ = tx.send(PoolEvent::Started { worker, run_id });
            let outcome = AssertUnwindSafe(backend.execute(&task, &ctx, heartbeat))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("execution panicked: {}", panic_message(payload)))
                });
            let _ = tx.send(PoolEvent::Finished {
                worker,
                run_id,
                outcome,
            });
        })
    }

    async fn on_event(&self, event: PoolEvent) -> Option<TaskResult> {
        let mut state = self.state.lock().await;
        match event {
            PoolEvent::Started { worker, run_id } => {
                let current = state.running.get(&worker).map(|r| r.run_id);
                if current == Some(run_id) {
                    let slot = &mut state.workers[worker];
                    if slot.state == WorkerState::Assigned {
                        slot.transition(WorkerState::Busy);
                    }
                }
                None
            }
            PoolEvent::Finished {
                worker,
                run_id,
                outcome,
            } => {
                if state.running.get(&worker).map(|r| r.run_id) != Some(run_id) {
                    debug!("Ignoring stale result from {}", state.workers[worker].id);
                    return None;
                }
                let running = state.running.remove(&worker)?;
                let slot = &mut state.workers[worker];
                slot.executed += 1;
                slot.current = None;
                if slot.state.is_live() {
                    slot.transition(WorkerState::Idle);
                }
                let worker_id = slot.id.clone();

                let task = running.entry.task.clone();
                let result = match outcome {
                    Ok(report) => TaskResult::done(task, report),
                    Err(e) => {
                        error!("Task {} failed on {}: {:#}", task, worker_id, e);
                        let reason = RunnerError::Crash {
                            context: task.to_string(),
                            message: format!("{e:#}"),
                        };
                        TaskResult::failed(task, TaskStatus::Error, reason.to_string())
                    }
                };
                self.conclude(&mut state, running.entry, result, worker_id)
            }
        }
    }

    /// Abort executions past their deadline or whose worker went silent
    fn reap(&self, state: &mut PoolState, now: Instant) -> Vec<TaskResult> {
        let window = self.config.heartbeat_window();
        let mut expired: Vec<(usize, TaskStatus)> = Vec::new();
        for (&worker, running) in &state.running {
            if running.deadline.is_some_and(|d| d <= now) {
                expired.push((worker, TaskStatus::Timeout));
            } else if state.workers[worker].missed(now, window) {
                expired.push((worker, TaskStatus::Lost));
            }
        }
        expired.sort_by_key(|(worker, _)| *worker);

        let mut finished = Vec::new();
        for (worker, status) in expired {
            let Some(running) = state.running.remove(&worker) else {
                continue;
            };
            running.handle.abort();
            let slot = &mut state.workers[worker];
            slot.current = None;
            let worker_id = slot.id.clone();
            let task = running.entry.task.clone();

            let reason = if status == TaskStatus::Timeout {
                slot.transition(WorkerState::Idle);
                let limit = task.timeout.unwrap_or_default();
                RunnerError::timeout(format!("task {task}"), limit)
            } else {
                slot.transition(WorkerState::Lost);
                RunnerError::Lost {
                    worker: worker_id.clone(),
                    missed: self.config.heartbeat_miss_limit,
                }
            };
            warn!("Pool {}: {}", self.config.name, reason);

            let result = TaskResult::failed(task, status, reason.to_string());
            if let Some(result) = self.conclude(state, running.entry, result, worker_id) {
                finished.push(result);
            }
        }
        finished
    }

    /// With every worker lost, pending tasks can never run
    fn fail_without_workers(&self, state: &mut PoolState) -> Vec<TaskResult> {
        if state.queue.is_empty() || state.workers.iter().any(|w| w.state.is_live()) {
            return Vec::new();
        }
        error!("Pool {} has no live workers left", self.config.name);
        state
            .queue
            .drain()
            .into_iter()
            .map(|entry| {
                let mut result =
                    TaskResult::failed(entry.task, TaskStatus::Error, "no live workers");
                result.attempts = entry.attempt + 1;
                result.previous_attempts = entry.previous;
                result
            })
            .collect()
    }

    /// Requeue a non-passing result while rerun budget remains
    fn conclude(
        &self,
        state: &mut PoolState,
        mut entry: QueuedTask,
        mut result: TaskResult,
        worker: String,
    ) -> Option<TaskResult> {
        result.attempts = entry.attempt + 1;
        result.worker = Some(worker);

        if !result.passed() && self.config.allow_task_rerun && entry.attempt < entry.task.rerun {
            warn!(
                "Task {} did not pass on attempt {}, rerunning ({} left)",
                entry.task,
                entry.attempt + 1,
                entry.task.rerun - entry.attempt
            );
            entry.previous.push(result.report);
            entry.attempt += 1;
            state.queue.requeue(entry);
            return None;
        }

        result.previous_attempts = entry.previous;
        Some(result)
    }
}
