//! Off-thread task execution, one execution context per category.
//!
//! Each category owns a worker thread fed through a bounded channel of depth
//! one (the execution slot) and a priority queue of pending tasks. A category
//! runs at most one task at a time; pending tasks are dispatched strictly by
//! priority, FIFO among equal priorities.
//!
//! A panic inside [`TaskExecutor::execute`] is a context fault: the in-flight
//! task fails with [`TaskError::ContextFault`], the worker exits and a fresh one
//! is spawned after an exponential backoff. Queued tasks survive the restart.
//! After [`RunnerConfig::max_consecutive_faults`] faults in a row the queue is
//! failed with [`TaskError::ContextUnavailable`] and the category starts over
//! on the next submission.

use crate::colorize::{BlockColorResult, BlockColorizer, ColorSettings};
use crate::grid::BlockGeometry;
use crate::image::{Dimensions, RasterImage};
use crate::integral::IntegralTables;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::mpsc::{
    self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Category under which integral images are built.
pub const INTEGRAL_IMAGE_CATEGORY: &str = "integral-image";

/// Identifier assigned to every submitted task.
pub type TaskId = u64;

/// Dispatch priority; higher runs first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    /// Background work.
    Low,
    /// Regular work.
    #[default]
    Normal,
    /// Work the caller is blocked on.
    High,
}

/// Work item sent to an execution context.
#[derive(Clone, Debug)]
pub enum Task {
    /// Build the integral tables of a raster.
    BuildIntegral {
        /// Processing-resolution raster.
        raster: Arc<RasterImage>,
    },
    /// Integral-average color and coverage for a batch of display-space blocks.
    ColorBlocks {
        /// Tables of the processed image.
        tables: Arc<IntegralTables>,
        /// Blocks to resolve.
        blocks: Vec<BlockGeometry>,
        /// Display size the blocks are expressed in.
        display: Dimensions,
        /// Coverage and opacity thresholds.
        settings: ColorSettings,
    },
}

impl Task {
    /// Discriminant of the task.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::BuildIntegral { .. } => TaskKind::BuildIntegral,
            Task::ColorBlocks { .. } => TaskKind::ColorBlocks,
        }
    }
}

/// Task type tag, used to check executor support before queueing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskKind {
    /// [`Task::BuildIntegral`].
    BuildIntegral,
    /// [`Task::ColorBlocks`].
    ColorBlocks,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::BuildIntegral => f.write_str("build-integral"),
            TaskKind::ColorBlocks => f.write_str("color-blocks"),
        }
    }
}

/// Result payload of a successful task.
#[derive(Clone, Debug)]
pub enum TaskOutput {
    /// Output of [`Task::BuildIntegral`].
    Integral(Arc<IntegralTables>),
    /// Output of [`Task::ColorBlocks`], in input order.
    BlockColors(Vec<BlockColorResult>),
}

impl TaskOutput {
    /// The tables, if this is an integral result.
    #[must_use]
    pub fn into_integral(self) -> Option<Arc<IntegralTables>> {
        match self {
            TaskOutput::Integral(tables) => Some(tables),
            TaskOutput::BlockColors(_) => None,
        }
    }

    /// The block colors, if this is a batch coloring result.
    #[must_use]
    pub fn into_block_colors(self) -> Option<Vec<BlockColorResult>> {
        match self {
            TaskOutput::BlockColors(colors) => Some(colors),
            TaskOutput::Integral(_) => None,
        }
    }
}

/// Failures reported by the runner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Nothing is registered under the category.
    #[error("no executor registered for category `{0}`")]
    UnknownCategory(String),
    /// The category's executor does not handle this task type.
    #[error("category `{category}` cannot run {kind} tasks")]
    UnsupportedTask {
        /// Target category.
        category: String,
        /// Rejected task type.
        kind: TaskKind,
    },
    /// The task itself failed; the context is healthy.
    #[error("task failed: {0}")]
    Execution(String),
    /// The execution context crashed while running the task.
    #[error("execution context faulted: {0}")]
    ContextFault(String),
    /// The task was pulled from the queue before dispatch.
    #[error("task cancelled before dispatch")]
    Cancelled,
    /// The category gave up after repeated faults.
    #[error("execution context for `{0}` is unavailable after repeated faults")]
    ContextUnavailable(String),
    /// The runner was shut down.
    #[error("task runner is shut down")]
    Shutdown,
}

/// Code that runs inside an execution context.
pub trait TaskExecutor: Send + Sync {
    /// Whether `kind` can be executed; unsupported tasks are rejected at submission.
    fn supports(&self, kind: TaskKind) -> bool;

    /// Run one task.
    ///
    /// # Errors
    /// Task-level failures; the context stays up. Panics are treated as context faults.
    fn execute(&self, task: Task) -> Result<TaskOutput, TaskError>;
}

/// Executor for integral image builds and batched block coloring.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntegralImageExecutor;

impl TaskExecutor for IntegralImageExecutor {
    fn supports(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::BuildIntegral | TaskKind::ColorBlocks => true,
        }
    }

    fn execute(&self, task: Task) -> Result<TaskOutput, TaskError> {
        match task {
            Task::BuildIntegral { raster } => {
                Ok(TaskOutput::Integral(Arc::new(IntegralTables::build(&raster))))
            }
            Task::ColorBlocks {
                tables,
                blocks,
                display,
                settings,
            } => {
                let colorizer = BlockColorizer::new(&tables, display, settings);
                Ok(TaskOutput::BlockColors(colorizer.color_batch(&blocks)))
            }
        }
    }
}

/// Restart policy for faulting execution contexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Delay before the first restart.
    pub restart_delay: Duration,
    /// Upper bound on the doubling restart delay.
    pub max_restart_delay: Duration,
    /// Faults in a row after which queued tasks are failed.
    pub max_consecutive_faults: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(100),
            max_restart_delay: Duration::from_secs(2),
            max_consecutive_faults: 5,
        }
    }
}

impl RunnerConfig {
    /// Delay before restarting after the `fault`-th consecutive fault (1-based).
    #[must_use]
    pub fn backoff(&self, fault: u32) -> Duration {
        let doublings = fault.saturating_sub(1).min(16);
        self.restart_delay
            .saturating_mul(1 << doublings)
            .min(self.max_restart_delay)
    }
}

type Reply = Sender<Result<TaskOutput, TaskError>>;

struct Pending {
    id: TaskId,
    priority: Priority,
    task: Task,
    reply: Reply,
}

impl Pending {
    fn fail(self, err: TaskError) {
        let _ = self.reply.send(Err(err));
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Max-heap: higher priority first, then the older (smaller) id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Category {
    executor: Arc<dyn TaskExecutor>,
    queue: BinaryHeap<Pending>,
    slot: Option<SyncSender<Pending>>,
    current: Option<TaskId>,
    restarting: bool,
    generation: u64,
    consecutive_faults: u32,
    restarts: u64,
    completed: u64,
}

impl Category {
    fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            queue: BinaryHeap::new(),
            slot: None,
            current: None,
            restarting: false,
            generation: 0,
            consecutive_faults: 0,
            restarts: 0,
            completed: 0,
        }
    }

    fn fail_queue(&mut self, err: impl Fn() -> TaskError) {
        for pending in std::mem::take(&mut self.queue) {
            pending.fail(err());
        }
    }
}

struct Shared {
    config: RunnerConfig,
    categories: Mutex<HashMap<String, Category>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

/// Per-category snapshot for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryStats {
    /// Category name.
    pub name: String,
    /// A task occupies the execution slot.
    pub busy: bool,
    /// Tasks waiting for dispatch.
    pub queue_length: usize,
    /// Id of the task in the slot.
    pub current_task: Option<TaskId>,
    /// The context is being (re)started.
    pub restarting: bool,
    /// Context restarts after faults.
    pub restarts: u64,
    /// Faults since the last success.
    pub consecutive_faults: u32,
    /// Tasks finished by the context, successfully or with a task-level error.
    pub completed: u64,
}

/// Snapshot of every registered category, sorted by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// One entry per category.
    pub categories: Vec<CategoryStats>,
}

impl RunnerStats {
    /// Stats of one category.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<&CategoryStats> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Queued tasks across all categories.
    #[must_use]
    pub fn total_queued(&self) -> usize {
        self.categories.iter().map(|c| c.queue_length).sum()
    }
}

/// Receiving end of a submitted task.
///
/// The result is delivered once; dropping the handle abandons it without
/// affecting the task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    receiver: Receiver<Result<TaskOutput, TaskError>>,
}

impl TaskHandle {
    /// Id to pass to [`TaskRunner::cancel`].
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the task settles.
    ///
    /// # Errors
    /// The task's [`TaskError`], or [`TaskError::Shutdown`] if the runner went away.
    pub fn wait(self) -> Result<TaskOutput, TaskError> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(TaskError::Shutdown))
    }

    /// Block for at most `timeout`; `None` when the task has not settled yet.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<TaskOutput, TaskError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Shutdown)),
        }
    }

    /// Non-blocking poll.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<TaskOutput, TaskError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Shutdown)),
        }
    }
}

/// Category-based task scheduler with one worker thread per category.
pub struct TaskRunner {
    shared: Arc<Shared>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskRunner {
    /// Create a runner with no categories.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                categories: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Restart policy in effect.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.shared.config
    }

    /// Register `executor` for `category`.
    ///
    /// Re-registering replaces the executor for contexts started afterwards.
    /// The context itself is started lazily by the first submission.
    pub fn register(&self, category: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let mut categories = self.shared.categories.lock();
        match categories.entry(category.into()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().executor = executor;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Category::new(executor));
            }
        }
    }

    /// True when an executor is registered for `category`.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.shared.categories.lock().contains_key(category)
    }

    /// Queue `task` and dispatch it if the category is idle.
    ///
    /// # Errors
    /// [`TaskError::UnknownCategory`], [`TaskError::UnsupportedTask`] or
    /// [`TaskError::Shutdown`]; nothing is queued in that case.
    pub fn submit(
        &self,
        category: &str,
        task: Task,
        priority: Priority,
    ) -> Result<TaskHandle, TaskError> {
        let mut handles = self.submit_batch(category, vec![(task, priority)])?;
        handles.pop().ok_or(TaskError::Shutdown)
    }

    /// Queue several tasks atomically, then dispatch.
    ///
    /// Tasks submitted together to an idle category run in priority order.
    /// Either every task is queued or none is.
    ///
    /// # Errors
    /// Same as [`submit`](Self::submit).
    pub fn submit_batch(
        &self,
        category: &str,
        tasks: Vec<(Task, Priority)>,
    ) -> Result<Vec<TaskHandle>, TaskError> {
        if self.shared.shutdown.load(AtomicOrdering::SeqCst) {
            return Err(TaskError::Shutdown);
        }
        let mut categories = self.shared.categories.lock();
        let cat = categories
            .get_mut(category)
            .ok_or_else(|| TaskError::UnknownCategory(category.to_owned()))?;
        if let Some(kind) = tasks
            .iter()
            .map(|(task, _)| task.kind())
            .find(|&kind| !cat.executor.supports(kind))
        {
            return Err(TaskError::UnsupportedTask {
                category: category.to_owned(),
                kind,
            });
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for (task, priority) in tasks {
            let id = self.shared.next_id.fetch_add(1, AtomicOrdering::Relaxed);
            let (reply, receiver) = mpsc::channel();
            tracing::trace!(category, task = id, kind = %task.kind(), ?priority, "queued task");
            cat.queue.push(Pending {
                id,
                priority,
                task,
                reply,
            });
            handles.push(TaskHandle { id, receiver });
        }
        dispatch(&self.shared, category, cat);
        Ok(handles)
    }

    /// Pull a queued task and fail it with [`TaskError::Cancelled`].
    ///
    /// Returns `false` when the task is unknown, already dispatched or finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut categories = self.shared.categories.lock();
        for cat in categories.values_mut() {
            if let Some(pending) = take_pending(&mut cat.queue, id) {
                pending.fail(TaskError::Cancelled);
                return true;
            }
        }
        false
    }

    /// Diagnostic snapshot of every category.
    #[must_use]
    pub fn stats(&self) -> RunnerStats {
        let categories = self.shared.categories.lock();
        let mut stats: Vec<CategoryStats> = categories
            .iter()
            .map(|(name, cat)| CategoryStats {
                name: name.clone(),
                busy: cat.current.is_some(),
                queue_length: cat.queue.len(),
                current_task: cat.current,
                restarting: cat.restarting,
                restarts: cat.restarts,
                consecutive_faults: cat.consecutive_faults,
                completed: cat.completed,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        RunnerStats { categories: stats }
    }

    /// Fail every queued task with [`TaskError::Shutdown`] and stop the workers.
    ///
    /// Tasks already in a slot run to completion. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let mut categories = self.shared.categories.lock();
        for cat in categories.values_mut() {
            cat.fail_queue(|| TaskError::Shutdown);
            cat.slot = None;
            cat.generation += 1;
        }
        tracing::debug!(categories = categories.len(), "task runner shut down");
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_pending(queue: &mut BinaryHeap<Pending>, id: TaskId) -> Option<Pending> {
    let mut items = std::mem::take(queue).into_vec();
    let found = items
        .iter()
        .position(|p| p.id == id)
        .map(|i| items.swap_remove(i));
    *queue = BinaryHeap::from(items);
    found
}

/// Move the highest-priority pending task into the slot if the context is idle.
fn dispatch(shared: &Arc<Shared>, name: &str, cat: &mut Category) {
    if cat.current.is_some() || cat.restarting || cat.queue.is_empty() {
        return;
    }
    let Some(slot) = cat.slot.clone() else {
        start_context(shared, name, cat, Duration::ZERO);
        return;
    };
    let Some(next) = cat.queue.pop() else {
        return;
    };
    let id = next.id;
    match slot.try_send(next) {
        Ok(()) => {
            cat.current = Some(id);
            tracing::trace!(category = name, task = id, "dispatched task");
        }
        Err(TrySendError::Full(next)) => cat.queue.push(next),
        Err(TrySendError::Disconnected(next)) => {
            cat.queue.push(next);
            tracing::warn!(category = name, "execution context channel closed");
            handle_fault(shared, name, cat);
        }
    }
}

/// Spawn a worker that waits `delay`, then reports ready.
fn start_context(shared: &Arc<Shared>, name: &str, cat: &mut Category, delay: Duration) {
    cat.generation += 1;
    cat.restarting = true;
    cat.current = None;

    let (slot, inbox) = mpsc::sync_channel(1);
    let worker = Worker {
        shared: Arc::clone(shared),
        category: name.to_owned(),
        generation: cat.generation,
        executor: Arc::clone(&cat.executor),
        inbox,
    };
    match thread::Builder::new()
        .name(format!("mosaic-{name}"))
        .spawn(move || worker.run(delay))
    {
        Ok(_) => cat.slot = Some(slot),
        Err(err) => {
            tracing::error!(category = name, error = %err, "failed to spawn execution context");
            cat.slot = None;
            cat.restarting = false;
            cat.fail_queue(|| TaskError::ContextUnavailable(name.to_owned()));
        }
    }
}

fn handle_fault(shared: &Arc<Shared>, name: &str, cat: &mut Category) {
    cat.slot = None;
    cat.current = None;
    cat.consecutive_faults += 1;
    cat.restarts += 1;

    if cat.consecutive_faults >= shared.config.max_consecutive_faults.max(1) {
        tracing::error!(
            category = name,
            faults = cat.consecutive_faults,
            queued = cat.queue.len(),
            "giving up on execution context"
        );
        cat.fail_queue(|| TaskError::ContextUnavailable(name.to_owned()));
        cat.consecutive_faults = 0;
        cat.restarting = false;
        cat.generation += 1;
        return;
    }

    let delay = shared.config.backoff(cat.consecutive_faults);
    tracing::warn!(
        category = name,
        attempt = cat.consecutive_faults,
        delay_ms = delay.as_millis() as u64,
        "restarting execution context"
    );
    start_context(shared, name, cat, delay);
}

enum Report {
    Ready,
    Completed,
    Faulted,
}

struct Worker {
    shared: Arc<Shared>,
    category: String,
    generation: u64,
    executor: Arc<dyn TaskExecutor>,
    inbox: Receiver<Pending>,
}

impl Worker {
    fn run(self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.report(Report::Ready);

        while let Ok(Pending { id, task, reply, .. }) = self.inbox.recv() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.executor.execute(task)));
            match outcome {
                Ok(result) => {
                    if let Err(err) = &result {
                        tracing::debug!(
                            category = %self.category,
                            task = id,
                            error = %err,
                            "task failed"
                        );
                    }
                    self.report(Report::Completed);
                    let _ = reply.send(result);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::warn!(
                        category = %self.category,
                        task = id,
                        %message,
                        "execution context faulted"
                    );
                    self.report(Report::Faulted);
                    let _ = reply.send(Err(TaskError::ContextFault(message)));
                    return;
                }
            }
        }
    }

    fn report(&self, event: Report) {
        let shared = &self.shared;
        let mut categories = shared.categories.lock();
        let Some(cat) = categories.get_mut(&self.category) else {
            return;
        };
        if cat.generation != self.generation || shared.shutdown.load(AtomicOrdering::SeqCst) {
            return;
        }
        match event {
            Report::Ready => cat.restarting = false,
            Report::Completed => {
                cat.current = None;
                cat.consecutive_faults = 0;
                cat.completed += 1;
            }
            Report::Faulted => {
                handle_fault(shared, &self.category, cat);
                return;
            }
        }
        dispatch(shared, &self.category, cat);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "execution context panicked".to_owned()
    }
}
