//! Background task scheduling.
//!
//! Every submitted task gets a coordinator thread and a worker thread. The
//! coordinator waits for the worker (and its optional deadline), then removes
//! the task from the running collections and records it in the history.
//!
//! Cancellation is cooperative: it trips the task's [`CancellationToken`],
//! runs the registered cancel hooks (which is where subprocesses get
//! destroyed) and leaves it to the work closure to notice. A worker blocked in
//! uninterruptible I/O keeps running until that I/O returns.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::events::{Event, EventBus};

/// Finished tasks kept for diagnostics.
const DEFAULT_HISTORY_LIMIT: usize = 256;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down; task '{0}' was not submitted")]
    ShutDown(String),
    #[error("failed to spawn coordinator for task '{label}': {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Submitted,
    Running,
    Completed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
}

/// Shared cancellation flag with one-shot hooks.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Trip the token and run its hooks. Returns false if it was already tripped.
    pub fn cancel(&self) -> bool {
        if !self.trip() {
            return false;
        }
        self.fire();
        true
    }

    /// Run `hook` once when the token is cancelled (immediately if it already is).
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = self.lock_hooks();
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }

    fn trip(&self) -> bool {
        !self.inner.cancelled.swap(true, Ordering::SeqCst)
    }

    fn fire(&self) {
        let hooks = std::mem::take(&mut *self.lock_hooks());
        for hook in hooks {
            hook();
        }
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Vec<Hook>> {
        self.inner.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

type Work = Box<dyn FnOnce(&CancellationToken) -> anyhow::Result<()> + Send>;

/// A named unit of work waiting to be submitted.
pub struct BackgroundTask {
    label: String,
    visible: bool,
    work: Work,
    on_cancel: Option<Hook>,
    deadline: Option<Duration>,
}

impl fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("label", &self.label)
            .field("visible", &self.visible)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl BackgroundTask {
    /// A visible task running `work`.
    pub fn new<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<()> + Send + 'static,
    {
        Self { label: label.into(), visible: true, work: Box::new(work), on_cancel: None, deadline: None }
    }

    /// Keep the task out of the visible collection (bookkeeping work).
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    /// Cancel the task if it is still running after `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Task state plus what the worker saw when its work returned.
struct Progress {
    state: TaskState,
    /// The work closure has returned or unwound.
    work_done: bool,
    /// The token was tripped before the work returned.
    cancelled_in_flight: bool,
}

struct TaskShared {
    id: TaskId,
    label: String,
    visible: bool,
    token: CancellationToken,
    progress: Mutex<Progress>,
    changed: Condvar,
}

impl TaskShared {
    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: TaskState) {
        self.lock_progress().state = state;
        self.changed.notify_all();
    }

    /// Called by the worker as soon as the work closure is over. Later
    /// cancels are no-ops.
    fn mark_work_done(&self) {
        let mut progress = self.lock_progress();
        progress.work_done = true;
        progress.cancelled_in_flight = self.token.is_cancelled();
    }
}

/// Execution ticket returned by [`Scheduler::submit`].
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn is_visible(&self) -> bool {
        self.shared.visible
    }

    pub fn state(&self) -> TaskState {
        self.shared.lock_progress().state
    }

    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Request cancellation.
    ///
    /// Only the first call while the work is still running has an effect: it
    /// trips the token and runs the cancel hooks. Returns whether this call
    /// did so.
    pub fn cancel(&self) -> bool {
        let tripped = {
            let progress = self.shared.lock_progress();
            if progress.work_done || progress.state.is_terminal() {
                false
            } else {
                self.shared.token.trip()
            }
        };
        if tripped {
            tracing::info!(task = %self.shared.label, id = %self.shared.id, "cancelling task");
            self.shared.token.fire();
        }
        tripped
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) -> TaskState {
        let mut progress = self.shared.lock_progress();
        while !progress.state.is_terminal() {
            progress = self.shared.changed.wait(progress).unwrap_or_else(|e| e.into_inner());
        }
        progress.state
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning the current state.
    pub fn wait_timeout(&self, timeout: Duration) -> TaskState {
        let progress = self.shared.lock_progress();
        let (progress, _) = self
            .shared
            .changed
            .wait_timeout_while(progress, timeout, |p| !p.state.is_terminal())
            .unwrap_or_else(|e| e.into_inner());
        progress.state
    }
}

/// Failure routed to the scheduler's error sink.
#[derive(Debug)]
pub enum TaskFailure {
    Error { task: TaskId, label: String, error: anyhow::Error },
    Panic { task: TaskId, label: String, message: String },
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error { label, error, .. } => write!(f, "task '{label}' failed: {error:#}"),
            TaskFailure::Panic { label, message, .. } => write!(f, "task '{label}' panicked: {message}"),
        }
    }
}

pub type ErrorSink = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// Diagnostic record of a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub label: String,
    pub visible: bool,
    pub state: TaskState,
    pub started_at: String,
    pub finished_at: String,
}

struct SchedulerInner {
    next_id: AtomicU64,
    accepting: AtomicBool,
    running: Mutex<Vec<TaskHandle>>,
    visible: Mutex<Vec<TaskHandle>>,
    history: Mutex<VecDeque<TaskRecord>>,
    history_limit: usize,
    sink: ErrorSink,
    events: Option<Arc<EventBus>>,
}

/// Runs [`BackgroundTask`]s off the caller's thread, one worker per task.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.running_count())
            .field("accepting", &self.inner.accepting.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler whose error sink logs through `tracing`.
    pub fn new() -> Self {
        Self::build(log_sink(), None)
    }

    pub fn with_sink(sink: ErrorSink) -> Self {
        Self::build(sink, None)
    }

    /// Scheduler that publishes task start and finish events to `events`.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self::build(log_sink(), Some(events))
    }

    fn build(sink: ErrorSink, events: Option<Arc<EventBus>>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                next_id: AtomicU64::new(1),
                accepting: AtomicBool::new(true),
                running: Mutex::new(Vec::new()),
                visible: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                history_limit: DEFAULT_HISTORY_LIMIT,
                sink,
                events,
            }),
        }
    }

    pub fn submit(&self, task: BackgroundTask) -> Result<TaskHandle, SchedulerError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown(task.label));
        }
        let BackgroundTask { label, visible, work, on_cancel, deadline } = task;

        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let token = CancellationToken::new();
        if let Some(hook) = on_cancel {
            token.on_cancel(hook);
        }
        let handle = TaskHandle {
            shared: Arc::new(TaskShared {
                id,
                label: label.clone(),
                visible,
                token,
                progress: Mutex::new(Progress {
                    state: TaskState::Created,
                    work_done: false,
                    cancelled_in_flight: false,
                }),
                changed: Condvar::new(),
            }),
        };

        lock(&self.inner.running).push(handle.clone());
        if visible {
            lock(&self.inner.visible).push(handle.clone());
        }
        handle.shared.set_state(TaskState::Submitted);
        tracing::debug!(task = %label, %id, visible, "task submitted");

        let inner = Arc::clone(&self.inner);
        let coordinated = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("helios-task-{}", id.0))
            .spawn(move || coordinate(inner, coordinated, work, deadline));
        if let Err(source) = spawned {
            self.remove(id);
            handle.shared.set_state(TaskState::Cancelled);
            return Err(SchedulerError::Spawn { label, source });
        }
        Ok(handle)
    }

    /// Snapshot of every unfinished task.
    pub fn running(&self) -> Vec<TaskHandle> {
        lock(&self.inner.running).clone()
    }

    /// Snapshot of unfinished tasks that should surface in a UI.
    pub fn visible(&self) -> Vec<TaskHandle> {
        lock(&self.inner.visible).clone()
    }

    pub fn running_count(&self) -> usize {
        lock(&self.inner.running).len()
    }

    pub fn is_busy(&self) -> bool {
        self.running_count() > 0
    }

    pub fn history(&self) -> Vec<TaskRecord> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Stop accepting work and cancel everything still running.
    pub fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let outstanding = self.running();
        if !outstanding.is_empty() {
            tracing::info!(count = outstanding.len(), "shutting down scheduler; cancelling tasks");
        }
        for handle in outstanding {
            handle.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        !self.inner.accepting.load(Ordering::SeqCst)
    }

    fn remove(&self, id: TaskId) {
        self.inner.remove(id);
    }
}

impl SchedulerInner {
    fn remove(&self, id: TaskId) {
        lock(&self.running).retain(|h| h.id() != id);
        lock(&self.visible).retain(|h| h.id() != id);
    }

    fn publish(&self, event: Event) {
        if let Some(events) = &self.events {
            events.publish(&event);
        }
    }
}

fn coordinate(
    inner: Arc<SchedulerInner>,
    handle: TaskHandle,
    work: Work,
    deadline: Option<Duration>,
) {
    let id = handle.id();
    let label = handle.label().to_string();
    let started_at = Utc::now().to_rfc3339();

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let token = handle.token().clone();
    let shared = Arc::clone(&handle.shared);
    let worker = thread::Builder::new().name(format!("helios-worker-{}", id.0)).spawn(move || {
        // Dropped after the work is marked done, waking the coordinator.
        let _done = done_tx;
        let result = panic::catch_unwind(AssertUnwindSafe(|| work(&token)));
        shared.mark_work_done();
        result
    });

    {
        let mut progress = handle.shared.lock_progress();
        if !progress.state.is_terminal() {
            progress.state = TaskState::Running;
        }
    }
    handle.shared.changed.notify_all();
    inner.publish(Event::TaskStarted { id, label: label.clone(), visible: handle.is_visible() });

    let outcome = match worker {
        Ok(worker) => {
            if let Some(deadline) = deadline {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(deadline) {
                    tracing::warn!(task = %label, ?deadline, "task exceeded its deadline");
                    handle.cancel();
                }
            }
            worker.join().unwrap_or_else(|payload| Err(payload))
        }
        Err(e) => Ok(Err(anyhow::Error::new(e).context("failed to spawn worker thread"))),
    };

    let cancelled = {
        let progress = handle.shared.lock_progress();
        if progress.work_done {
            progress.cancelled_in_flight
        } else {
            // The worker never ran.
            handle.token().is_cancelled()
        }
    };
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) if cancelled => {
            tracing::debug!(task = %label, error = %format!("{error:#}"), "cancelled task returned an error");
        }
        Ok(Err(error)) => (inner.sink)(&TaskFailure::Error { task: id, label: label.clone(), error }),
        Err(payload) => {
            let message = panic_message(&*payload);
            (inner.sink)(&TaskFailure::Panic { task: id, label: label.clone(), message });
        }
    }

    inner.remove(id);
    // The record lands in history before waiters observe the terminal state.
    let final_state = {
        let mut progress = handle.shared.lock_progress();
        let final_state = if cancelled { TaskState::Cancelled } else { TaskState::Completed };
        let record = TaskRecord {
            id,
            label: label.clone(),
            visible: handle.is_visible(),
            state: final_state,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        };
        let mut history = lock(&inner.history);
        if history.len() == inner.history_limit {
            history.pop_front();
        }
        history.push_back(record);
        progress.state = final_state;
        final_state
    };
    handle.shared.changed.notify_all();
    tracing::debug!(task = %label, %id, state = ?final_state, "task finished");
    inner.publish(Event::TaskFinished { id, label, state: final_state });
}

fn log_sink() -> ErrorSink {
    Arc::new(|failure: &TaskFailure| {
        tracing::error!(error = %failure, "uncaught task failure");
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(5), "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn completed_task_leaves_running_sets_and_is_recorded() {
        let scheduler = Scheduler::new();
        let handle = scheduler.submit(BackgroundTask::new("noop", |_| Ok(()))).unwrap();
        assert_eq!(handle.wait(), TaskState::Completed);
        wait_until(|| scheduler.history().len() == 1);
        assert!(scheduler.running().is_empty());
        assert!(scheduler.visible().is_empty());
        let record = &scheduler.history()[0];
        assert_eq!(record.label, "noop");
        assert_eq!(record.state, TaskState::Completed);
        assert!(chrono::DateTime::parse_from_rfc3339(&record.finished_at).is_ok());
    }

    #[test]
    fn hidden_tasks_are_not_visible() {
        let scheduler = Scheduler::new();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = scheduler
            .submit(BackgroundTask::new("bookkeeping", move |_| {
                let _ = rx.recv();
                Ok(())
            }).hidden())
            .unwrap();
        assert_eq!(scheduler.running_count(), 1);
        assert!(scheduler.visible().is_empty());
        drop(tx);
        handle.wait();
    }

    #[test]
    fn cancel_runs_hook_once_and_not_after_completion() {
        let scheduler = Scheduler::new();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&hook_calls);
        let handle = scheduler
            .submit(
                BackgroundTask::new("spin", |token| {
                    while !token.is_cancelled() {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Ok(())
                })
                .on_cancel(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.wait(), TaskState::Cancelled);
        assert!(!handle.cancel());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

        let finished_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&finished_calls);
        let done = scheduler
            .submit(BackgroundTask::new("quick", |_| Ok(())).on_cancel(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(done.wait(), TaskState::Completed);
        assert!(!done.cancel());
        assert_eq!(finished_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn errors_and_panics_reach_the_sink() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let scheduler = Scheduler::with_sink(Arc::new(move |f: &TaskFailure| {
            sink.lock().unwrap().push(f.to_string());
        }));

        scheduler.submit(BackgroundTask::new("err", |_| anyhow::bail!("boom"))).unwrap().wait();
        scheduler.submit(BackgroundTask::new("panic", |_| panic!("kaput"))).unwrap().wait();
        wait_until(|| failures.lock().unwrap().len() == 2);

        let failures = failures.lock().unwrap();
        assert!(failures.iter().any(|f| f.contains("task 'err' failed: boom")));
        assert!(failures.iter().any(|f| f.contains("task 'panic' panicked: kaput")));
    }

    #[test]
    fn deadline_cancels_slow_tasks() {
        let scheduler = Scheduler::new();
        let handle = scheduler
            .submit(
                BackgroundTask::new("slow", |token| {
                    while !token.is_cancelled() {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Ok(())
                })
                .with_deadline(Duration::from_millis(30)),
            )
            .unwrap();
        assert_eq!(handle.wait(), TaskState::Cancelled);
    }

    #[test]
    fn shutdown_rejects_new_work_and_cancels_outstanding() {
        let scheduler = Scheduler::new();
        let handle = scheduler
            .submit(BackgroundTask::new("forever", |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(())
            }))
            .unwrap();
        scheduler.shutdown();
        assert_eq!(handle.wait(), TaskState::Cancelled);
        assert!(matches!(
            scheduler.submit(BackgroundTask::new("late", |_| Ok(()))),
            Err(SchedulerError::ShutDown(_))
        ));
    }

    #[test]
    fn hooks_registered_after_cancel_run_immediately() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        token.on_cancel(move || flag.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
        assert!(!token.cancel());
    }

    #[test]
    fn cancel_after_work_returns_is_a_no_op_while_coordinator_finishes() {
        // A slow sink keeps the coordinator busy after the work has returned.
        let scheduler = Scheduler::with_sink(Arc::new(|_: &TaskFailure| {
            thread::sleep(Duration::from_millis(300));
        }));
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&hook_calls);
        let (returned_tx, returned_rx) = mpsc::channel::<()>();
        let handle = scheduler
            .submit(
                BackgroundTask::new("fails-fast", move |_| {
                    let _ = returned_tx.send(());
                    anyhow::bail!("nothing to do")
                })
                .on_cancel(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        returned_rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.state().is_terminal());
        assert!(!handle.cancel());
        assert_eq!(handle.wait(), TaskState::Completed);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
        assert!(!handle.token().is_cancelled());
        assert_eq!(scheduler.history()[0].state, TaskState::Completed);
    }

    #[test]
    fn attached_event_bus_sees_task_lifecycle() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [crate::events::EventKind::TaskStarted, crate::events::EventKind::TaskFinished] {
            let seen = Arc::clone(&seen);
            bus.subscribe(kind, move |event| seen.lock().unwrap().push(event.clone()));
        }
        let scheduler = Scheduler::with_events(Arc::clone(&bus));

        let handle = scheduler.submit(BackgroundTask::new("observed", |_| Ok(()))).unwrap();
        assert_eq!(handle.wait(), TaskState::Completed);
        wait_until(|| seen.lock().unwrap().len() == 2);

        let seen = seen.lock().unwrap();
        assert!(matches!(&seen[0], Event::TaskStarted { label, visible: true, .. } if label == "observed"));
        assert!(matches!(&seen[1], Event::TaskFinished { state: TaskState::Completed, .. }));
    }
}
