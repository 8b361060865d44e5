//! Transformation dispatch: validate, assemble the classpath, resolve
//! settings, run the backend on the scheduler and deliver one outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::archive::{OpenedArtifact, Workspace};
use crate::classfile;
use crate::events::{Event, EventBus};
use crate::model::{TransformOutcome, TransformOutput};
use crate::services::registry::{BackendError, TransformRequest, Transformer};
use crate::services::scheduler::{BackgroundTask, Scheduler, TaskHandle};
use crate::settings::ConfigStore;

/// Canonical name -> bytes for every entry a backend may cross-reference.
pub type Classpath = BTreeMap<String, Arc<[u8]>>;

/// Enumeration order used when building a classpath; the first name seen wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClasspathOrder {
    /// The target artifact, then every other artifact in open order.
    #[default]
    TargetFirst,
    /// Every artifact in open order, the target wherever it was opened.
    OpenOrder,
}

/// Internal class name for class files, the entry path for everything else.
pub fn canonical_name(path: &str, bytes: &[u8]) -> String {
    match classfile::probe(bytes) {
        Ok(info) => info.internal_name,
        Err(_) => path.to_string(),
    }
}

/// Union of all entries of `target` and `open`, first seen wins.
///
/// `open` is the workspace in open order and may contain `target` itself.
pub fn build_classpath(
    target: &Arc<OpenedArtifact>,
    open: &[Arc<OpenedArtifact>],
    order: ClasspathOrder,
) -> Classpath {
    let mut sequence: Vec<&Arc<OpenedArtifact>> = Vec::with_capacity(open.len() + 1);
    match order {
        ClasspathOrder::TargetFirst => {
            sequence.push(target);
            sequence.extend(open.iter().filter(|a| a.id() != target.id()));
        }
        ClasspathOrder::OpenOrder => {
            sequence.extend(open.iter());
            if !open.iter().any(|a| a.id() == target.id()) {
                sequence.push(target);
            }
        }
    }

    let mut classpath = Classpath::new();
    for artifact in sequence {
        for (path, bytes) in artifact.entries().iter() {
            classpath.entry(canonical_name(path, bytes)).or_insert_with(|| Arc::clone(bytes));
        }
    }
    classpath
}

type Callback = Box<dyn FnOnce(TransformOutcome) + Send>;

/// One-shot delivery of the outcome; later deliveries are dropped.
#[derive(Clone)]
struct Completion {
    callback: Arc<Mutex<Option<Callback>>>,
    transformer: String,
    member: String,
    events: Option<Arc<EventBus>>,
}

impl Completion {
    fn deliver(&self, outcome: TransformOutcome) {
        let callback = self.callback.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(callback) = callback else {
            return;
        };
        match &outcome {
            TransformOutcome::Succeeded(_) => {
                tracing::debug!(transformer = %self.transformer, member = %self.member, "transformation succeeded")
            }
            TransformOutcome::Failed(message) => {
                tracing::debug!(transformer = %self.transformer, member = %self.member, %message, "transformation failed")
            }
            TransformOutcome::Cancelled => {
                tracing::info!(transformer = %self.transformer, member = %self.member, "transformation aborted")
            }
        }
        if let Some(events) = &self.events {
            events.publish(&Event::TransformCompleted {
                transformer: self.transformer.clone(),
                member: self.member.clone(),
                success: outcome.is_success(),
            });
        }
        callback(outcome);
    }
}

/// Delivers a failure if the work closure unwinds before delivering anything.
struct UnwindGuard(Completion);

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.deliver(TransformOutcome::Failed(format!(
                "{} crashed while processing {}",
                self.0.transformer, self.0.member
            )));
        }
    }
}

/// Orchestrates transformations for the artifacts of one workspace.
#[derive(Clone)]
pub struct Dispatcher {
    workspace: Arc<Workspace>,
    scheduler: Scheduler,
    store: Arc<dyn ConfigStore>,
    order: ClasspathOrder,
    deadline: Option<Duration>,
    events: Option<Arc<EventBus>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("order", &self.order)
            .field("deadline", &self.deadline)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(workspace: Arc<Workspace>, scheduler: Scheduler, store: Arc<dyn ConfigStore>) -> Self {
        Self { workspace, scheduler, store, order: ClasspathOrder::default(), deadline: None, events: None }
    }

    pub fn with_classpath_order(mut self, order: ClasspathOrder) -> Self {
        self.order = order;
        self
    }

    /// Cancel transformations that run longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn classpath_order(&self) -> ClasspathOrder {
        self.order
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Run `transformer` on `member` of `artifact` in the background.
    ///
    /// `on_complete` is called exactly once. Input problems are reported
    /// synchronously and return `None`: no task is submitted for them.
    pub fn invoke<F>(
        &self,
        artifact: &Arc<OpenedArtifact>,
        member: &str,
        transformer: &Arc<Transformer>,
        on_complete: F,
    ) -> Option<TaskHandle>
    where
        F: FnOnce(TransformOutcome) + Send + 'static,
    {
        let completion = Completion {
            callback: Arc::new(Mutex::new(Some(Box::new(on_complete)))),
            transformer: transformer.id().to_string(),
            member: member.to_string(),
            events: self.events.clone(),
        };

        let Some(input) = artifact.entry(member) else {
            completion.deliver(TransformOutcome::Failed(format!("No such entry: {member}")));
            return None;
        };
        if let Err(message) = transformer.validate(&input) {
            completion.deliver(TransformOutcome::Failed(message));
            return None;
        }
        let name = canonical_name(member, &input);

        let label = format!("{} {} ({})", transformer.capability().verb(), member, transformer.name());
        let work_completion = completion.clone();
        let cancel_completion = completion.clone();
        let artifact = Arc::clone(artifact);
        let transformer = Arc::clone(transformer);
        let workspace = Arc::clone(&self.workspace);
        let store = Arc::clone(&self.store);
        let order = self.order;
        let member = member.to_string();

        let mut task = BackgroundTask::new(label, move |token| {
            let completion = work_completion;
            let _guard = UnwindGuard(completion.clone());

            let classpath = build_classpath(&artifact, &workspace.artifacts(), order);
            let defaults = transformer.backend().default_settings();
            let settings = match transformer.settings().resolve(transformer.id(), defaults, &*store) {
                Ok(settings) => settings,
                Err(e) => {
                    completion.deliver(TransformOutcome::Failed(format!(
                        "Could not resolve settings for {}: {e}",
                        transformer.name()
                    )));
                    return Ok(());
                }
            };
            if token.is_cancelled() {
                completion.deliver(TransformOutcome::Cancelled);
                return Ok(());
            }

            let request = TransformRequest {
                name: &name,
                member: &member,
                input: &input,
                classpath: &classpath,
                settings: &settings,
            };
            let result = transformer.backend().transform(&request, token);
            completion.deliver(interpret(&transformer, &name, result, token.is_cancelled()));
            Ok(())
        })
        .on_cancel(move || cancel_completion.deliver(TransformOutcome::Cancelled));
        if let Some(deadline) = self.deadline {
            task = task.with_deadline(deadline);
        }

        match self.scheduler.submit(task) {
            Ok(handle) => Some(handle),
            Err(e) => {
                completion.deliver(TransformOutcome::Failed(e.to_string()));
                None
            }
        }
    }

    /// Convenience for callers without an event loop: invoke and wait for the outcome.
    pub fn invoke_and_wait(
        &self,
        artifact: &Arc<OpenedArtifact>,
        member: &str,
        transformer: &Arc<Transformer>,
    ) -> TransformOutcome {
        let (tx, rx) = mpsc::channel();
        self.invoke(artifact, member, transformer, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.recv().unwrap_or(TransformOutcome::Cancelled)
    }
}

fn interpret(
    transformer: &Transformer,
    name: &str,
    result: Result<TransformOutput, BackendError>,
    cancelled: bool,
) -> TransformOutcome {
    if cancelled {
        return TransformOutcome::Cancelled;
    }
    match result {
        Ok(mut output) => match output.success.remove(name) {
            Some(payload) => TransformOutcome::Succeeded(payload),
            None => TransformOutcome::Failed(diagnostic(transformer, name, &output)),
        },
        Err(BackendError::Cancelled) => TransformOutcome::Cancelled,
        Err(e) => {
            tracing::warn!(transformer = %transformer.id(), member = %name, error = %e, "backend failed");
            TransformOutcome::Failed(format!(
                "{} failed on {name}:\n{:?}",
                transformer.name(),
                anyhow::Error::new(e)
            ))
        }
    }
}

fn diagnostic(transformer: &Transformer, name: &str, output: &TransformOutput) -> String {
    let mut text = format!("{} produced no output for {name}", transformer.name());
    if !output.success.is_empty() {
        let produced: Vec<&str> = output.success.keys().map(String::as_str).collect();
        text.push_str(&format!("\nproduced instead: {}", produced.join(", ")));
    }
    if !output.stdout.trim().is_empty() {
        text.push_str("\n\nstdout:\n");
        text.push_str(output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        text.push_str("\n\nstderr:\n");
        text.push_str(output.stderr.trim_end());
    }
    text
}
