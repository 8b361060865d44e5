//! Event dispatch between the core and its host.
//!
//! Events are a closed enum; handlers register per `EventKind` in an explicit
//! dispatch table. Handlers run synchronously on the publishing thread, so a UI
//! host must marshal onto its own thread itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::archive::ArtifactId;
use crate::services::scheduler::{TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ArtifactOpened { id: ArtifactId, path: PathBuf },
    ArtifactClosed { id: ArtifactId },
    TaskStarted { id: TaskId, label: String, visible: bool },
    TaskFinished { id: TaskId, label: String, state: TaskState },
    TransformCompleted { transformer: String, member: String, success: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ArtifactOpened,
    ArtifactClosed,
    TaskStarted,
    TaskFinished,
    TransformCompleted,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ArtifactOpened { .. } => EventKind::ArtifactOpened,
            Event::ArtifactClosed { .. } => EventKind::ArtifactClosed,
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskFinished { .. } => EventKind::TaskFinished,
            Event::TransformCompleted { .. } => EventKind::TransformCompleted,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Kind -> handlers dispatch table.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("kinds", &kinds).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Deliver `event` to every handler registered for its kind, in subscription order.
    pub fn publish(&self, event: &Event) {
        // Snapshot so handlers may subscribe without deadlocking.
        let targets: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in targets {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn handlers_only_see_their_kind() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::ArtifactClosed, move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        bus.publish(&Event::ArtifactOpened { id: ArtifactId(1), path: PathBuf::from("a.jar") });
        bus.publish(&Event::ArtifactClosed { id: ArtifactId(1) });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Event::ArtifactClosed { id: ArtifactId(1) }]);
    }
}
