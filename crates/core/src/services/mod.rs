//! Transformer orchestration: registry, background scheduling, dispatch and
//! the built-in backends.

pub mod backends;
pub mod dispatcher;
pub mod export;
pub mod registry;
pub mod scheduler;

pub use dispatcher::{build_classpath, canonical_name, Classpath, ClasspathOrder, Dispatcher};
pub use registry::{Backend, BackendError, RegistryError, TransformRequest, Transformer, TransformerRegistry};
pub use scheduler::{
    BackgroundTask, CancellationToken, Scheduler, SchedulerError, TaskFailure, TaskHandle, TaskId,
    TaskRecord, TaskState,
};
