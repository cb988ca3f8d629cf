//! Job lifecycle: records, the FIFO queue and its worker, progress events
//! and the generation executor the worker drives.

pub mod events;
pub mod generation;
pub mod model;
pub mod queue;

pub use events::{DEFAULT_EVENT_BUFFER, ProgressBroadcaster, Subscription};
pub use generation::GenerationExecutor;
pub use model::{
    Job, JobEvent, JobEventKind, JobMode, JobResult, JobStatus, StepRecord, StepStatus,
};
pub use queue::{JobExecutor, JobQueue, StepReporter};
