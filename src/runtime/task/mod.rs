//! Compile-job runtime.
//!
//! Two FIFO queues, each drained by its own pool of workers. Every worker
//! owns a private generator context. Jobs resolve a [`Fence`] when they
//! finish, so any thread can wait on a build without knowing who runs it.

mod fence;
mod metrics;
mod scheduler;

pub use fence::{Fence, FenceState};
pub use metrics::{CompilerMetrics, MetricsSnapshot};
pub use scheduler::{
    CompilerQueues, JobFn, JobId, JobStatus, JobTicket, Priority, QueueConfig, WorkerContext,
};
