//! A Tokio-coordinated pool that offloads tasks to a fixed set of parallel
//! workers, queuing without bound and routing each result back to its submitter.

mod availability;
mod config;
mod error;
mod gate;
mod handle;
mod manager;
mod task;
mod task_queue;
mod thread_worker;
mod worker;

pub use availability::AvailabilityTracker;
pub use config::PoolConfig;
pub use error::PoolError;
pub use gate::Gate;
pub use handle::ResultHandle;
pub use manager::{PoolStats, WorkerPool};
pub use task::{SlotId, Task, TaskId};
pub use thread_worker::ThreadLauncher;
pub use worker::{EventSender, WorkerEvent, WorkerHandle, WorkerLauncher};
