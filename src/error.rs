use thiserror::Error;

/// Errors that can occur within the `worker_dispatch` pool.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Pool size must be at least 1")]
  InvalidPoolSize,

  #[error("Failed to launch worker for slot {slot}: {reason}")]
  WorkerLaunch { slot: usize, reason: String },

  #[error("Worker in slot {slot} failed to become ready: {reason}")]
  WorkerStartup { slot: usize, reason: String },

  #[error("Dispatcher loop was already started for this pool")]
  AlreadyStarted,

  #[error("Result channel for task {task_id} closed before a result arrived (pool dropped)")]
  ResultChannelClosed { task_id: u64 },
}
