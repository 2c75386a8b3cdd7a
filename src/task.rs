use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Opaque identifier of a submitted task, unique within the process.
pub type TaskId = u64;

/// Index of a worker slot, in `[0, pool size)`.
pub type SlotId = usize;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) fn next_task_id() -> TaskId {
  NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A unit of work travelling from the submitter to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<P> {
  pub id: TaskId,
  pub payload: P,
}

impl<P> Task<P> {
  pub fn new(id: TaskId, payload: P) -> Self {
    Self { id, payload }
  }
}
