//! The boundary between the pool and whatever actually runs the work.
//!
//! A [`WorkerLauncher`] starts one worker per slot and hands it an
//! [`EventSender`]. The worker reports its lifecycle and results through that
//! sender; the pool drives it through the returned [`WorkerHandle`].

use crate::error::PoolError;
use crate::task::{SlotId, Task, TaskId};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::trace;

/// Events a worker reports back to its pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent<R> {
  Ready,
  Completed { task_id: TaskId, result: R },
  Exited,
  Errored(String),
}

pub(crate) type SlotEvent<R> = (SlotId, WorkerEvent<R>);

/// Slot-tagged sender a worker uses to report events. Reporting after the pool
/// has gone away is a silent no-op.
#[derive(Debug)]
pub struct EventSender<R> {
  slot: SlotId,
  tx: mpsc::UnboundedSender<SlotEvent<R>>,
}

impl<R> Clone for EventSender<R> {
  fn clone(&self) -> Self {
    Self {
      slot: self.slot,
      tx: self.tx.clone(),
    }
  }
}

impl<R> EventSender<R> {
  pub(crate) fn new(slot: SlotId, tx: mpsc::UnboundedSender<SlotEvent<R>>) -> Self {
    Self { slot, tx }
  }

  pub fn slot(&self) -> SlotId {
    self.slot
  }

  pub fn send(&self, event: WorkerEvent<R>) {
    if self.tx.send((self.slot, event)).is_err() {
      trace!(slot = self.slot, "Pool event loop gone, dropping worker event.");
    }
  }

  pub fn ready(&self) {
    self.send(WorkerEvent::Ready);
  }

  pub fn completed(&self, task_id: TaskId, result: R) {
    self.send(WorkerEvent::Completed { task_id, result });
  }

  pub fn exited(&self) {
    self.send(WorkerEvent::Exited);
  }

  pub fn errored(&self, message: impl Into<String>) {
    self.send(WorkerEvent::Errored(message.into()));
  }
}

/// The pool's grip on one running worker.
pub trait WorkerHandle<P>: Send + Sync + 'static {
  /// Hands a task to the worker. If the worker can no longer accept work the
  /// task is given back.
  fn post(&self, task: Task<P>) -> Result<(), Task<P>>;

  /// Asks the worker to stop. The future resolves once it has terminated.
  fn terminate(&self) -> BoxFuture<'static, ()>;
}

/// Starts workers. The launcher value itself describes what a worker runs.
pub trait WorkerLauncher<P, R>: Send + Sync {
  fn launch(&self, slot: SlotId, events: EventSender<R>) -> Result<Box<dyn WorkerHandle<P>>, PoolError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_sender_tags_events_with_slot() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let events = EventSender::<String>::new(3, tx);
    events.ready();
    events.completed(11, "done".to_string());
    events.errored("boom");
    events.exited();

    assert_eq!(rx.try_recv().unwrap(), (3, WorkerEvent::Ready));
    assert_eq!(
      rx.try_recv().unwrap(),
      (
        3,
        WorkerEvent::Completed {
          task_id: 11,
          result: "done".to_string()
        }
      )
    );
    assert_eq!(rx.try_recv().unwrap(), (3, WorkerEvent::Errored("boom".to_string())));
    assert_eq!(rx.try_recv().unwrap(), (3, WorkerEvent::Exited));
  }

  #[test]
  fn sending_after_pool_is_gone_is_silent() {
    let (tx, rx) = mpsc::unbounded_channel::<SlotEvent<u32>>();
    drop(rx);
    let events = EventSender::new(0, tx);
    events.completed(1, 5);
    events.exited();
  }
}
