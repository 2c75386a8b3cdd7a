use crate::error::PoolError;
use crate::task::{SlotId, Task};
use crate::worker::{EventSender, WorkerHandle, WorkerLauncher};

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info_span, warn};

/// Launches one dedicated OS thread per slot, each running `processor` on the
/// payloads it is handed.
///
/// A panic inside `processor` is reported as an error and then ends the
/// thread, so the slot is retired and the in-flight task never resolves.
pub struct ThreadLauncher<F> {
  name: Arc<String>,
  processor: Arc<F>,
}

impl<F> ThreadLauncher<F> {
  pub fn new(name: &str, processor: F) -> Self {
    Self {
      name: Arc::new(name.to_string()),
      processor: Arc::new(processor),
    }
  }
}

impl<F> fmt::Debug for ThreadLauncher<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ThreadLauncher").field("name", &self.name).finish_non_exhaustive()
  }
}

impl<P, R, F> WorkerLauncher<P, R> for ThreadLauncher<F>
where
  P: Send + 'static,
  R: Send + 'static,
  F: Fn(P) -> R + Send + Sync + 'static,
{
  fn launch(&self, slot: SlotId, events: EventSender<R>) -> Result<Box<dyn WorkerHandle<P>>, PoolError> {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel::<Task<P>>();
    let processor = self.processor.clone();

    let join = thread::Builder::new()
      .name(format!("{}-worker-{}", self.name, slot))
      .spawn(move || run_worker_thread(slot, processor, inbox_rx, events))
      .map_err(|e| PoolError::WorkerLaunch {
        slot,
        reason: e.to_string(),
      })?;

    Ok(Box::new(ThreadWorker {
      slot,
      inbox: Mutex::new(Some(inbox_tx)),
      join: Mutex::new(Some(join)),
    }))
  }
}

struct ThreadWorker<P> {
  slot: SlotId,
  inbox: Mutex<Option<mpsc::UnboundedSender<Task<P>>>>,
  join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<P: Send + 'static> WorkerHandle<P> for ThreadWorker<P> {
  fn post(&self, task: Task<P>) -> Result<(), Task<P>> {
    let inbox = self.inbox.lock();
    match inbox.as_ref() {
      Some(tx) => tx.send(task).map_err(|rejected| rejected.0),
      None => Err(task),
    }
  }

  fn terminate(&self) -> BoxFuture<'static, ()> {
    // Dropping the sender ends the thread's receive loop after its current task.
    self.inbox.lock().take();
    let join = self.join.lock().take();
    let slot = self.slot;

    async move {
      let Some(join) = join else {
        return;
      };
      match tokio::task::spawn_blocking(move || join.join()).await {
        Ok(Ok(())) => debug!(slot, "Worker thread joined."),
        Ok(Err(_)) => error!(slot, "Worker thread panicked outside of task processing."),
        Err(join_error) => error!(slot, "Failed to join worker thread: {:?}", join_error),
      }
    }
    .boxed()
  }
}

fn run_worker_thread<P, R, F>(
  slot: SlotId,
  processor: Arc<F>,
  mut inbox: mpsc::UnboundedReceiver<Task<P>>,
  events: EventSender<R>,
) where
  F: Fn(P) -> R,
{
  let span = info_span!("worker", slot);
  let _entered = span.enter();
  debug!("Worker thread started.");
  events.ready();

  while let Some(task) = inbox.blocking_recv() {
    let task_id = task.id;
    let payload = task.payload;
    match panic::catch_unwind(AssertUnwindSafe(|| (*processor)(payload))) {
      Ok(result) => events.completed(task_id, result),
      Err(panic_payload) => {
        let message = panic_message(&*panic_payload);
        warn!(task_id, "Worker panicked while processing task: {}", message);
        events.errored(message);
        break;
      }
    }
  }

  debug!("Worker thread exiting.");
  events.exited();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "worker panicked".to_string()
  }
}
