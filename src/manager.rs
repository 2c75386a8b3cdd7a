use crate::availability::AvailabilityTracker;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::ResultHandle;
use crate::task::{next_task_id, SlotId, Task, TaskId};
use crate::task_queue::{QueueConsumer, QueueProducer, TaskQueue};
use crate::worker::{EventSender, SlotEvent, WorkerEvent, WorkerHandle, WorkerLauncher};

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

type PendingResults<R> = DashMap<TaskId, oneshot::Sender<R>>;

/// A point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
  pub size: usize,
  pub idle: usize,
  pub retired: usize,
  pub queued: usize,
  pub pending_results: usize,
}

/// Dispatches submitted payloads to a fixed set of workers and routes each
/// worker's result back to the matching `ResultHandle`.
///
/// `submit` only enqueues. Nothing is handed to a worker until `start` runs the
/// dispatcher loop, which keeps going until `stop`.
pub struct WorkerPool<P: Send + 'static, R: Send + 'static> {
  pool_name: Arc<String>,
  producer: QueueProducer<P>,
  consumer: Mutex<Option<QueueConsumer<P>>>,
  tracker: Arc<AvailabilityTracker>,
  pending_results: Arc<PendingResults<R>>,
  workers: Vec<Box<dyn WorkerHandle<P>>>,
  shutdown_token: CancellationToken,
  event_loop_join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static, R: Send + 'static> WorkerPool<P, R> {
  /// Launches `config.size` workers and resolves once every one of them has
  /// reported ready. A worker that exits after its ready report has its slot
  /// retired and does not fail creation.
  ///
  /// # Errors
  /// `InvalidPoolSize` for a zero size, whatever the launcher returns if a
  /// launch fails, and `WorkerStartup` if a worker exits before it is ready.
  /// Already-launched workers are terminated before the error is returned.
  pub async fn create<L>(launcher: L, config: PoolConfig) -> Result<Arc<Self>, PoolError>
  where
    L: WorkerLauncher<P, R>,
  {
    if config.size == 0 {
      return Err(PoolError::InvalidPoolSize);
    }
    let size = config.size;
    let pool_name = Arc::new(config.name);
    info!(pool_name = %*pool_name, size, "Creating worker pool.");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SlotEvent<R>>();
    let mut workers: Vec<Box<dyn WorkerHandle<P>>> = Vec::with_capacity(size);
    for slot in 0..size {
      match launcher.launch(slot, EventSender::new(slot, events_tx.clone())) {
        Ok(worker) => workers.push(worker),
        Err(launch_error) => {
          error!(pool_name = %*pool_name, slot, "Failed to launch worker: {}", launch_error);
          terminate_all(&workers).await;
          return Err(launch_error);
        }
      }
    }
    // Only workers hold senders from here on, so the channel closes once they are all gone.
    drop(events_tx);

    let tracker = Arc::new(AvailabilityTracker::new(size));
    if let Err(startup_error) = await_readiness(&pool_name, &tracker, &mut events_rx).await {
      error!(pool_name = %*pool_name, "Worker pool startup failed: {}", startup_error);
      terminate_all(&workers).await;
      return Err(startup_error);
    }
    info!(pool_name = %*pool_name, size, "All workers ready.");

    let (producer, consumer) = TaskQueue::new().split();
    let pending_results: Arc<PendingResults<R>> = Arc::new(DashMap::new());
    let shutdown_token = CancellationToken::new();

    let event_loop_join_handle = tokio::spawn(
      run_event_loop(
        pool_name.clone(),
        events_rx,
        tracker.clone(),
        pending_results.clone(),
        shutdown_token.clone(),
      )
      .instrument(info_span!("worker_event_loop", pool_name = %*pool_name)),
    );

    Ok(Arc::new(Self {
      pool_name,
      producer,
      consumer: Mutex::new(Some(consumer)),
      tracker,
      pending_results,
      workers,
      shutdown_token,
      event_loop_join_handle: Mutex::new(Some(event_loop_join_handle)),
    }))
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of slots, retired ones included.
  pub fn size(&self) -> usize {
    self.workers.len()
  }

  /// Returns the current number of tasks waiting for dispatch.
  pub fn queued_task_count(&self) -> usize {
    self.producer.len()
  }

  /// Returns the number of submitted tasks whose result has not arrived yet.
  pub fn pending_result_count(&self) -> usize {
    self.pending_results.len()
  }

  pub fn is_stopped(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  pub fn stats(&self) -> PoolStats {
    PoolStats {
      size: self.size(),
      idle: self.tracker.idle_count(),
      retired: self.tracker.retired_count(),
      queued: self.producer.len(),
      pending_results: self.pending_results.len(),
    }
  }

  /// Enqueues `payload` and returns a handle to its eventual result.
  ///
  /// Never blocks and never fails; the queue is unbounded. Tasks submitted
  /// before `start` wait in the queue.
  pub fn submit(&self, payload: P) -> ResultHandle<R> {
    let task_id = next_task_id();
    let (result_tx, result_rx) = oneshot::channel::<R>();
    self.pending_results.insert(task_id, result_tx);

    if self.shutdown_token.is_cancelled() {
      warn!(pool_name = %self.pool_name, %task_id, "Submit: pool is stopped, task will stay queued.");
    }
    debug!(pool_name = %self.pool_name, %task_id, "Submitting task to queue.");
    self.producer.push(Task::new(task_id, payload));

    ResultHandle::new(task_id, result_rx)
  }

  /// Runs the dispatcher loop until `stop` is called.
  ///
  /// The loop borrows the pool for as long as it runs, so a spawned dispatcher
  /// (`tokio::spawn(async move { pool.start().await })` on an `Arc` clone) keeps
  /// the pool alive. Dropping the other `Arc`s then cancels nothing; call `stop`.
  ///
  /// # Errors
  /// `AlreadyStarted` if the dispatcher was started before.
  pub async fn start(&self) -> Result<(), PoolError> {
    let consumer = self.consumer.lock().take().ok_or(PoolError::AlreadyStarted)?;
    self
      .run_dispatcher_loop(consumer)
      .instrument(info_span!("dispatcher_loop", pool_name = %*self.pool_name))
      .await;
    Ok(())
  }

  /// Stops dispatching, terminates every worker and waits for them to finish.
  ///
  /// Queued tasks are not drained and in-flight results are not failed; their
  /// handles stay pending.
  pub async fn stop(&self) {
    let already_stopping = self.shutdown_token.is_cancelled();
    if !already_stopping {
      info!(pool_name = %self.pool_name, "Stopping worker pool.");
      self.shutdown_token.cancel();
    } else {
      info!(pool_name = %self.pool_name, "Stop already requested, waiting for workers.");
    }

    terminate_all(&self.workers).await;
    debug!(pool_name = %self.pool_name, "All workers terminated.");

    let handle_to_await: Option<JoinHandle<()>> = self.event_loop_join_handle.lock().take();
    if let Some(handle) = handle_to_await {
      match handle.await {
        Ok(()) => debug!(pool_name = %self.pool_name, "Worker event loop joined."),
        Err(join_error) => {
          error!(pool_name = %self.pool_name, "Error joining worker event loop: {:?}", join_error);
        }
      }
    }

    if !already_stopping {
      info!(
        pool_name = %self.pool_name,
        queued = self.producer.len(),
        pending_results = self.pending_results.len(),
        "Worker pool stopped."
      );
    }
  }

  async fn run_dispatcher_loop(&self, consumer: QueueConsumer<P>) {
    info!("Dispatcher loop started.");
    let mut tasks = consumer.consume();

    loop {
      let task = tokio::select! {
        biased;
        _ = self.shutdown_token.cancelled() => break,
        next = tasks.next() => match next {
          Some(task) => task,
          None => break,
        },
      };

      let slot = tokio::select! {
        biased;
        _ = self.shutdown_token.cancelled() => {
          self.producer.push_front(task);
          break;
        }
        slot = self.tracker.claim_idle() => slot,
      };

      self.dispatch(slot, task);
    }

    info!(queued = self.producer.len(), "Dispatcher loop stopped.");
  }

  fn dispatch(&self, slot: SlotId, task: Task<P>) {
    let task_id = task.id;
    match self.workers[slot].post(task) {
      Ok(()) => debug!(%task_id, slot, "Dispatched task to worker."),
      Err(task) => {
        warn!(%task_id, slot, "Worker refused task. Retiring slot and requeueing task.");
        self.tracker.retire(slot);
        self.producer.push_front(task);
      }
    }
  }
}

/// Cancels the dispatcher and event loop if `stop` was never called.
///
/// Only runs once the last `Arc` is gone, which never happens while a spawned
/// `start` future still holds a clone.
impl<P: Send + 'static, R: Send + 'static> Drop for WorkerPool<P, R> {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      // Workers are not awaited here; dropping their handles lets them wind down.
      info!(
        pool_name = %*self.pool_name,
        "WorkerPool dropped without stop. Cancelling dispatcher and event loop."
      );
      self.shutdown_token.cancel();
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: pool already stopped.");
    }
  }
}

async fn terminate_all<P: 'static>(workers: &[Box<dyn WorkerHandle<P>>]) {
  join_all(workers.iter().map(|worker| worker.terminate())).await;
}

async fn await_readiness<R>(
  pool_name: &str,
  tracker: &AvailabilityTracker,
  events_rx: &mut mpsc::UnboundedReceiver<SlotEvent<R>>,
) -> Result<(), PoolError> {
  let mut ready = vec![false; tracker.len()];
  let mut ready_count = 0;

  while ready_count < ready.len() {
    let Some((slot, event)) = events_rx.recv().await else {
      let slot = ready.iter().position(|r| !*r).unwrap_or(0);
      return Err(PoolError::WorkerStartup {
        slot,
        reason: "worker event channel closed before all workers were ready".to_string(),
      });
    };

    match event {
      WorkerEvent::Ready => {
        if !ready[slot] {
          ready[slot] = true;
          ready_count += 1;
          tracker.mark_idle(slot);
          debug!(pool_name, slot, ready_count, "Worker ready.");
        }
      }
      WorkerEvent::Exited if ready[slot] => {
        warn!(pool_name, slot, "Worker exited after reporting ready. Retiring slot.");
        tracker.retire(slot);
      }
      WorkerEvent::Exited => {
        return Err(PoolError::WorkerStartup {
          slot,
          reason: "worker exited before reporting ready".to_string(),
        });
      }
      WorkerEvent::Errored(message) => {
        warn!(pool_name, slot, "Worker reported an error during startup: {}", message);
      }
      WorkerEvent::Completed { task_id, .. } => {
        warn!(pool_name, slot, %task_id, "Ignoring completion received during startup.");
      }
    }
  }
  Ok(())
}

async fn run_event_loop<R>(
  pool_name: Arc<String>,
  mut events_rx: mpsc::UnboundedReceiver<SlotEvent<R>>,
  tracker: Arc<AvailabilityTracker>,
  pending_results: Arc<PendingResults<R>>,
  shutdown_token: CancellationToken,
) {
  info!(name = %*pool_name, "Worker event loop started.");

  loop {
    let (slot, event) = tokio::select! {
      biased;
      _ = shutdown_token.cancelled() => {
        info!(name = %*pool_name, "Shutdown signal received. Worker event loop terminating.");
        break;
      }
      next = events_rx.recv() => match next {
        Some(slot_event) => slot_event,
        None => {
          info!(name = %*pool_name, "All workers dropped their event senders. Worker event loop terminating.");
          break;
        }
      },
    };
    apply_worker_event(&tracker, &pending_results, slot, event);
  }

  info!(
    name = %*pool_name,
    "Worker event loop stopped. Results still pending: {}",
    pending_results.len()
  );
}

fn apply_worker_event<R>(
  tracker: &AvailabilityTracker,
  pending_results: &PendingResults<R>,
  slot: SlotId,
  event: WorkerEvent<R>,
) {
  match event {
    WorkerEvent::Completed { task_id, result } => match pending_results.remove(&task_id) {
      Some((_, result_tx)) => {
        if result_tx.send(result).is_err() {
          warn!(%task_id, slot, "Result receiver for task was dropped. Result discarded.");
        } else {
          debug!(%task_id, slot, "Task completed, result delivered.");
        }
        tracker.mark_idle(slot);
      }
      None => {
        trace!(%task_id, slot, "Dropping completion with no pending result.");
      }
    },
    WorkerEvent::Exited => {
      warn!(slot, "Worker exited. Retiring slot.");
      tracker.retire(slot);
    }
    WorkerEvent::Errored(message) => {
      warn!(slot, "Worker reported an error: {}", message);
    }
    WorkerEvent::Ready => {
      trace!(slot, "Ignoring ready event from already running worker.");
    }
  }
}
