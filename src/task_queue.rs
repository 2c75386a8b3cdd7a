use crate::gate::Gate;
use crate::task::Task;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tracing::trace;

struct QueueShared<P> {
  tasks: Mutex<VecDeque<Task<P>>>,
  gate: Gate,
}

/// An unbounded FIFO of pending tasks with a single consumer.
///
/// The consumer parks on a `Gate` while the queue is empty. Producers signal
/// the gate only on the empty to non-empty transition.
pub(crate) struct TaskQueue<P> {
  shared: Arc<QueueShared<P>>,
}

impl<P: Send + 'static> TaskQueue<P> {
  pub(crate) fn new() -> Self {
    Self {
      shared: Arc::new(QueueShared {
        tasks: Mutex::new(VecDeque::new()),
        gate: Gate::new(),
      }),
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer<P>, QueueConsumer<P>) {
    (
      QueueProducer {
        shared: self.shared.clone(),
      },
      QueueConsumer { shared: self.shared },
    )
  }
}

/// The producer handle for the `TaskQueue`. It can be cloned and shared across
/// multiple submission sites.
pub(crate) struct QueueProducer<P> {
  shared: Arc<QueueShared<P>>,
}

impl<P> Clone for QueueProducer<P> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

/// The consumer handle for the `TaskQueue`. It cannot be cloned, which keeps
/// the queue's gate at a single waiter.
pub(crate) struct QueueConsumer<P> {
  shared: Arc<QueueShared<P>>,
}

impl<P> fmt::Debug for QueueProducer<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}

impl<P> fmt::Debug for QueueConsumer<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConsumer").finish_non_exhaustive()
  }
}

impl<P> QueueProducer<P> {
  /// Appends a task at the tail. Never blocks, never rejects.
  pub(crate) fn push(&self, task: Task<P>) {
    let was_empty = {
      let mut tasks = self.shared.tasks.lock();
      let was_empty = tasks.is_empty();
      tasks.push_back(task);
      was_empty
    };
    if was_empty {
      trace!("Task queue became non-empty, signalling consumer.");
      self.shared.gate.signal();
    }
  }

  /// Puts a task back at the head, ahead of everything already queued.
  pub(crate) fn push_front(&self, task: Task<P>) {
    let was_empty = {
      let mut tasks = self.shared.tasks.lock();
      let was_empty = tasks.is_empty();
      tasks.push_front(task);
      was_empty
    };
    if was_empty {
      self.shared.gate.signal();
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.shared.tasks.lock().len()
  }
}

impl<P: Send + 'static> QueueConsumer<P> {
  /// Takes the head of the queue, parking on the gate while the queue is empty.
  pub(crate) async fn next(&self) -> Task<P> {
    loop {
      let wait = self.shared.gate.wait();
      let head = self.shared.tasks.lock().pop_front();
      if let Some(task) = head {
        return task;
      }
      trace!("Task queue empty, consumer parking.");
      wait.await;
    }
  }

  /// Turns the consumer into an infinite stream of tasks in submission order.
  pub(crate) fn consume(self) -> BoxStream<'static, Task<P>> {
    stream::unfold(self, |consumer| async move {
      let task = consumer.next().await;
      Some((task, consumer))
    })
    .boxed()
  }
}
