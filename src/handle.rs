use crate::error::PoolError;
use crate::task::TaskId;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// A handle to a task submitted to the `WorkerPool`.
///
/// Resolves once the worker that ran the task reports its completion. There is
/// no timeout: if that worker dies mid-task the handle stays pending.
#[derive(Debug)]
pub struct ResultHandle<R> {
  pub(crate) task_id: TaskId,
  pub(crate) result_receiver: oneshot::Receiver<R>,
}

impl<R> ResultHandle<R> {
  pub(crate) fn new(task_id: TaskId, result_receiver: oneshot::Receiver<R>) -> Self {
    Self {
      task_id,
      result_receiver,
    }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> TaskId {
    self.task_id
  }

  /// Returns the result if it has already arrived, without waiting.
  ///
  /// After this has returned `Ok(Some(_))` the result has been taken and
  /// `await_result` will report a closed channel.
  pub fn try_result(&mut self) -> Result<Option<R>, PoolError> {
    match self.result_receiver.try_recv() {
      Ok(result) => Ok(Some(result)),
      Err(TryRecvError::Empty) => Ok(None),
      Err(TryRecvError::Closed) => Err(PoolError::ResultChannelClosed { task_id: self.task_id }),
    }
  }

  /// Awaits the worker's result for this task.
  ///
  /// # Errors
  /// Returns `PoolError::ResultChannelClosed` if the pool was dropped while the
  /// result was still pending.
  pub async fn await_result(self) -> Result<R, PoolError> {
    match self.result_receiver.await {
      Ok(result) => Ok(result),
      Err(recv_error) => {
        tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
        Err(PoolError::ResultChannelClosed { task_id: self.task_id })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn await_result_returns_sent_value() {
    let (tx, rx) = oneshot::channel();
    let handle = ResultHandle::new(4, rx);
    assert_eq!(handle.id(), 4);
    tx.send("ok".to_string()).unwrap();
    assert_eq!(handle.await_result().await, Ok("ok".to_string()));
  }

  #[tokio::test]
  async fn dropped_sender_reports_closed_channel() {
    let (tx, rx) = oneshot::channel::<u32>();
    let handle = ResultHandle::new(9, rx);
    drop(tx);
    assert_eq!(
      handle.await_result().await,
      Err(PoolError::ResultChannelClosed { task_id: 9 })
    );
  }

  #[test]
  fn try_result_reports_pending_then_value() {
    let (tx, rx) = oneshot::channel::<u32>();
    let mut handle = ResultHandle::new(1, rx);
    assert_eq!(handle.try_result(), Ok(None));
    tx.send(7).unwrap();
    assert_eq!(handle.try_result(), Ok(Some(7)));
  }
}
