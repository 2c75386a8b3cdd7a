use std::fmt;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::trace;

/// Single-waiter park/wake primitive with non-buffered signaling.
///
/// `signal()` wakes whoever is currently registered through `wait()`. A signal
/// with nobody registered is lost; a later `wait()` only returns after a later
/// `signal()`.
///
/// Registration happens when the future returned by `wait()` is created, not
/// when it is first polled. Callers create the wait future, re-check their
/// condition, then await it, so a signal racing the check is never missed.
///
/// At most one outstanding `wait()` per gate. This is not checked; every gate
/// in this crate has exactly one consumer loop.
pub struct Gate {
  notify: Notify,
}

impl Gate {
  pub fn new() -> Self {
    Self { notify: Notify::new() }
  }

  /// Registers the caller and returns a future that resolves on the next `signal()`.
  pub fn wait(&self) -> Notified<'_> {
    self.notify.notified()
  }

  /// Wakes the registered waiter, if any. Never stores a permit.
  pub fn signal(&self) {
    trace!("Gate signalled.");
    self.notify.notify_waiters();
  }
}

impl Default for Gate {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Gate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Gate").finish_non_exhaustive()
  }
}
