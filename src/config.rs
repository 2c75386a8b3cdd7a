use std::thread;

/// Settings for a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Used in log spans and worker thread names.
  pub name: String,
  /// Number of worker slots. Must be at least 1.
  pub size: usize,
}

impl PoolConfig {
  pub fn new(name: &str, size: usize) -> Self {
    Self {
      name: name.to_string(),
      size,
    }
  }

  pub fn with_name(mut self, name: &str) -> Self {
    self.name = name.to_string();
    self
  }

  pub fn with_size(mut self, size: usize) -> Self {
    self.size = size;
    self
  }
}

impl Default for PoolConfig {
  /// One slot per available CPU, falling back to a single slot.
  fn default() -> Self {
    let size = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Self::new("worker_pool", size)
  }
}
