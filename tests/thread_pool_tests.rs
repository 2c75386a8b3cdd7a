use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use worker_dispatch::{PoolConfig, PoolError, ResultHandle, ThreadLauncher, WorkerPool};

// Helper to initialize tracing for tests
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,worker_dispatch=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Tracks how many processor calls run at the same time.
#[derive(Default)]
struct ConcurrencyMeter {
  active: AtomicUsize,
  peak: AtomicUsize,
}

impl ConcurrencyMeter {
  fn enter(&self) {
    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
  }

  fn leave(&self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_pool_of_four_handles_eight_tasks() {
  setup_tracing_for_test();
  let meter = Arc::new(ConcurrencyMeter::default());
  let delay = Duration::from_millis(150);

  let launcher = {
    let meter = meter.clone();
    ThreadLauncher::new("echo", move |i: u32| {
      meter.enter();
      thread::sleep(delay);
      meter.leave();
      format!("echo:{}", i)
    })
  };
  let pool = WorkerPool::<u32, String>::create(launcher, PoolConfig::new("test_pool_echo", 4))
    .await
    .unwrap();
  let dispatcher = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.start().await })
  };

  let started = Instant::now();
  let handles: Vec<ResultHandle<String>> = (0..8).map(|i| pool.submit(i)).collect();
  let results = timeout(
    Duration::from_secs(5),
    futures::future::join_all(handles.into_iter().map(|h| h.await_result())),
  )
  .await
  .expect("echo results did not arrive");

  for (i, result) in results.into_iter().enumerate() {
    assert_eq!(result, Ok(format!("echo:{}", i)));
  }
  assert_eq!(meter.peak.load(Ordering::SeqCst), 4);
  // Two waves of four.
  assert!(started.elapsed() >= delay * 2);

  pool.stop().await;
  dispatcher.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_task_is_lost_when_tasks_outnumber_workers() {
  setup_tracing_for_test();
  let calls = Arc::new(AtomicUsize::new(0));
  let launcher = {
    let calls = calls.clone();
    ThreadLauncher::new("jitter", move |(index, delay_ms): (usize, u64)| {
      calls.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(delay_ms));
      index * index
    })
  };
  let pool = WorkerPool::<(usize, u64), usize>::create(launcher, PoolConfig::new("test_pool_no_loss", 3))
    .await
    .unwrap();
  let dispatcher = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.start().await })
  };

  let task_count = 40;
  let payloads: Vec<(usize, u64)> = {
    let mut rng = rand::rng();
    (0..task_count).map(|index| (index, rng.random_range(1..15))).collect()
  };
  let handles: Vec<ResultHandle<usize>> = payloads.into_iter().map(|payload| pool.submit(payload)).collect();

  let results = timeout(
    Duration::from_secs(10),
    futures::future::join_all(handles.into_iter().map(|h| h.await_result())),
  )
  .await
  .expect("not every task resolved");

  for (index, result) in results.into_iter().enumerate() {
    assert_eq!(result, Ok(index * index));
  }
  assert_eq!(calls.load(Ordering::SeqCst), task_count);
  assert_eq!(pool.pending_result_count(), 0);
  assert_eq!(pool.queued_task_count(), 0);

  pool.stop().await;
  dispatcher.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_worker_is_retired_and_pool_keeps_going() {
  setup_tracing_for_test();
  let launcher = ThreadLauncher::new("fragile", |n: i64| {
    if n < 0 {
      panic!("negative input");
    }
    n + 1
  });
  let pool = WorkerPool::<i64, i64>::create(launcher, PoolConfig::new("test_pool_panic", 2))
    .await
    .unwrap();
  let dispatcher = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.start().await })
  };

  let mut doomed = pool.submit(-1);
  for _ in 0..200 {
    if pool.stats().retired == 1 {
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }
  assert_eq!(pool.stats().retired, 1);
  assert_eq!(doomed.try_result(), Ok(None));

  let handles: Vec<ResultHandle<i64>> = (0..5).map(|n| pool.submit(n)).collect();
  for (n, handle) in handles.into_iter().enumerate() {
    let result = timeout(Duration::from_secs(2), handle.await_result()).await.unwrap();
    assert_eq!(result, Ok(n as i64 + 1));
  }

  pool.stop().await;
  dispatcher.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_waits_for_threads_and_leaves_in_flight_pending() {
  setup_tracing_for_test();
  let started = Arc::new(AtomicUsize::new(0));
  let launcher = {
    let started = started.clone();
    ThreadLauncher::new("slow", move |ms: u64| {
      started.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(ms));
      ms
    })
  };
  let pool = WorkerPool::<u64, u64>::create(launcher, PoolConfig::new("test_pool_thread_stop", 1))
    .await
    .unwrap();
  let dispatcher = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.start().await })
  };

  let mut in_flight = pool.submit(200);
  let in_flight_id = in_flight.id();
  let mut queued = pool.submit(1);
  for _ in 0..200 {
    if started.load(Ordering::SeqCst) == 1 {
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }

  let stop_began = Instant::now();
  pool.stop().await;
  // The thread finishes its current task before it can exit.
  assert!(stop_began.elapsed() >= Duration::from_millis(100));
  dispatcher.await.unwrap().unwrap();

  assert_eq!(in_flight.try_result(), Ok(None));
  assert_eq!(queued.try_result(), Ok(None));
  assert_eq!(started.load(Ordering::SeqCst), 1);

  drop(pool);
  assert_eq!(
    in_flight.await_result().await,
    Err(PoolError::ResultChannelClosed { task_id: in_flight_id })
  );
}
