use std::thread;
use std::time::Duration;
use tracing::info;
use worker_dispatch::{PoolConfig, ResultHandle, ThreadLauncher, WorkerPool};

fn echo(i: u32) -> String {
  info!("Worker handling payload {}", i);
  thread::sleep(Duration::from_millis(250));
  format!("echo:{}", i)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Echo Pool Example ---");

  let pool = WorkerPool::<u32, String>::create(ThreadLauncher::new("echo", echo), PoolConfig::new("echo_pool", 4))
    .await
    .expect("Pool creation failed");

  let dispatcher = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.start().await })
  };

  let handles: Vec<ResultHandle<String>> = (0..8).map(|i| pool.submit(i)).collect();
  info!("Submitted {} tasks. Stats: {:?}", handles.len(), pool.stats());

  for handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  info!("All results received. Stopping pool.");
  pool.stop().await;
  match dispatcher.await {
    Ok(Ok(())) => info!("Dispatcher loop finished."),
    Ok(Err(e)) => info!("Dispatcher loop error: {:?}", e),
    Err(e) => info!("Dispatcher task join error: {:?}", e),
  }
  info!("--- Echo Pool Example End ---");
}
