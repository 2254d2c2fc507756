//! tests/common.rs
//! Shared helpers for the integration tests: tracing setup, fast-ticking
//! scheduler construction, and stock task handlers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use taskwheel::{
  HandlerError, JobRequest, Scheduler, SchedulerBuilder, TaskContext, TaskFuture, TaskRegistry,
};
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

/// Fast tick so due fires are claimed within a few tens of milliseconds.
pub const TEST_TICK: StdDuration = StdDuration::from_millis(25);

// A builder preconfigured for tests: fast tick, given worker count.
pub fn test_builder(max_workers: usize) -> SchedulerBuilder {
  Scheduler::builder()
    .max_workers(max_workers)
    .tick_interval(TEST_TICK)
}

// Builds a scheduler with `max_workers` workers and the given registry,
// panicking on build errors.
pub fn build_scheduler(max_workers: usize, registry: TaskRegistry) -> Scheduler {
  test_builder(max_workers)
    .task_registry(registry)
    .build()
    .expect("Failed to build test scheduler")
}

// A registry holding a single task under `key`.
pub fn registry_with<F>(key: &str, func: F) -> TaskRegistry
where
  F: Fn(TaskContext) -> TaskFuture + Send + Sync + 'static,
{
  let mut registry = TaskRegistry::new();
  registry.register_fn(key, "Integration test task.", func);
  registry
}

// An interval job request whose first fire is already slightly in the
// past, so the next tick claims it.
pub fn due_interval_job(name: &str, task_key: &str, interval_seconds: i64) -> JobRequest {
  JobRequest::from_interval(name, task_key, 0, 0, 0, interval_seconds)
    .expect("Test interval should be valid")
    .with_initial_run_time(Utc::now() - chrono::Duration::milliseconds(50))
}

// Polls `condition` every 20ms until it returns true or `timeout` elapses.
// Returns whether the condition was met.
pub async fn wait_until(timeout: StdDuration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    tokio::time::sleep(StdDuration::from_millis(20)).await;
  }
  condition()
}

// Creates a task that increments a counter, optionally delays, and returns
// a specific success/failure result.
pub fn task_counter_result(
  counter: Arc<AtomicUsize>,
  delay: StdDuration,
  succeeds: bool,
) -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
  move |_ctx| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(
        "Counter task executing (Count: {}, WillSucceed: {})",
        count,
        succeeds
      );
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(())
      } else {
        Err(HandlerError::msg("counter task was asked to fail"))
      }
    })
  }
}

// Creates a task that sets a flag when executed.
pub fn task_flag(
  flag: Arc<AtomicBool>,
  delay: StdDuration,
) -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
  move |_ctx| {
    let flg = flag.clone();
    Box::pin(async move {
      tracing::debug!("Flag task executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      flg.store(true, Ordering::SeqCst);
      tracing::debug!("Flag task set flag to true");
      Ok(())
    })
  }
}

// Creates a task that panics.
pub fn task_panic() -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
  move |_ctx| {
    Box::pin(async move {
      tracing::debug!("Panic task executing...");
      // Ensure some async operation happens before the panic
      tokio::task::yield_now().await;
      panic!("Task forced panic!");
    })
  }
}

// Creates a task for concurrency testing.
// Increments active count on start, decrements on end. Updates max observed
// and counts completions.
pub fn task_concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  completions: Arc<AtomicUsize>,
  delay: StdDuration,
) -> impl Fn(TaskContext) -> TaskFuture + Send + Sync + 'static {
  move |_ctx| {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    let done = completions.clone();
    Box::pin(async move {
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!("Concurrency task START (Active: {})", current_active);

      // Update max observed atomically
      max_obs.fetch_max(current_active, Ordering::SeqCst);

      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }

      let current_active_after = active.fetch_sub(1, Ordering::SeqCst) - 1;
      done.fetch_add(1, Ordering::SeqCst);
      tracing::debug!("Concurrency task END (Active: {})", current_active_after);
      Ok(())
    })
  }
}
