//! tests/recurring.rs
//! Recurring fires: grid alignment, catch-up, jobs slower than their
//! interval.

mod common;

use std::collections::HashMap;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc, Mutex,
};
use std::time::Duration as StdDuration;

use crate::common::{
  build_scheduler, due_interval_job, registry_with, setup_tracing, task_counter_result,
  wait_until,
};
use chrono::{Duration as ChronoDuration, Utc};
use taskwheel::TaskRegistry;

const COUNTER_KEY: &str = "tests.counter";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_interval_jobs_accumulate() {
  setup_tracing();

  let total_test_duration = StdDuration::from_millis(4450);

  // One handler keyed once; it attributes runs to jobs via the context.
  let execution_counts = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
  let tracker = Arc::clone(&execution_counts);
  let mut registry = TaskRegistry::new();
  registry.register_fn("tests.tracked", "Counts runs per job name.", move |ctx| {
    let tracker = Arc::clone(&tracker);
    Box::pin(async move {
      // Simulate some work
      tokio::time::sleep(StdDuration::from_millis(50)).await;
      let mut counts = tracker.lock().unwrap();
      *counts.entry(ctx.job_name).or_insert(0) += 1;
      Ok(())
    })
  });

  let scheduler = build_scheduler(4, registry);

  // (name, interval_seconds); both are already due so the first fire is
  // immediate.
  let jobs_to_run = [("Job A (fast)", 1), ("Job B (slow)", 2)];
  for (name, interval_seconds) in jobs_to_run {
    scheduler
      .add_job(due_interval_job(name, "tests.tracked", interval_seconds))
      .await
      .expect("Failed to add job");
  }

  tracing::info!(
    "Scheduler running with {} jobs for {:?}...",
    jobs_to_run.len(),
    total_test_duration
  );
  tokio::time::sleep(total_test_duration).await;

  scheduler
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("Scheduler failed to shut down gracefully");

  let final_counts = execution_counts.lock().unwrap();
  tracing::info!("Final execution counts: {:?}", final_counts);

  // ~4.5s window: the 1s job should land 5 fires (t=0..4), the 2s job 3
  // fires (t=0,2,4). Allow one fire of jitter either way.
  let fast = *final_counts.get("Job A (fast)").unwrap_or(&0);
  let slow = *final_counts.get("Job B (slow)").unwrap_or(&0);
  assert!(
    (4..=6).contains(&fast),
    "1s job should run about 5 times, ran {}",
    fast
  );
  assert!(
    (2..=4).contains(&slow),
    "2s job should run about 3 times, ran {}",
    slow
  );
}

#[tokio::test]
async fn test_overdue_job_catches_up_one_fire_per_tick() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  // First fire 35s in the past with a 10s period: four missed fires
  // (-35s, -25s, -15s, -5s), then the grid moves into the future.
  let first_fire = Utc::now() - ChronoDuration::seconds(35);
  let req = due_interval_job("Catch Up", COUNTER_KEY, 10).with_initial_run_time(first_fire);
  let job_id = scheduler.add_job(req).await.unwrap();

  let caught_up = wait_until(StdDuration::from_secs(2), || {
    counter.load(Ordering::SeqCst) >= 4
  })
  .await;
  assert!(
    caught_up,
    "All four missed fires should be claimed (ran {})",
    counter.load(Ordering::SeqCst)
  );

  // No fifth fire: the next one is still in the future.
  tokio::time::sleep(StdDuration::from_millis(200)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 4);

  let job = scheduler.get_job(job_id).await.unwrap();
  assert_eq!(
    job.last_run_at,
    Some(first_fire + ChronoDuration::seconds(30)),
    "Last fire is the final missed grid slot"
  );
  assert_eq!(
    job.next_run_at,
    Some(first_fire + ChronoDuration::seconds(40)),
    "Catch-up advances one period at a time and stays on the grid"
  );
  assert!(job.next_run_at.unwrap() > Utc::now());

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_job_slower_than_interval_stays_on_grid() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  // Work takes longer than the period, so every fire after the first finds
  // the previous one still running for a while.
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::from_millis(1200), true),
  );
  let scheduler = build_scheduler(2, registry);

  let req = due_interval_job("Overdue Job", COUNTER_KEY, 1);
  let first_fire = req.start_at.unwrap();
  let job_id = scheduler.add_job(req).await.unwrap();

  tokio::time::sleep(StdDuration::from_secs(4)).await;

  let runs = counter.load(Ordering::SeqCst);
  assert!(
    (2..=4).contains(&runs),
    "Slow job should keep being claimed after each release (ran {})",
    runs
  );

  // While an instance was running, due ticks were rejected by the
  // instance limit instead of stacking executions.
  let metrics = scheduler.metrics_snapshot();
  assert!(
    metrics.claims_rejected > 0,
    "Saturated ticks should be counted as rejected claims"
  );

  // However many fires landed, the planned time never left the 1s grid.
  let job = scheduler.get_job(job_id).await.unwrap();
  let next = job.next_run_at.expect("Job should remain scheduled");
  let offset_ms = (next - first_fire).num_milliseconds();
  assert_eq!(
    offset_ms % 1_000,
    0,
    "next_run_at should be a whole number of periods after the first fire"
  );

  scheduler.shutdown_graceful(None).await.unwrap();
}
