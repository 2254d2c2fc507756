//! tests/basic.rs
//! Basic scheduling tests (add, execute, advance, disabled jobs)

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{
  build_scheduler, due_interval_job, registry_with, setup_tracing, task_counter_result,
  test_builder, wait_until,
};
use chrono::{Duration as ChronoDuration, Utc};

use taskwheel::{ExecStatus, SubmitError};

const COUNTER_KEY: &str = "tests.counter";

#[tokio::test]
async fn test_due_job_executes_and_advances() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  // 1. Add an already-due interval job (2s period).
  let req = due_interval_job("Interval Basic", COUNTER_KEY, 2);
  let first_fire = req.start_at.expect("helper sets an initial run time");
  let job_id = scheduler.add_job(req).await.expect("Failed to add job");
  tracing::info!("Job submitted: {}", job_id);

  // 2. Wait for the first execution.
  let ran = wait_until(StdDuration::from_secs(2), || {
    counter.load(Ordering::SeqCst) >= 1
  })
  .await;
  assert!(
    ran,
    "Job should have run at least once (ran {})",
    counter.load(Ordering::SeqCst)
  );

  // 3. The definition reflects the fire: last run stamped with the planned
  //    fire time, next advanced exactly one period from it.
  let job = scheduler.get_job(job_id).await.unwrap();
  assert_eq!(
    job.last_run_at,
    Some(first_fire),
    "last_run_at should be the planned fire time, not the wall clock"
  );
  assert_eq!(
    job.next_run_at,
    Some(first_fire + ChronoDuration::seconds(2)),
    "next_run_at should advance one period from the prior planned time"
  );

  // 4. Exactly one history record, terminal and successful.
  let (records, total) = scheduler.job_history(job_id, 1, 10).await.unwrap();
  assert_eq!(total, 1, "Exactly one execution should be recorded");
  let record = &records[0];
  assert_eq!(record.status, ExecStatus::Succeeded);
  assert_eq!(record.scheduled_at, first_fire);
  assert!(record.started_at.is_some(), "started_at should be stamped");
  assert!(record.completed_at.is_some(), "completed_at should be stamped");
  assert!(record.duration_ms.is_some(), "duration_ms should be stamped");
  assert!(record.error_message.is_none());

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_unknown_task_key_rejected() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  let req = due_interval_job("Orphan Key", "tests.unregistered", 2);
  let result = scheduler.add_job(req).await;
  assert!(
    matches!(result, Err(SubmitError::UnknownTaskKey(ref key)) if key == "tests.unregistered"),
    "Expected UnknownTaskKey, got {:?}",
    result
  );

  let (_, total) = scheduler.list_jobs(1, 10).await;
  assert_eq!(total, 0, "Rejected job should not be stored");

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_disabled_job_does_not_fire_until_enabled() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  // 1. Add a due job that starts disabled.
  let req = due_interval_job("Sleeping Job", COUNTER_KEY, 2).with_enabled(false);
  let job_id = scheduler.add_job(req).await.unwrap();

  // 2. Give the loop several ticks; nothing should fire.
  tokio::time::sleep(StdDuration::from_millis(400)).await;
  assert_eq!(
    counter.load(Ordering::SeqCst),
    0,
    "Disabled job must never be claimed"
  );
  let job = scheduler.get_job(job_id).await.unwrap();
  assert!(!job.enabled);
  assert!(!job.is_active());
  assert!(job.last_run_at.is_none());

  // 3. Enable it; the overdue fire is claimed on the next tick.
  scheduler.enable_job(job_id).await.unwrap();
  let ran = wait_until(StdDuration::from_secs(2), || {
    counter.load(Ordering::SeqCst) >= 1
  })
  .await;
  assert!(ran, "Enabled job should fire its overdue slot");

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_seeded_job_executes() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );

  // Seeded through the builder instead of add_job.
  let scheduler = test_builder(1)
    .task_registry(registry)
    .seed_job(due_interval_job("Seeded", COUNTER_KEY, 5))
    .build()
    .expect("Failed to build scheduler with seed job");

  let (jobs, total) = scheduler.list_jobs(1, 10).await;
  assert_eq!(total, 1, "Seed job should be stored at startup");
  assert_eq!(jobs[0].name_en, "Seeded");

  let ran = wait_until(StdDuration::from_secs(2), || {
    counter.load(Ordering::SeqCst) >= 1
  })
  .await;
  assert!(ran, "Seeded job should execute like any other job");

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_status_reports_counts_and_heartbeat() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    COUNTER_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(2, registry);

  // Far-future jobs so counts stay stable while we look.
  let future = Utc::now() + ChronoDuration::hours(1);
  let enabled_req = due_interval_job("Enabled", COUNTER_KEY, 3600).with_initial_run_time(future);
  let disabled_req = due_interval_job("Disabled", COUNTER_KEY, 3600)
    .with_initial_run_time(future)
    .with_enabled(false);
  scheduler.add_job(enabled_req).await.unwrap();
  scheduler.add_job(disabled_req).await.unwrap();

  // Let a few ticks land so the heartbeat is fresh.
  tokio::time::sleep(StdDuration::from_millis(150)).await;

  let status = scheduler.status().await;
  assert!(status.is_running, "Heartbeat should be recent while running");
  assert_eq!(status.total_jobs, 2);
  assert_eq!(status.enabled_jobs, 1);
  assert_eq!(status.active_instances, 0);
  assert_eq!(status.running_executions, 0);
  assert!(status.last_heartbeat.is_some());

  scheduler.shutdown_graceful(None).await.unwrap();
}
