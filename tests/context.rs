//! tests/context.rs
//! The per-execution context handed to handlers: identity fields, the
//! planned fire time, and freshness across runs.

mod common;

use crate::common::{build_scheduler, due_interval_job, registry_with, setup_tracing, wait_until};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use taskwheel::{task_fn, TaskContext, TaskRegistry};

const CONTEXT_KEY: &str = "tests.context";

#[tokio::test]
async fn test_context_describes_the_fire() {
  setup_tracing();
  let captured = Arc::new(Mutex::new(Vec::<TaskContext>::new()));
  let capture = captured.clone();
  let registry = registry_with(CONTEXT_KEY, move |ctx| {
    let capture = capture.clone();
    Box::pin(async move {
      capture.lock().unwrap().push(ctx);
      Ok(())
    })
  });
  let scheduler = build_scheduler(1, registry);

  let far_out = Utc::now() + ChronoDuration::hours(1);
  let job_id = scheduler
    .add_job(due_interval_job("Context Probe", CONTEXT_KEY, 3600).with_initial_run_time(far_out))
    .await
    .expect("Add job failed");

  // 1. Fire manually and capture what the handler saw.
  let before = Utc::now();
  let execution_id = scheduler.trigger_job(job_id).await.expect("Trigger failed");
  assert!(
    wait_until(StdDuration::from_secs(2), || {
      !captured.lock().unwrap().is_empty()
    })
    .await,
    "Handler should run and capture its context"
  );
  let after = Utc::now();
  let ctx = captured.lock().unwrap()[0].clone();

  // 2. Every identity field points back at this job and this fire.
  assert_eq!(ctx.job_id, job_id);
  assert_eq!(
    ctx.execution_id, execution_id,
    "Context and trigger must name the same execution"
  );
  assert_eq!(ctx.job_name, "Context Probe");
  assert_eq!(ctx.task_key, CONTEXT_KEY);
  assert!(
    ctx.scheduled_at >= before && ctx.scheduled_at <= after,
    "A manual fire is planned at trigger time, got {}",
    ctx.scheduled_at
  );

  // 3. The execution record carries the same planned time.
  let (records, _) = scheduler
    .job_history(job_id, 1, 10)
    .await
    .expect("History failed");
  let record = records
    .iter()
    .find(|r| r.execution_id == execution_id)
    .expect("Record should exist");
  assert_eq!(record.scheduled_at, ctx.scheduled_at);

  scheduler
    .shutdown_graceful(None)
    .await
    .expect("Shutdown failed");
}

#[tokio::test]
async fn test_context_distinct_across_runs() {
  setup_tracing();
  let captured = Arc::new(Mutex::new(Vec::<TaskContext>::new()));
  let capture = captured.clone();

  let mut registry = TaskRegistry::new();
  let capture_fn = task_fn! {
    {
      let capture = capture.clone();
    }
    |ctx| {
      capture.lock().unwrap().push(ctx);
      Ok(())
    }
  };
  registry.register_fn(CONTEXT_KEY, "Captures its context.", capture_fn);
  let scheduler = build_scheduler(1, registry);

  // Every second, first fire already due.
  let job_id = scheduler
    .add_job(due_interval_job("Recurring Probe", CONTEXT_KEY, 1))
    .await
    .expect("Add job failed");

  tokio::time::sleep(StdDuration::from_millis(3350)).await;
  scheduler
    .shutdown_graceful(Some(StdDuration::from_secs(5)))
    .await
    .expect("Shutdown failed");

  let contexts = captured.lock().unwrap();
  assert!(
    contexts.len() >= 3,
    "Expected at least 3 runs, saw {}",
    contexts.len()
  );

  // 1. Same job every time, but a fresh execution id per run.
  for ctx in contexts.iter() {
    assert_eq!(ctx.job_id, job_id);
    assert_eq!(ctx.job_name, "Recurring Probe");
  }
  let mut ids: Vec<_> = contexts.iter().map(|ctx| ctx.execution_id).collect();
  ids.sort_unstable();
  ids.dedup();
  assert_eq!(
    ids.len(),
    contexts.len(),
    "Each run must get its own execution id"
  );

  // 2. Planned fire times sit exactly on the schedule's grid.
  for window in contexts.windows(2) {
    assert_eq!(
      window[1].scheduled_at - window[0].scheduled_at,
      ChronoDuration::seconds(1),
      "Planned times must advance by the interval, not by wall clock drift"
    );
  }
}
