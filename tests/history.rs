//! tests/history.rs
//! Execution record lifecycle: terminal fields, ordering, pagination, and
//! the delete guard on jobs with history.

mod common;

use crate::common::{
  build_scheduler, due_interval_job, registry_with, setup_tracing, task_counter_result,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;
use taskwheel::{
  ExecStatus, ExecutionLog, HistoryFilter, JobId, MemoryExecutionLog, Scheduler, StoreError,
  SubmitError, TaskRegistry,
};

const SUCCEED_KEY: &str = "tests.succeed";
const FAIL_KEY: &str = "tests.fail";

// Polls until `job_id` has at least `count` terminal records.
async fn wait_for_terminal(scheduler: &Scheduler, job_id: JobId, count: usize) -> bool {
  for _ in 0..100 {
    let (records, _) = scheduler.job_history(job_id, 1, 100).await.unwrap();
    let terminal = records.iter().filter(|r| r.status.is_terminal()).count();
    if terminal >= count {
      return true;
    }
    tokio::time::sleep(StdDuration::from_millis(20)).await;
  }
  false
}

#[tokio::test]
async fn test_failed_execution_captures_error_message() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    FAIL_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, false),
  );
  let scheduler = build_scheduler(1, registry);

  let future = Utc::now() + ChronoDuration::hours(1);
  let req = due_interval_job("Failing Job", FAIL_KEY, 3600).with_initial_run_time(future);
  let job_id = scheduler.add_job(req).await.unwrap();

  scheduler.trigger_job(job_id).await.expect("Trigger failed");
  assert!(
    wait_for_terminal(&scheduler, job_id, 1).await,
    "Failed execution should reach a terminal state"
  );

  let (records, total) = scheduler.job_history(job_id, 1, 10).await.unwrap();
  assert_eq!(total, 1);
  let record = &records[0];
  assert_eq!(record.status, ExecStatus::Failed);
  assert!(
    record
      .error_message
      .as_deref()
      .is_some_and(|msg| msg.contains("counter task was asked to fail")),
    "Handler error should be captured, got {:?}",
    record.error_message
  );
  assert!(record.started_at.is_some());
  assert!(record.completed_at.is_some());
  assert!(record.duration_ms.is_some());

  // The failure released the instance slot.
  let job = scheduler.get_job(job_id).await.unwrap();
  assert!(!job.is_active(), "Failed execution must release its slot");

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_history_newest_first_with_pagination() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    SUCCEED_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  let future = Utc::now() + ChronoDuration::hours(1);
  let req = due_interval_job("Paginated", SUCCEED_KEY, 3600).with_initial_run_time(future);
  let job_id = scheduler.add_job(req).await.unwrap();

  // Five sequential fires; each trigger waits for the previous slot to
  // free up so every fire is accepted.
  for fire in 1..=5 {
    scheduler.trigger_job(job_id).await.expect("Trigger failed");
    assert!(
      wait_for_terminal(&scheduler, job_id, fire).await,
      "Fire {} should complete",
      fire
    );
  }

  // Page 1 holds the two newest records, in descending fire order.
  let (page_one, total) = scheduler.job_history(job_id, 1, 2).await.unwrap();
  assert_eq!(total, 5);
  assert_eq!(page_one.len(), 2);
  assert!(
    page_one[0].scheduled_at > page_one[1].scheduled_at,
    "History must be ordered newest first"
  );

  // The last page holds the single oldest record.
  let (page_three, total) = scheduler.job_history(job_id, 3, 2).await.unwrap();
  assert_eq!(total, 5);
  assert_eq!(page_three.len(), 1);
  assert!(
    page_three[0].scheduled_at < page_one[1].scheduled_at,
    "Later pages hold older fires"
  );

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_history_requires_existing_job() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    SUCCEED_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  let unknown: JobId = JobId::new_v4();
  let result = scheduler.job_history(unknown, 1, 10).await;
  assert!(
    matches!(result, Err(StoreError::NotFound(id)) if id == unknown),
    "History for an unknown job should be NotFound, got {:?}",
    result
  );

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_delete_job_blocked_by_history_until_purged() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let registry = registry_with(
    SUCCEED_KEY,
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  let scheduler = build_scheduler(1, registry);

  let future = Utc::now() + ChronoDuration::hours(1);
  let req = due_interval_job("Guarded", SUCCEED_KEY, 3600).with_initial_run_time(future);
  let job_id = scheduler.add_job(req).await.unwrap();

  // 1. One completed execution pins the definition.
  scheduler.trigger_job(job_id).await.unwrap();
  assert!(wait_for_terminal(&scheduler, job_id, 1).await);

  let result = scheduler.delete_job(job_id).await;
  assert!(
    matches!(result, Err(SubmitError::HistoryReferenced(id)) if id == job_id),
    "Delete should be refused while records reference the job, got {:?}",
    result
  );
  assert!(
    scheduler.get_job(job_id).await.is_ok(),
    "Refused delete must leave the job in place"
  );

  // 2. Once retention removes the records the delete goes through.
  let purged = scheduler
    .execution_log()
    .delete_completed_before(Utc::now() + ChronoDuration::seconds(1))
    .await;
  assert_eq!(purged, 1, "The completed record should be purged");

  scheduler.delete_job(job_id).await.expect("Delete should succeed now");
  assert!(matches!(
    scheduler.get_job(job_id).await,
    Err(StoreError::NotFound(_))
  ));

  scheduler.shutdown_graceful(None).await.unwrap();
}

#[tokio::test]
async fn test_mark_running_second_call_is_a_noop() {
  setup_tracing();
  let log = MemoryExecutionLog::new();
  let job_id = JobId::new_v4();
  let execution_id = log.create_pending(job_id, Utc::now()).await.unwrap();

  let first = log.mark_running(execution_id).await.unwrap();
  assert_eq!(first.status, ExecStatus::Running);
  let started_at = first.started_at.expect("First transition stamps started_at");

  // The inline worker and a remote consumer may both mark the same
  // execution; the first write wins and the second changes nothing.
  tokio::time::sleep(StdDuration::from_millis(30)).await;
  let second = log.mark_running(execution_id).await.unwrap();
  assert_eq!(second.status, ExecStatus::Running);
  assert_eq!(
    second.started_at,
    Some(started_at),
    "The first start time must be kept"
  );
  assert_eq!(
    log.running_count(job_id).await,
    1,
    "Still exactly one running record"
  );
}

#[tokio::test]
async fn test_terminal_mark_reports_the_transition_once() {
  setup_tracing();
  let log = MemoryExecutionLog::new();
  let job_id = JobId::new_v4();
  let execution_id = log.create_pending(job_id, Utc::now()).await.unwrap();
  log.mark_running(execution_id).await.unwrap();

  // The sweep times the run out first.
  let failed = log.mark_failed(execution_id, "timed out").await.unwrap();
  assert!(
    failed.transitioned,
    "The first terminal mark performs the transition"
  );
  assert_eq!(failed.record.status, ExecStatus::Failed);

  // The run's own worker finishes later; its mark is a no-op and says so,
  // which is what keeps it from releasing a slot it no longer owns.
  let late = log.mark_succeeded(execution_id).await.unwrap();
  assert!(!late.transitioned, "A terminal record reports no transition");
  assert_eq!(late.record.status, ExecStatus::Failed);
  assert_eq!(late.record.error_message.as_deref(), Some("timed out"));
}

#[tokio::test]
async fn test_history_filter_by_status() {
  setup_tracing();
  let counter = Arc::new(AtomicUsize::new(0));
  let mut registry = TaskRegistry::new();
  registry.register_fn(
    SUCCEED_KEY,
    "Succeeds.",
    task_counter_result(counter.clone(), StdDuration::ZERO, true),
  );
  registry.register_fn(
    FAIL_KEY,
    "Fails.",
    task_counter_result(counter.clone(), StdDuration::ZERO, false),
  );
  let scheduler = build_scheduler(2, registry);

  let future = Utc::now() + ChronoDuration::hours(1);
  let ok_id = scheduler
    .add_job(due_interval_job("Ok Job", SUCCEED_KEY, 3600).with_initial_run_time(future))
    .await
    .unwrap();
  let bad_id = scheduler
    .add_job(due_interval_job("Bad Job", FAIL_KEY, 3600).with_initial_run_time(future))
    .await
    .unwrap();

  scheduler.trigger_job(ok_id).await.unwrap();
  scheduler.trigger_job(bad_id).await.unwrap();
  assert!(wait_for_terminal(&scheduler, ok_id, 1).await);
  assert!(wait_for_terminal(&scheduler, bad_id, 1).await);

  // Status filter spans jobs; job filter narrows to one definition.
  let log = scheduler.execution_log();
  let (failed, failed_total) = log
    .query(
      HistoryFilter {
        job_id: None,
        status: Some(ExecStatus::Failed),
      },
      1,
      10,
    )
    .await;
  assert_eq!(failed_total, 1);
  assert_eq!(failed[0].job_id, bad_id);

  let (for_ok_job, ok_total) = log.query(HistoryFilter::for_job(ok_id), 1, 10).await;
  assert_eq!(ok_total, 1);
  assert_eq!(for_ok_job[0].status, ExecStatus::Succeeded);

  scheduler.shutdown_graceful(None).await.unwrap();
}
