use crate::job::{ExecutionId, JobId};

use thiserror::Error;

// --- Schedule Errors ---

/// Errors produced while parsing or evaluating a schedule definition.
///
/// These are rejected at job-definition write time (builder seeding, admin
/// API) and never reach the scheduler loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidScheduleError {
  #[error("Cron expression must have exactly 5 whitespace-separated fields, found {found}.")]
  FieldCount { found: usize },
  #[error("Cron field '{field}' contains an invalid token '{token}'.")]
  Token { field: &'static str, token: String },
  #[error("Cron field '{field}' value {value} is out of range {min}..={max}.")]
  OutOfRange {
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
  },
  #[error("Cron field '{field}' range {start}-{end} is descending.")]
  DescendingRange {
    field: &'static str,
    start: u32,
    end: u32,
  },
  #[error("Cron field '{field}' step must be at least 1.")]
  ZeroStep { field: &'static str },
  #[error("Cron expression '{expression}' never matches a real calendar date.")]
  Unsatisfiable { expression: String },
  #[error("Interval must be positive, computed {total_seconds}s.")]
  NonPositiveInterval { total_seconds: i64 },
  #[error("Job schedule requires either a cron expression or a positive interval.")]
  Missing,
}

// --- Claim Errors ---

/// The job's concurrent-instance slots are all taken.
///
/// Non-fatal: the scheduler loop leaves the job due and retries on the next
/// tick. Surfaced as HTTP 409 only from the synchronous trigger path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Job {job_id} is already at its concurrent instance limit ({max_instances}).")]
pub struct ClaimConflictError {
  pub job_id: JobId,
  pub max_instances: u32,
}

/// Errors returned by the claim operations on
/// [`JobStore`](crate::store::JobStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
  #[error("Job {0} not found.")]
  NotFound(JobId),
  #[error("Job {0} is disabled.")]
  Disabled(JobId),
  #[error("Job {0} is not due (another instance may have claimed this fire).")]
  NotDue(JobId),
  #[error(transparent)]
  Saturated(#[from] ClaimConflictError),
  #[error("Store backend error: {0}.")]
  Backend(String),
}

// --- Store Errors ---

/// Errors from job-definition store operations other than claiming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("Job {0} not found.")]
  NotFound(JobId),
  #[error("Job {0} already exists.")]
  AlreadyExists(JobId),
  #[error("Store backend error: {0}.")]
  Backend(String),
}

// --- History Errors ---

/// Errors from execution-record tracker operations.
///
/// Out-of-order `mark_*` calls are not errors: the tracker keeps terminal
/// records immutable and returns the stored record unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
  #[error("Execution {0} not found.")]
  NotFound(ExecutionId),
  #[error("History backend error: {0}.")]
  Backend(String),
}

// --- Dispatch Errors ---

/// Errors raised by a remote queue implementation while enqueueing.
///
/// The dispatch bridge catches every variant, logs it, and falls back to
/// inline execution; these never propagate past the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
  #[error("Broker unreachable: {0}.")]
  Unreachable(String),
  #[error("Task payload could not be serialized: {0}.")]
  Serialization(String),
  #[error("Queue is closed.")]
  Closed,
}

// --- Handler Errors ---

/// The failure a task handler reports (or is converted to on panic).
///
/// Captured into the execution record's error message and never propagated
/// to the scheduler loop.
#[derive(Error, Debug)]
pub enum HandlerError {
  #[error("{0}")]
  Message(String),
  #[error("Handler panicked: {0}")]
  Panicked(String),
  #[error(transparent)]
  Source(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl HandlerError {
  /// Shorthand for a plain-text handler failure.
  pub fn msg(text: impl Into<String>) -> Self {
    HandlerError::Message(text.into())
  }
}

// --- Retention Errors ---

/// A single retention category's purge failed.
///
/// Caught per category by the cleanup task; never aborts the remaining
/// categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Purge of audit category '{category}' failed: {reason}.")]
pub struct PurgeError {
  pub category: String,
  pub reason: String,
}

// --- Runtime Adapter Errors ---

/// Errors from [`runtime::run_blocking`](crate::runtime::run_blocking) and
/// friends when bridging a future across loop contexts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
  #[error("Bridged task panicked: {0}")]
  Panicked(String),
  #[error("Bridged thread terminated without producing a result.")]
  ThreadLost,
  #[error("Failed to start the bridge thread or its runtime: {0}.")]
  Startup(String),
}

// --- Scheduler Lifecycle Errors ---

/// Errors that can occur during the scheduler building phase using
/// `SchedulerBuilder`.
#[derive(Error, Debug)]
pub enum BuildError {
  #[error("Maximum worker count (`max_workers`) must be specified and greater than zero.")]
  MissingOrZeroMaxWorkers,
  #[error("Tick interval must be greater than zero.")]
  ZeroTickInterval,
  #[error("Seed job '{name}' has an invalid schedule: {source}")]
  SeedSchedule {
    name: String,
    source: InvalidScheduleError,
  },
  #[error("Seed job '{name}' references unknown task key '{task_key}'.")]
  SeedUnknownTaskKey { name: String, task_key: String },
}

/// Errors related to submitting or mutating job definitions through the
/// scheduler handle.
#[derive(Error, Debug)]
pub enum SubmitError {
  #[error("No task handler is registered for key '{0}'.")]
  UnknownTaskKey(String),
  #[error(transparent)]
  InvalidSchedule(#[from] InvalidScheduleError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("Job {0} has recorded executions and cannot be deleted.")]
  HistoryReferenced(JobId),
}

/// Errors related to triggering an immediate run via the scheduler handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
  #[error("Scheduler command channel is closed (likely shut down or panicked).")]
  SchedulerShutdown,
  #[error("Scheduler did not respond to the trigger request.")]
  ResponseFailed,
  #[error("Job {0} not found.")]
  NotFound(JobId),
  #[error("Job {0} is disabled.")]
  Disabled(JobId),
  #[error(transparent)]
  Conflict(#[from] ClaimConflictError),
  #[error("Trigger failed: {0}.")]
  Internal(String),
}

// --- Shutdown Errors ---

/// Errors related to the scheduler shutdown process (`shutdown_graceful`,
/// `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for scheduler tasks (coordinator, workers) to complete shutdown.")]
  Timeout,
  #[error("A worker or coordinator task panicked during the shutdown process.")]
  TaskPanic,
}
