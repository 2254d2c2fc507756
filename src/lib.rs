//! Taskwheel: A Recurring Job Scheduler with Remote Dispatch
//!
//! Provides a scheduler for running recurring tasks defined by 5-field cron
//! expressions or fixed intervals, with per-job concurrent-instance limits,
//! a full execution history, an optional bridge to a remote task queue, and
//! an embeddable HTTP admin surface.
//!
//! # Features
//!
//! - Schedule jobs using:
//!   - Standard 5-field cron expressions (UTC interpretation).
//!   - Fixed intervals (days/hours/minutes/seconds, e.g. every 15 minutes).
//! - Task functions registered up front in a [`TaskRegistry`]; job
//!   definitions carry only the task key, so definitions survive restarts
//!   and re-bind to fresh handlers at startup.
//! - Per-job `max_instances` limit enforced by an atomic claim; a fire whose
//!   slots are taken stays due and is retried on the next tick.
//! - `next_run_at` advanced from the prior planned fire time (not "now"),
//!   so fixed schedules never drift with execution latency.
//! - Execution history as `pending -> running -> success | failed` records
//!   with durations and captured error messages, queryable and paginated.
//! - Optional remote dispatch: a [`DispatchBridge`] offers routable task
//!   keys to a [`RemoteQueue`] implementation and silently falls back to the
//!   inline worker pool whenever the broker declines or fails.
//! - Manual out-of-schedule triggering through the same claim path
//!   ([`Scheduler::trigger_job`], plus a blocking variant safe to call with
//!   or without an ambient Tokio runtime).
//! - A stale-execution sweep that fails and releases records orphaned by
//!   crashes or hard kills.
//! - Retention cleanup of audit-log categories on independent per-category
//!   windows ([`RetentionTask`]), schedulable like any other job.
//! - An `axum` router for the admin API ([`scheduler_router`]), camelCase
//!   JSON on the wire.
//! - TOML-loadable deployment configuration ([`SchedulerConfig`]).
//! - Built-in metrics ([`MetricsSnapshot`]) and a dashboard-style
//!   [`SchedulerStatus`] snapshot.
//! - Graceful and forced shutdown procedures (with optional timeout).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use taskwheel::{JobRequest, Scheduler, TaskRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Basic tracing setup (optional)
//!     // tracing_subscriber::fmt().with_env_filter("warn,taskwheel=info").init();
//!
//!     let fired = Arc::new(AtomicUsize::new(0));
//!     let fired_in_task = fired.clone();
//!
//!     // Every task the deployment knows is registered before the
//!     // scheduler starts; jobs reference handlers by key only.
//!     let mut registry = TaskRegistry::new();
//!     registry.register_fn(
//!         "reports.nightly",
//!         "Build the nightly report.",
//!         move |ctx| {
//!             let fired = fired_in_task.clone();
//!             Box::pin(async move {
//!                 fired.fetch_add(1, Ordering::SeqCst);
//!                 tracing::info!(job = %ctx.job_name, "Report built.");
//!                 Ok(())
//!             })
//!         },
//!     );
//!
//!     let scheduler = Scheduler::builder()
//!         .max_workers(2)
//!         .tick_interval(Duration::from_millis(250))
//!         .task_registry(registry)
//!         .build()?;
//!
//!     // Define a job on a cron schedule (02:00 UTC daily)...
//!     let job_id = scheduler
//!         .add_job(JobRequest::from_cron(
//!             "Nightly report",
//!             "reports.nightly",
//!             "0 2 * * *",
//!         )?)
//!         .await?;
//!
//!     // ...and fire it once right now, outside the schedule. Instance
//!     // limits still apply; the planned schedule is untouched.
//!     let execution_id = scheduler.trigger_job(job_id).await?;
//!     println!("Manual fire recorded as execution {execution_id}");
//!
//!     tokio::time::sleep(Duration::from_millis(500)).await;
//!
//!     let status = scheduler.status().await;
//!     println!(
//!         "{} job(s) defined, {} execution(s) running",
//!         status.total_jobs, status.running_executions
//!     );
//!
//!     let (records, total) = scheduler.job_history(job_id, 1, 20).await?;
//!     println!(
//!         "{total} execution(s); latest: {:?}",
//!         records.first().map(|record| record.status)
//!     );
//!
//!     scheduler
//!         .shutdown_graceful(Some(Duration::from_secs(5)))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use the [`SchedulerBuilder`] to configure the scheduler:
//! - `max_workers`: inline worker pool size (required).
//! - `tick_interval`: how often the loop looks for due jobs (default 1s).
//! - `stale_run_timeout` / `sweep_every_ticks`: orphaned-execution sweep.
//! - `remote_queue`, `remote_route_keys`, `remote_dispatch_enabled`: the
//!   bridge to a remote task queue.
//! - `job_store` / `execution_log`: persistence overrides (in-memory
//!   implementations are the default).
//! - `seed_job`: definitions inserted at startup.
//!
//! A deployment can keep the file-level knobs in TOML via
//! [`SchedulerConfig`] and [`SchedulerBuilder::from_config`]; the registry,
//! store/log overrides, and the queue client stay in code.
//!
//! # Job Lifecycle & State
//!
//! - Jobs are defined by [`JobRequest`], naming a registered task key and a
//!   [`Schedule`] (cron or interval).
//! - A stored [`JobDefinition`] tracks `enabled` (operator intent),
//!   `running` (live claim count, from which `is_active` derives),
//!   `last_run_at`, and `next_run_at`.
//! - Each fire produces an [`ExecutionRecord`] whose status moves
//!   `pending -> running -> success | failed` and never backwards;
//!   `mark_running` is idempotent.
//! - Handler failures and panics are captured into the record's error
//!   message. They never propagate into the scheduler loop, and one job's
//!   failure never delays another due job in the same tick.
//! - Disabling a job stops future claims; in-flight executions finish.
//!
//! # Observability
//!
//! - Retrieve metrics snapshots with [`Scheduler::metrics_snapshot`]. See
//!   [`MetricsSnapshot`].
//! - [`Scheduler::status`] summarizes job counts, live executions, and
//!   whether the loop heartbeat is recent.
//! - The same data is served over HTTP by [`scheduler_router`] under
//!   `/scheduler`.
//! - Integrate with the `tracing` crate for detailed logs.

// Declare modules within the crate
pub mod api;
pub mod bridge;
mod command;
pub mod config;
mod coordinator;
pub mod error;
pub mod history;
pub mod job;
mod macros;
pub mod metrics;
pub mod registry;
pub mod retention;
pub mod runtime;
pub mod schedule;
pub mod scheduler;
pub mod store;
mod worker;

// --- Public Re-exports ---

// Core scheduler components
pub use scheduler::{Scheduler, SchedulerBuilder};

// Error types
pub use error::{
  AdapterError, BuildError, ClaimConflictError, ClaimError, HandlerError, HistoryError,
  InvalidScheduleError, PurgeError, QueueError, ShutdownError, StoreError, SubmitError,
  TriggerError,
};

// Job definition types
pub use job::{ExecutionId, JobDefinition, JobId, JobPatch, JobRequest};
pub use schedule::{CronExpr, IntervalSpec, Schedule};

// Task registration
pub use registry::{TaskContext, TaskFuture, TaskHandler, TaskMeta, TaskRegistry};

// Execution history
pub use history::{
  ExecStatus, ExecutionLog, ExecutionRecord, HistoryFilter, MemoryExecutionLog, TerminalMark,
};

// Job storage
pub use store::{ClaimedFire, JobStore, MemoryJobStore, StoreCounts};

// Remote dispatch
pub use bridge::{
  DispatchBridge, InProcessQueue, RemoteConsumer, RemoteQueue, RemoteTask, RemoteTaskId,
  RemoteWorker,
};

// Retention cleanup
pub use retention::{
  AuditLogStore, CleanupReport, HistoryRetentionStore, RetentionPolicy, RetentionTask,
  CLEANUP_TASK_KEY,
};

// Metrics and status
pub use metrics::{MetricsSnapshot, SchedulerMetrics, SchedulerStatus};

// Configuration and HTTP surface
pub use api::{scheduler_router, ApiState};
pub use config::{ConfigError, SchedulerConfig};
