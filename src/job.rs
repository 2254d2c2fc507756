use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidScheduleError;
use crate::schedule::Schedule;

// --- Public Type Aliases ---

/// Type alias for the unique identifier of a job definition. Uses UUID v4.
pub type JobId = Uuid;

/// Type alias for the unique identifier of one execution attempt of a job.
/// Uses UUID v4.
pub type ExecutionId = Uuid;

/// Type alias for the simple numeric ID assigned to worker tasks for logging.
pub(crate) type WorkerId = usize;

// --- Job Request ---

/// The user-supplied configuration for a job, passed to
/// `Scheduler::add_job` or seeded through the builder.
///
/// Use the [`JobRequest::from_cron`] / [`JobRequest::from_interval`]
/// constructors; both validate the schedule up front so an invalid
/// definition never reaches the scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
  /// Human-readable job name (serialized as `nameEn`).
  pub name_en: String,
  /// Key of the registered task handler this job runs.
  pub task_key: String,
  /// When the job fires.
  pub schedule: Schedule,
  /// Disabled jobs keep their definition but are never considered due.
  pub enabled: bool,
  /// Due jobs are claimed in descending priority order within a tick.
  pub priority: i32,
  /// Upper bound on concurrently running executions of this job.
  pub max_instances: u32,
  /// Overrides the first planned fire time. When unset the first fire is
  /// computed from the schedule relative to submission time.
  pub start_at: Option<DateTime<Utc>>,
}

impl JobRequest {
  pub fn new(name_en: &str, task_key: &str, schedule: Schedule) -> Self {
    JobRequest {
      name_en: name_en.to_string(),
      task_key: task_key.to_string(),
      schedule,
      enabled: true,
      priority: 0,
      max_instances: 1,
      start_at: None,
    }
  }

  /// Creates a job request scheduled via a 5-field cron expression
  /// (interpreted in UTC).
  pub fn from_cron(
    name_en: &str,
    task_key: &str,
    expression: &str,
  ) -> Result<Self, InvalidScheduleError> {
    Ok(Self::new(name_en, task_key, Schedule::cron(expression)?))
  }

  /// Creates a job request scheduled at a fixed interval.
  pub fn from_interval(
    name_en: &str,
    task_key: &str,
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
  ) -> Result<Self, InvalidScheduleError> {
    Ok(Self::new(
      name_en,
      task_key,
      Schedule::interval(days, hours, minutes, seconds)?,
    ))
  }

  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// Values below 1 are raised to 1.
  pub fn with_max_instances(mut self, max_instances: u32) -> Self {
    self.max_instances = max_instances.max(1);
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  /// Sets a specific initial run time for the job's first execution.
  ///
  /// Subsequent fires are computed from the schedule relative to the prior
  /// planned fire time, so an initial time in the past makes the job due on
  /// the very next tick.
  pub fn with_initial_run_time(mut self, run_time: DateTime<Utc>) -> Self {
    self.start_at = Some(run_time);
    self
  }
}

// --- Job Definition ---

/// The stored definition and live scheduling state of one job.
///
/// Rows live in a [`JobStore`](crate::store::JobStore); the scheduler loop
/// reads due rows each tick and the store's claim operation guards the
/// `running` count against `max_instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
  pub id: JobId,
  pub name_en: String,
  pub task_key: String,
  pub schedule: Schedule,
  pub enabled: bool,
  pub priority: i32,
  pub max_instances: u32,
  /// Number of currently claimed (pending or running) executions.
  /// Maintained by the store's claim/release operations.
  pub running: u32,
  pub last_run_at: Option<DateTime<Utc>>,
  /// The next planned fire time. Recomputed from its prior value at claim
  /// time, before execution starts, and after any definition change.
  pub next_run_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

impl JobDefinition {
  /// Materializes a definition from a request, computing the first planned
  /// fire time relative to `now` unless the request pinned one.
  pub fn from_request(
    request: JobRequest,
    now: DateTime<Utc>,
  ) -> Result<Self, InvalidScheduleError> {
    let next_run_at = match request.start_at {
      Some(at) => at,
      None => request.schedule.next_fire_time(now)?,
    };
    Ok(JobDefinition {
      id: Uuid::new_v4(),
      name_en: request.name_en,
      task_key: request.task_key,
      schedule: request.schedule,
      enabled: request.enabled,
      priority: request.priority,
      max_instances: request.max_instances.max(1),
      running: 0,
      last_run_at: None,
      next_run_at: Some(next_run_at),
      created_at: now,
    })
  }

  /// Whether the job currently has at least one live execution claimed.
  pub fn is_active(&self) -> bool {
    self.running > 0
  }

  /// Whether the job should fire at or before `now`.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.enabled && self.next_run_at.is_some_and(|at| at <= now)
  }
}

// --- Job Patch ---

/// A partial update to a stored job definition. `None` fields are left
/// unchanged.
///
/// Changing the schedule recomputes `next_run_at` from the new schedule at
/// update time, abandoning the previously planned fire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
  pub name_en: Option<String>,
  pub schedule: Option<Schedule>,
  pub enabled: Option<bool>,
  pub priority: Option<i32>,
  pub max_instances: Option<u32>,
}

impl JobPatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn schedule(mut self, schedule: Schedule) -> Self {
    self.schedule = Some(schedule);
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = Some(enabled);
    self
  }

  pub fn priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  pub fn max_instances(mut self, max_instances: u32) -> Self {
    self.max_instances = Some(max_instances);
    self
  }

  pub fn name_en(mut self, name_en: &str) -> Self {
    self.name_en = Some(name_en.to_string());
    self
  }

  /// True when no field is set; applying it would change nothing.
  pub fn is_empty(&self) -> bool {
    self.name_en.is_none()
      && self.schedule.is_none()
      && self.enabled.is_none()
      && self.priority.is_none()
      && self.max_instances.is_none()
  }
}
