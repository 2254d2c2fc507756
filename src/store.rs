use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{ClaimConflictError, ClaimError, StoreError};
use crate::history::MAX_PER_PAGE;
use crate::job::{JobDefinition, JobId};

// --- Claim Result ---

/// Outcome of a successful claim for a scheduled fire.
#[derive(Debug, Clone)]
pub struct ClaimedFire {
  /// Snapshot after the claim: `running` incremented, `last_run_at` set and
  /// `next_run_at` already advanced from its prior value.
  pub job: JobDefinition,
  /// The planned fire time this claim is for (the prior `next_run_at`).
  pub scheduled_at: DateTime<Utc>,
}

/// Job totals for the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
  pub total: u64,
  pub enabled: u64,
  /// Sum of claimed instance slots across all jobs.
  pub active_instances: u64,
}

// --- Job Store Port ---

/// Persistence port for job definitions.
///
/// `claim_due` is the concurrency-critical operation: it must atomically
/// verify the job is enabled, due, and below `max_instances`, take one
/// slot, and advance `next_run_at` from its prior value, all as a single
/// conditional update. That is what keeps two cooperating scheduler
/// instances from firing the same planned run twice.
#[async_trait]
pub trait JobStore: Send + Sync {
  async fn insert(&self, job: JobDefinition) -> Result<(), StoreError>;

  async fn get(&self, id: JobId) -> Result<JobDefinition, StoreError>;

  /// Page of definitions plus the total count. `page` is 1-based;
  /// `per_page` is clamped to 1..=[`MAX_PER_PAGE`].
  async fn list(&self, page: u64, per_page: u64) -> (Vec<JobDefinition>, u64);

  /// Replaces the stored definition. The live claim count is owned by the
  /// store and is preserved regardless of the `running` value passed in.
  /// `last_run_at`/`next_run_at` are likewise preserved unless the
  /// incoming schedule differs from the stored one: a read-modify-write of
  /// unrelated fields must not rewind a planned fire a concurrent claim
  /// already advanced.
  async fn update(&self, job: JobDefinition) -> Result<JobDefinition, StoreError>;

  async fn delete(&self, id: JobId) -> Result<(), StoreError>;

  /// Enabled jobs with `next_run_at <= now`, ordered by priority
  /// descending then `next_run_at` ascending.
  async fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobDefinition>;

  /// Atomically claims one execution slot for the currently planned fire
  /// and advances the schedule. See the trait docs.
  async fn claim_due(&self, id: JobId, now: DateTime<Utc>) -> Result<ClaimedFire, ClaimError>;

  /// Claims a slot for an out-of-schedule fire (manual trigger) without
  /// touching the planned times.
  async fn claim_manual(&self, id: JobId) -> Result<JobDefinition, ClaimError>;

  /// Releases one claimed slot. Saturates at zero.
  async fn release(&self, id: JobId);

  async fn counts(&self) -> StoreCounts;
}

// --- In-Memory Implementation ---

/// In-process [`JobStore`] backed by a `parking_lot` lock.
///
/// All claim arithmetic happens under one write lock, which makes the
/// conditional-update contract trivial here; a database-backed
/// implementation expresses the same thing as a conditional `UPDATE`.
#[derive(Default)]
pub struct MemoryJobStore {
  jobs: RwLock<HashMap<JobId, JobDefinition>>,
}

impl MemoryJobStore {
  pub fn new() -> Self {
    MemoryJobStore {
      jobs: RwLock::new(HashMap::new()),
    }
  }
}

#[async_trait]
impl JobStore for MemoryJobStore {
  async fn insert(&self, job: JobDefinition) -> Result<(), StoreError> {
    let mut jobs = self.jobs.write();
    if jobs.contains_key(&job.id) {
      return Err(StoreError::AlreadyExists(job.id));
    }
    jobs.insert(job.id, job);
    Ok(())
  }

  async fn get(&self, id: JobId) -> Result<JobDefinition, StoreError> {
    self
      .jobs
      .read()
      .get(&id)
      .cloned()
      .ok_or(StoreError::NotFound(id))
  }

  async fn list(&self, page: u64, per_page: u64) -> (Vec<JobDefinition>, u64) {
    let jobs = self.jobs.read();
    let mut all: Vec<&JobDefinition> = jobs.values().collect();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let total = all.len() as u64;
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let start = page.max(1).saturating_sub(1).saturating_mul(per_page) as usize;
    let items = all
      .into_iter()
      .skip(start)
      .take(per_page as usize)
      .cloned()
      .collect();
    (items, total)
  }

  async fn update(&self, job: JobDefinition) -> Result<JobDefinition, StoreError> {
    let mut jobs = self.jobs.write();
    let slot = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
    let running = slot.running;
    // A claim racing this update may have advanced the planned times since
    // the caller read its snapshot. Keep the store's own scheduling state
    // unless this update actually changes the schedule.
    let keep_plan = slot.schedule == job.schedule;
    let last_run_at = slot.last_run_at;
    let next_run_at = slot.next_run_at;
    *slot = job;
    slot.running = running;
    if keep_plan {
      slot.last_run_at = last_run_at;
      slot.next_run_at = next_run_at;
    }
    Ok(slot.clone())
  }

  async fn delete(&self, id: JobId) -> Result<(), StoreError> {
    self
      .jobs
      .write()
      .remove(&id)
      .map(|_| ())
      .ok_or(StoreError::NotFound(id))
  }

  async fn due_jobs(&self, now: DateTime<Utc>) -> Vec<JobDefinition> {
    let jobs = self.jobs.read();
    let mut due: Vec<JobDefinition> = jobs
      .values()
      .filter(|job| job.is_due(now))
      .cloned()
      .collect();
    due.sort_by(|a, b| {
      b.priority
        .cmp(&a.priority)
        .then(a.next_run_at.cmp(&b.next_run_at))
        .then(a.id.cmp(&b.id))
    });
    due
  }

  async fn claim_due(&self, id: JobId, now: DateTime<Utc>) -> Result<ClaimedFire, ClaimError> {
    let mut jobs = self.jobs.write();
    let job = jobs.get_mut(&id).ok_or(ClaimError::NotFound(id))?;
    if !job.enabled {
      return Err(ClaimError::Disabled(id));
    }
    let Some(scheduled_at) = job.next_run_at.filter(|at| *at <= now) else {
      return Err(ClaimError::NotDue(id));
    };
    if job.running >= job.max_instances {
      return Err(ClaimError::Saturated(ClaimConflictError {
        job_id: id,
        max_instances: job.max_instances,
      }));
    }

    job.running += 1;
    job.last_run_at = Some(scheduled_at);
    // Advance from the prior planned time, not from now, so fires stay on
    // the schedule's own grid and missed periods are caught up one by one.
    job.next_run_at = match job.schedule.next_fire_time(scheduled_at) {
      Ok(next) => Some(next),
      Err(e) => {
        warn!(job_id = %id, error = %e, "Schedule stopped advancing; job will not fire again.");
        None
      }
    };

    Ok(ClaimedFire {
      job: job.clone(),
      scheduled_at,
    })
  }

  async fn claim_manual(&self, id: JobId) -> Result<JobDefinition, ClaimError> {
    let mut jobs = self.jobs.write();
    let job = jobs.get_mut(&id).ok_or(ClaimError::NotFound(id))?;
    if !job.enabled {
      return Err(ClaimError::Disabled(id));
    }
    if job.running >= job.max_instances {
      return Err(ClaimError::Saturated(ClaimConflictError {
        job_id: id,
        max_instances: job.max_instances,
      }));
    }
    job.running += 1;
    Ok(job.clone())
  }

  async fn release(&self, id: JobId) {
    if let Some(job) = self.jobs.write().get_mut(&id) {
      job.running = job.running.saturating_sub(1);
    }
  }

  async fn counts(&self) -> StoreCounts {
    let jobs = self.jobs.read();
    StoreCounts {
      total: jobs.len() as u64,
      enabled: jobs.values().filter(|job| job.enabled).count() as u64,
      active_instances: jobs.values().map(|job| u64::from(job.running)).sum(),
    }
  }
}
