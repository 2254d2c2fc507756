use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HistoryError;
use crate::job::{ExecutionId, JobId};

// --- Execution Status ---

/// Lifecycle state of one execution attempt.
///
/// Transitions are monotonic: `Pending -> Running -> {Succeeded | Failed}`.
/// A record never moves backwards and is immutable once terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
  Pending,
  Running,
  #[serde(rename = "success")]
  Succeeded,
  Failed,
}

impl ExecStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, ExecStatus::Succeeded | ExecStatus::Failed)
  }

  /// The name used on the wire and in dashboards.
  pub fn wire_name(&self) -> &'static str {
    match self {
      ExecStatus::Pending => "pending",
      ExecStatus::Running => "running",
      ExecStatus::Succeeded => "success",
      ExecStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for ExecStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.wire_name())
  }
}

// --- Execution Record ---

/// One tracked run attempt of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub execution_id: ExecutionId,
  pub job_id: JobId,
  pub status: ExecStatus,
  /// The fire time this execution was planned for.
  pub scheduled_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<u64>,
  pub error_message: Option<String>,
}

/// Filter for [`ExecutionLog::query`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
  pub job_id: Option<JobId>,
  pub status: Option<ExecStatus>,
}

impl HistoryFilter {
  pub fn for_job(job_id: JobId) -> Self {
    HistoryFilter {
      job_id: Some(job_id),
      status: None,
    }
  }
}

/// Pagination bounds shared by the query surfaces.
pub const MAX_PER_PAGE: u64 = 100;

/// Outcome of a terminal `mark_*` call.
///
/// Exactly one caller observes `transitioned == true` for a given record;
/// that caller owns the follow-up bookkeeping (releasing the job's claim
/// slot). A worker finishing a run the sweep already timed out, or a sweep
/// racing a finishing worker, sees `false` and leaves the slot alone.
#[derive(Debug, Clone)]
pub struct TerminalMark {
  /// The stored record after the call.
  pub record: ExecutionRecord,
  /// Whether this call performed the transition to the terminal state.
  pub transitioned: bool,
}

// --- Execution Log Port ---

/// Append-only tracker of execution attempts.
///
/// Both the scheduler loop and a remote worker may drive transitions for
/// the same execution; implementations must make each `mark_*` atomic and
/// keep the first write. `mark_running` on a record that already left
/// `Pending` is a no-op returning the stored record, which is what makes
/// the inline and remote paths safe to race.
///
/// Implementations are expected to truncate `error_message` to a bounded
/// length before storage.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
  /// Creates a `Pending` record for a claimed fire and returns its id.
  async fn create_pending(
    &self,
    job_id: JobId,
    scheduled_at: DateTime<Utc>,
  ) -> Result<ExecutionId, HistoryError>;

  /// Transitions `Pending -> Running`, stamping `started_at`. Idempotent.
  async fn mark_running(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, HistoryError>;

  /// Transitions a non-terminal record to `Succeeded`, stamping
  /// `completed_at` and `duration_ms`. No-op on terminal records, reported
  /// through [`TerminalMark::transitioned`].
  async fn mark_succeeded(&self, execution_id: ExecutionId) -> Result<TerminalMark, HistoryError>;

  /// Transitions a non-terminal record to `Failed`, capturing the error
  /// text. No-op on terminal records, reported through
  /// [`TerminalMark::transitioned`].
  async fn mark_failed(
    &self,
    execution_id: ExecutionId,
    error: &str,
  ) -> Result<TerminalMark, HistoryError>;

  async fn get(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, HistoryError>;

  /// Filtered page of records ordered by `scheduled_at` descending, plus
  /// the total match count. `page` is 1-based; `per_page` is clamped to
  /// 1..=[`MAX_PER_PAGE`].
  async fn query(
    &self,
    filter: HistoryFilter,
    page: u64,
    per_page: u64,
  ) -> (Vec<ExecutionRecord>, u64);

  /// The newest records, optionally restricted to one job.
  async fn recent(&self, job_id: Option<JobId>, limit: usize) -> Vec<ExecutionRecord>;

  /// Number of records currently in `Running` for the given job.
  async fn running_count(&self, job_id: JobId) -> u32;

  /// Non-terminal records whose activity (`started_at`, or `scheduled_at`
  /// when never started) predates `cutoff`. Feed for the orphan sweep.
  async fn stale_before(&self, cutoff: DateTime<Utc>) -> Vec<ExecutionRecord>;

  /// Deletes terminal records completed before `cutoff`, returning how many
  /// were removed. Retention hook for the scheduler's own history.
  async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> u64;

  /// Whether any record references the given job. Guards hard deletes of
  /// job definitions.
  async fn has_records(&self, job_id: JobId) -> bool;
}

// --- In-Memory Implementation ---

/// Default cap applied to stored error messages.
pub const DEFAULT_ERROR_MESSAGE_CAP: usize = 2_000;

struct Stored {
  /// Insertion sequence, tie-breaker for records sharing a `scheduled_at`.
  seq: u64,
  record: ExecutionRecord,
}

#[derive(Default)]
struct LogState {
  next_seq: u64,
  records: HashMap<ExecutionId, Stored>,
}

/// In-process [`ExecutionLog`] backed by a `parking_lot` lock.
///
/// Suitable for single-process deployments and tests; a persistent
/// implementation backs the same trait with conditional updates.
pub struct MemoryExecutionLog {
  inner: RwLock<LogState>,
  error_cap: usize,
}

impl MemoryExecutionLog {
  pub fn new() -> Self {
    Self::with_error_cap(DEFAULT_ERROR_MESSAGE_CAP)
  }

  /// Overrides the stored-error-message length cap.
  pub fn with_error_cap(error_cap: usize) -> Self {
    MemoryExecutionLog {
      inner: RwLock::new(LogState::default()),
      error_cap: error_cap.max(1),
    }
  }
}

impl Default for MemoryExecutionLog {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ExecutionLog for MemoryExecutionLog {
  async fn create_pending(
    &self,
    job_id: JobId,
    scheduled_at: DateTime<Utc>,
  ) -> Result<ExecutionId, HistoryError> {
    let execution_id = Uuid::new_v4();
    let mut state = self.inner.write();
    let seq = state.next_seq;
    state.next_seq += 1;
    state.records.insert(
      execution_id,
      Stored {
        seq,
        record: ExecutionRecord {
          execution_id,
          job_id,
          status: ExecStatus::Pending,
          scheduled_at,
          started_at: None,
          completed_at: None,
          duration_ms: None,
          error_message: None,
        },
      },
    );
    Ok(execution_id)
  }

  async fn mark_running(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, HistoryError> {
    let mut state = self.inner.write();
    let stored = state
      .records
      .get_mut(&execution_id)
      .ok_or(HistoryError::NotFound(execution_id))?;
    if stored.record.status != ExecStatus::Pending {
      // Already past pending; the first transition wins.
      return Ok(stored.record.clone());
    }
    stored.record.status = ExecStatus::Running;
    stored.record.started_at = Some(Utc::now());
    Ok(stored.record.clone())
  }

  async fn mark_succeeded(&self, execution_id: ExecutionId) -> Result<TerminalMark, HistoryError> {
    let mut state = self.inner.write();
    let stored = state
      .records
      .get_mut(&execution_id)
      .ok_or(HistoryError::NotFound(execution_id))?;
    if stored.record.status.is_terminal() {
      return Ok(TerminalMark {
        record: stored.record.clone(),
        transitioned: false,
      });
    }
    let now = Utc::now();
    stored.record.status = ExecStatus::Succeeded;
    stored.record.completed_at = Some(now);
    stored.record.duration_ms = stored
      .record
      .started_at
      .map(|started| (now - started).num_milliseconds().max(0) as u64);
    Ok(TerminalMark {
      record: stored.record.clone(),
      transitioned: true,
    })
  }

  async fn mark_failed(
    &self,
    execution_id: ExecutionId,
    error: &str,
  ) -> Result<TerminalMark, HistoryError> {
    let mut state = self.inner.write();
    let stored = state
      .records
      .get_mut(&execution_id)
      .ok_or(HistoryError::NotFound(execution_id))?;
    if stored.record.status.is_terminal() {
      return Ok(TerminalMark {
        record: stored.record.clone(),
        transitioned: false,
      });
    }
    let now = Utc::now();
    stored.record.status = ExecStatus::Failed;
    stored.record.completed_at = Some(now);
    stored.record.duration_ms = stored
      .record
      .started_at
      .map(|started| (now - started).num_milliseconds().max(0) as u64);
    stored.record.error_message = Some(truncate_to_boundary(error, self.error_cap));
    Ok(TerminalMark {
      record: stored.record.clone(),
      transitioned: true,
    })
  }

  async fn get(&self, execution_id: ExecutionId) -> Result<ExecutionRecord, HistoryError> {
    self
      .inner
      .read()
      .records
      .get(&execution_id)
      .map(|stored| stored.record.clone())
      .ok_or(HistoryError::NotFound(execution_id))
  }

  async fn query(
    &self,
    filter: HistoryFilter,
    page: u64,
    per_page: u64,
  ) -> (Vec<ExecutionRecord>, u64) {
    let state = self.inner.read();
    let mut matches: Vec<&Stored> = state
      .records
      .values()
      .filter(|stored| filter.job_id.is_none_or(|job| stored.record.job_id == job))
      .filter(|stored| filter.status.is_none_or(|status| stored.record.status == status))
      .collect();
    matches.sort_by(|a, b| {
      b.record
        .scheduled_at
        .cmp(&a.record.scheduled_at)
        .then(b.seq.cmp(&a.seq))
    });

    let total = matches.len() as u64;
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let start = page.max(1).saturating_sub(1).saturating_mul(per_page) as usize;
    let items = matches
      .into_iter()
      .skip(start)
      .take(per_page as usize)
      .map(|stored| stored.record.clone())
      .collect();
    (items, total)
  }

  async fn recent(&self, job_id: Option<JobId>, limit: usize) -> Vec<ExecutionRecord> {
    if limit == 0 {
      return Vec::new();
    }
    let filter = HistoryFilter {
      job_id,
      status: None,
    };
    let (items, _) = self
      .query(filter, 1, limit.min(MAX_PER_PAGE as usize) as u64)
      .await;
    items
  }

  async fn running_count(&self, job_id: JobId) -> u32 {
    self
      .inner
      .read()
      .records
      .values()
      .filter(|stored| {
        stored.record.job_id == job_id && stored.record.status == ExecStatus::Running
      })
      .count() as u32
  }

  async fn stale_before(&self, cutoff: DateTime<Utc>) -> Vec<ExecutionRecord> {
    self
      .inner
      .read()
      .records
      .values()
      .filter(|stored| {
        let record = &stored.record;
        match record.status {
          ExecStatus::Running => record.started_at.is_some_and(|at| at < cutoff),
          ExecStatus::Pending => record.scheduled_at < cutoff,
          _ => false,
        }
      })
      .map(|stored| stored.record.clone())
      .collect()
  }

  async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> u64 {
    let mut state = self.inner.write();
    let before = state.records.len();
    state.records.retain(|_, stored| {
      !(stored.record.status.is_terminal()
        && stored.record.completed_at.is_some_and(|at| at < cutoff))
    });
    (before - state.records.len()) as u64
  }

  async fn has_records(&self, job_id: JobId) -> bool {
    self
      .inner
      .read()
      .records
      .values()
      .any(|stored| stored.record.job_id == job_id)
  }
}

/// Truncates on a char boundary so multibyte text cannot split a code
/// point.
fn truncate_to_boundary(text: &str, cap: usize) -> String {
  if text.len() <= cap {
    return text.to_string();
  }
  let mut end = cap;
  while end > 0 && !text.is_char_boundary(end) {
    end -= 1;
  }
  text[..end].to_string()
}
