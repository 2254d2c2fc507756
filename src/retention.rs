use crate::error::{HandlerError, PurgeError};
use crate::history::ExecutionLog;
use crate::registry::{TaskContext, TaskHandler};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Task key the cleanup job is conventionally registered under.
pub const CLEANUP_TASK_KEY: &str = "audit_log_cleanup";

// --- Retention Policy ---

/// How long audit records in each category are kept, in days.
///
/// [`RetentionPolicy::standard`] carries the stock category table; adjust
/// individual categories with [`RetentionPolicy::with_category`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
  days_by_category: BTreeMap<String, i64>,
}

impl RetentionPolicy {
  /// An empty policy. A cleanup pass over it deletes nothing.
  pub fn new() -> Self {
    RetentionPolicy {
      days_by_category: BTreeMap::new(),
    }
  }

  /// The stock retention table.
  pub fn standard() -> Self {
    let mut policy = RetentionPolicy::new();
    for (category, days) in [
      ("authentication", 90),
      ("meal_request", 365),
      ("user", 1825),
      ("role", 1825),
      ("configuration", 1825),
      ("permission", 365),
      ("meal_request_line", 365),
      ("replication", 90),
    ] {
      policy
        .days_by_category
        .insert(category.to_string(), days);
    }
    policy
  }

  /// Sets or overrides one category's retention window.
  /// Days below 1 are raised to 1.
  pub fn with_category(mut self, category: &str, days: i64) -> Self {
    self
      .days_by_category
      .insert(category.to_string(), days.max(1));
    self
  }

  pub fn days_for(&self, category: &str) -> Option<i64> {
    self.days_by_category.get(category).copied()
  }

  /// Categories and their windows, in stable (sorted) order.
  pub fn categories(&self) -> impl Iterator<Item = (&str, i64)> {
    self
      .days_by_category
      .iter()
      .map(|(category, days)| (category.as_str(), *days))
  }

  pub fn len(&self) -> usize {
    self.days_by_category.len()
  }

  pub fn is_empty(&self) -> bool {
    self.days_by_category.is_empty()
  }
}

impl Default for RetentionPolicy {
  /// Defaults to [`RetentionPolicy::standard`].
  fn default() -> Self {
    Self::standard()
  }
}

// --- Audit Store Port ---

/// Deletion port the cleanup task drives.
///
/// Implementations decide what a category maps to (a table, a partition, a
/// label column). A failed category must not leave other categories
/// half-purged; each call stands alone.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
  /// Deletes records in `category` older than `cutoff`, returning how many
  /// were removed.
  async fn purge_older_than(
    &self,
    category: &str,
    cutoff: DateTime<Utc>,
  ) -> Result<u64, PurgeError>;
}

// --- Cleanup Report ---

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
  pub deleted_by_category: BTreeMap<String, u64>,
  pub total_deleted: u64,
  pub failed_categories: Vec<String>,
}

// --- Retention Task ---

/// The scheduled cleanup job: walks the policy table and purges each
/// category past its window.
///
/// Categories are purged independently; one failing category is logged,
/// recorded in the report, and the pass moves on. Register it under
/// [`CLEANUP_TASK_KEY`] and drive it with an interval or cron job like any
/// other task.
pub struct RetentionTask {
  store: Arc<dyn AuditLogStore>,
  policy: RetentionPolicy,
}

impl RetentionTask {
  pub fn new(store: Arc<dyn AuditLogStore>, policy: RetentionPolicy) -> Self {
    RetentionTask { store, policy }
  }

  pub fn policy(&self) -> &RetentionPolicy {
    &self.policy
  }

  /// Runs one retention pass with cutoffs computed relative to `now`.
  pub async fn run(&self, now: DateTime<Utc>) -> CleanupReport {
    let mut report = CleanupReport::default();

    for (category, days) in self.policy.categories() {
      let cutoff = now - Duration::days(days);
      match self.store.purge_older_than(category, cutoff).await {
        Ok(deleted) => {
          if deleted > 0 {
            info!(category, deleted, retention_days = days, "Purged expired audit records.");
          }
          report.total_deleted += deleted;
          report.deleted_by_category.insert(category.to_string(), deleted);
        }
        Err(e) => {
          warn!(
            category,
            error = %e,
            "Audit purge failed for one category; continuing with the rest."
          );
          report.failed_categories.push(category.to_string());
        }
      }
    }

    info!(
      total_deleted = report.total_deleted,
      failed = report.failed_categories.len(),
      "Audit retention pass finished."
    );
    report
  }
}

#[async_trait]
impl TaskHandler for RetentionTask {
  /// Category failures stay inside the report; the execution itself only
  /// fails when every category failed, which signals the store is down
  /// rather than one bad partition.
  async fn execute(&self, _ctx: TaskContext) -> Result<(), HandlerError> {
    let report = self.run(Utc::now()).await;
    if !report.failed_categories.is_empty() && report.failed_categories.len() == self.policy.len() {
      return Err(HandlerError::msg(format!(
        "all {} audit categories failed to purge",
        report.failed_categories.len()
      )));
    }
    Ok(())
  }
}

// --- Execution History Adapter ---

/// Routes the scheduler's own execution history through the retention
/// mechanism as one more category.
///
/// Only terminal records are deleted; pending and running records are the
/// stale sweep's business, not retention's.
pub struct HistoryRetentionStore {
  log: Arc<dyn ExecutionLog>,
}

impl HistoryRetentionStore {
  /// Category name to pair with this store in a [`RetentionPolicy`].
  pub const CATEGORY: &'static str = "scheduler_history";

  pub fn new(log: Arc<dyn ExecutionLog>) -> Self {
    HistoryRetentionStore { log }
  }
}

#[async_trait]
impl AuditLogStore for HistoryRetentionStore {
  async fn purge_older_than(
    &self,
    category: &str,
    cutoff: DateTime<Utc>,
  ) -> Result<u64, PurgeError> {
    if category != Self::CATEGORY {
      return Ok(0);
    }
    Ok(self.log.delete_completed_before(cutoff).await)
  }
}

// --- In-Memory Implementation ---

/// One timestamped audit event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
  pub category: String,
  pub occurred_at: DateTime<Utc>,
}

/// In-process [`AuditLogStore`] holding plain rows.
///
/// Suitable for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryAuditStore {
  rows: RwLock<Vec<AuditRow>>,
}

impl MemoryAuditStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, category: &str, occurred_at: DateTime<Utc>) {
    self.rows.write().push(AuditRow {
      category: category.to_string(),
      occurred_at,
    });
  }

  pub fn count(&self, category: &str) -> usize {
    self
      .rows
      .read()
      .iter()
      .filter(|row| row.category == category)
      .count()
  }
}

#[async_trait]
impl AuditLogStore for MemoryAuditStore {
  async fn purge_older_than(
    &self,
    category: &str,
    cutoff: DateTime<Utc>,
  ) -> Result<u64, PurgeError> {
    let mut rows = self.rows.write();
    let before = rows.len();
    rows.retain(|row| row.category != category || row.occurred_at >= cutoff);
    Ok((before - rows.len()) as u64)
  }
}
