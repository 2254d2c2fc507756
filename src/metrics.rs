use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile
/// information. Uses `Relaxed` ordering; strict inter-metric consistency
/// is not needed here.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Total sum of durations recorded, in microseconds.
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Internal state for tracking scheduler metrics using atomic counters.
///
/// Cloned and shared between the coordinator, workers, and the scheduler
/// handle. Cloning only clones the `Arc`s, so every holder sees the same
/// underlying values.
#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
  // --- Counters (monotonically increasing) ---
  /// Executions claimed by the loop or a manual trigger.
  pub executions_claimed: Arc<AtomicUsize>,
  /// Executions that finished with the handler returning `Ok`.
  pub executions_succeeded: Arc<AtomicUsize>,
  /// Executions that finished with the handler returning `Err`.
  pub executions_failed: Arc<AtomicUsize>,
  /// Executions whose handler panicked (counted separately from
  /// `executions_failed`).
  pub executions_panicked: Arc<AtomicUsize>,
  /// Stale records the orphan sweep marked failed.
  pub executions_swept: Arc<AtomicUsize>,
  /// Claims handed to the remote queue.
  pub dispatched_remote: Arc<AtomicUsize>,
  /// Claims executed by the inline worker pool (including remote
  /// fallbacks).
  pub dispatched_inline: Arc<AtomicUsize>,
  /// Claims refused because the job was at its instance limit.
  pub claims_rejected: Arc<AtomicUsize>,

  // --- Gauges (current state values) ---
  /// Workers currently executing a handler.
  pub workers_active_current: Arc<AtomicUsize>,
  /// Scheduler loop ticks completed.
  pub ticks: Arc<AtomicUsize>,

  /// Unix milliseconds of the last completed tick; 0 means never ticked.
  last_tick_unix_ms: Arc<AtomicI64>,

  // --- Histograms ---
  /// Handler execution duration, inline path.
  pub execution_duration: Arc<SimpleHistogram>,
}

impl SchedulerMetrics {
  /// Creates a new `SchedulerMetrics` instance with all counters at zero.
  pub fn new() -> Self {
    Self {
      executions_claimed: Default::default(),
      executions_succeeded: Default::default(),
      executions_failed: Default::default(),
      executions_panicked: Default::default(),
      executions_swept: Default::default(),
      dispatched_remote: Default::default(),
      dispatched_inline: Default::default(),
      claims_rejected: Default::default(),
      workers_active_current: Default::default(),
      ticks: Default::default(),
      last_tick_unix_ms: Default::default(),
      execution_duration: Arc::new(SimpleHistogram::default()),
    }
  }

  /// Stamps the loop heartbeat and bumps the tick counter.
  pub fn record_tick(&self, now: DateTime<Utc>) {
    self.ticks.fetch_add(1, Ordering::Relaxed);
    self
      .last_tick_unix_ms
      .store(now.timestamp_millis(), Ordering::Relaxed);
  }

  /// The time of the last completed loop tick, if the loop ever ran.
  pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
    let millis = self.last_tick_unix_ms.load(Ordering::Relaxed);
    if millis == 0 {
      return None;
    }
    Utc.timestamp_millis_opt(millis).single()
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;
    MetricsSnapshot {
      executions_claimed: self.executions_claimed.load(order),
      executions_succeeded: self.executions_succeeded.load(order),
      executions_failed: self.executions_failed.load(order),
      executions_panicked: self.executions_panicked.load(order),
      executions_swept: self.executions_swept.load(order),
      dispatched_remote: self.dispatched_remote.load(order),
      dispatched_inline: self.dispatched_inline.load(order),
      claims_rejected: self.claims_rejected.load(order),
      workers_active_current: self.workers_active_current.load(order),
      ticks: self.ticks.load(order),
      execution_duration_count: self.execution_duration.get_count(),
      execution_duration_sum_micros: self.execution_duration.get_sum_micros(),
    }
  }
}

impl Default for SchedulerMetrics {
  fn default() -> Self {
    Self::new()
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the scheduler's metrics at a specific point in time.
///
/// Plain data, cheap to clone and serialize for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
  pub executions_claimed: usize,
  pub executions_succeeded: usize,
  pub executions_failed: usize,
  pub executions_panicked: usize,
  pub executions_swept: usize,
  pub dispatched_remote: usize,
  pub dispatched_inline: usize,
  pub claims_rejected: usize,
  pub workers_active_current: usize,
  pub ticks: usize,
  pub execution_duration_count: usize,
  pub execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean handler execution duration in microseconds, if any completed.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.execution_duration_count == 0 {
      None
    } else {
      Some(self.execution_duration_sum_micros as f64 / self.execution_duration_count as f64)
    }
  }

  /// Mean handler execution duration, if any completed.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}

// --- Scheduler Status (Derived Snapshot) ---

/// Dashboard-facing snapshot assembled from the store, the execution log,
/// and the loop heartbeat. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
  /// Whether the loop heartbeat is recent (within two tick intervals).
  pub is_running: bool,
  /// Claimed (pending or running) instances across all jobs.
  pub active_instances: u64,
  pub total_jobs: u64,
  pub enabled_jobs: u64,
  /// Records currently in the running state.
  pub running_executions: u64,
  pub last_heartbeat: Option<DateTime<Utc>>,
}
