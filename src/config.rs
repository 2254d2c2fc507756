//! Declarative configuration for building a scheduler from a TOML file.
//!
//! [`SchedulerConfig`] mirrors the [`SchedulerBuilder`] knobs plus seed job
//! definitions in the same loose shape the admin API accepts (a cron
//! expression or interval components). Code-level concerns stay with the
//! builder: the task registry, store/log overrides, and the remote queue
//! client cannot come from a file and are wired by the caller.
//!
//! ```toml
//! [scheduler]
//! max_workers = 4
//! tick_interval_seconds = 1
//! stale_run_timeout_seconds = 3600
//!
//! [remote]
//! enabled = true
//! routes = ["reports.nightly"]
//!
//! [retention.categories]
//! scheduler_history = 90
//!
//! [[jobs]]
//! name = "Nightly report"
//! task_function_key = "reports.nightly"
//! cron_expression = "0 2 * * *"
//!
//! [[jobs]]
//! name = "Partner sync"
//! task_function_key = "sync.partners"
//! interval_hours = 4
//! priority = 10
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::InvalidScheduleError;
use crate::job::JobRequest;
use crate::retention::RetentionPolicy;
use crate::schedule::Schedule;
use crate::scheduler::SchedulerBuilder;

// --- Errors ---

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Could not read config file '{path}': {source}.")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Could not parse TOML config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("Could not serialize config to TOML: {0}")]
  Serialize(#[from] toml::ser::Error),
  #[error("Configured job '{name}' has an invalid schedule: {source}")]
  JobSchedule {
    name: String,
    #[source]
    source: InvalidScheduleError,
  },
}

// --- Config Model ---

/// Deployment-level scheduler settings, TOML-loadable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  pub scheduler: CoreSection,
  pub remote: RemoteSection,
  pub retention: RetentionSection,
  pub jobs: Vec<JobSection>,
}

/// `[scheduler]` table: loop and worker-pool knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSection {
  pub max_workers: usize,
  pub tick_interval_seconds: u64,
  pub stale_run_timeout_seconds: u64,
  pub sweep_every_ticks: u32,
}

impl Default for CoreSection {
  fn default() -> Self {
    CoreSection {
      max_workers: 4,
      tick_interval_seconds: 1,
      stale_run_timeout_seconds: 3_600,
      sweep_every_ticks: 60,
    }
  }
}

/// `[remote]` table: dispatch-bridge toggle and the routable task keys.
/// The queue client itself is code and comes from
/// [`SchedulerBuilder::remote_queue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
  pub enabled: bool,
  pub routes: Vec<String>,
}

impl Default for RemoteSection {
  fn default() -> Self {
    RemoteSection {
      enabled: true,
      routes: Vec::new(),
    }
  }
}

/// `[retention]` table: per-category retention windows in days.
///
/// With `use_standard_categories` (the default) the built-in table is the
/// base and `categories` entries override or extend it; otherwise only the
/// listed categories are purged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
  pub use_standard_categories: bool,
  pub categories: BTreeMap<String, i64>,
}

impl Default for RetentionSection {
  fn default() -> Self {
    RetentionSection {
      use_standard_categories: true,
      categories: BTreeMap::new(),
    }
  }
}

impl RetentionSection {
  /// Resolves the section into a [`RetentionPolicy`].
  pub fn policy(&self) -> RetentionPolicy {
    let mut policy = if self.use_standard_categories {
      RetentionPolicy::standard()
    } else {
      RetentionPolicy::new()
    };
    for (category, days) in &self.categories {
      policy = policy.with_category(category, *days);
    }
    policy
  }
}

/// One `[[jobs]]` block: a seed job in the loose schedule shape. A
/// non-blank `cron_expression` wins over interval components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSection {
  pub name: String,
  pub task_function_key: String,
  #[serde(default)]
  pub cron_expression: Option<String>,
  #[serde(default)]
  pub interval_days: Option<i64>,
  #[serde(default)]
  pub interval_hours: Option<i64>,
  #[serde(default)]
  pub interval_minutes: Option<i64>,
  #[serde(default)]
  pub interval_seconds: Option<i64>,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub priority: i32,
  #[serde(default = "default_max_instances")]
  pub max_instances: u32,
}

fn default_enabled() -> bool {
  true
}

fn default_max_instances() -> u32 {
  1
}

impl JobSection {
  fn to_request(&self) -> Result<JobRequest, ConfigError> {
    let schedule = Schedule::resolve(
      self.cron_expression.as_deref(),
      self.interval_days,
      self.interval_hours,
      self.interval_minutes,
      self.interval_seconds,
    )
    .map_err(|source| ConfigError::JobSchedule {
      name: self.name.clone(),
      source,
    })?;
    Ok(
      JobRequest::new(&self.name, &self.task_function_key, schedule)
        .with_enabled(self.enabled)
        .with_priority(self.priority)
        .with_max_instances(self.max_instances),
    )
  }
}

impl SchedulerConfig {
  /// Parses a TOML document. Schedules in `[[jobs]]` blocks are validated
  /// here so a bad file fails before anything starts.
  pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
    let config: SchedulerConfig = toml::from_str(input)?;
    for job in &config.jobs {
      job.to_request()?;
    }
    Ok(config)
  }

  /// Reads and parses a TOML config file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Serializes the config back to TOML.
  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  /// The seed job requests described by the `[[jobs]]` blocks.
  pub fn seed_requests(&self) -> Result<Vec<JobRequest>, ConfigError> {
    self.jobs.iter().map(JobSection::to_request).collect()
  }

  /// The retention policy described by the `[retention]` table.
  pub fn retention_policy(&self) -> RetentionPolicy {
    self.retention.policy()
  }
}

impl SchedulerBuilder {
  /// Applies the file-level settings from `config` on top of this builder:
  /// worker count, tick and sweep timing, the remote-dispatch toggle and
  /// route set, and the seed jobs.
  ///
  /// Call order matters only for overlapping knobs: values from `config`
  /// overwrite ones set earlier on the builder, and later builder calls
  /// overwrite the config's.
  pub fn from_config(self, config: &SchedulerConfig) -> Result<Self, ConfigError> {
    let seeds = config.seed_requests()?;
    let mut builder = self
      .max_workers(config.scheduler.max_workers)
      .tick_interval(Duration::from_secs(config.scheduler.tick_interval_seconds.max(1)))
      .stale_run_timeout(Duration::from_secs(
        config.scheduler.stale_run_timeout_seconds.max(1),
      ))
      .sweep_every_ticks(config.scheduler.sweep_every_ticks)
      .remote_dispatch_enabled(config.remote.enabled)
      .remote_route_keys(config.remote.routes.iter().cloned());
    builder = builder.seed_jobs(seeds);
    Ok(builder)
  }
}

// --- Tests ---

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"
[scheduler]
max_workers = 8
tick_interval_seconds = 2
stale_run_timeout_seconds = 900
sweep_every_ticks = 30

[remote]
enabled = false
routes = ["reports.nightly", "sync.partners"]

[retention]
use_standard_categories = false

[retention.categories]
scheduler_history = 30

[[jobs]]
name = "Nightly report"
task_function_key = "reports.nightly"
cron_expression = "0 2 * * *"

[[jobs]]
name = "Partner sync"
task_function_key = "sync.partners"
interval_hours = 4
priority = 10
max_instances = 2
"#;

  #[test]
  fn parses_full_document() {
    let config = SchedulerConfig::from_toml_str(FULL).unwrap();
    assert_eq!(config.scheduler.max_workers, 8);
    assert_eq!(config.scheduler.tick_interval_seconds, 2);
    assert!(!config.remote.enabled);
    assert_eq!(config.remote.routes.len(), 2);
    assert_eq!(config.jobs.len(), 2);
  }

  #[test]
  fn empty_document_yields_defaults() {
    let config = SchedulerConfig::from_toml_str("").unwrap();
    assert_eq!(config.scheduler.max_workers, 4);
    assert_eq!(config.scheduler.tick_interval_seconds, 1);
    assert!(config.remote.enabled);
    assert!(config.jobs.is_empty());
    assert!(config.retention.use_standard_categories);
  }

  #[test]
  fn seed_requests_resolve_schedules() {
    let config = SchedulerConfig::from_toml_str(FULL).unwrap();
    let seeds = config.seed_requests().unwrap();
    assert_eq!(seeds[0].schedule.cron_expression(), Some("0 2 * * *"));
    assert!(seeds[1].schedule.interval_spec().is_some());
    assert_eq!(seeds[1].priority, 10);
    assert_eq!(seeds[1].max_instances, 2);
  }

  #[test]
  fn job_without_schedule_fails_at_parse() {
    let doc = r#"
[[jobs]]
name = "Broken"
task_function_key = "noop"
"#;
    let error = SchedulerConfig::from_toml_str(doc).unwrap_err();
    assert!(matches!(error, ConfigError::JobSchedule { .. }));
  }

  #[test]
  fn bad_cron_names_the_job() {
    let doc = r#"
[[jobs]]
name = "Broken cron"
task_function_key = "noop"
cron_expression = "61 * * * *"
"#;
    let error = SchedulerConfig::from_toml_str(doc).unwrap_err();
    let text = error.to_string();
    assert!(text.contains("Broken cron"), "got: {text}");
  }

  #[test]
  fn custom_retention_replaces_standard_table() {
    let config = SchedulerConfig::from_toml_str(FULL).unwrap();
    let policy = config.retention_policy();
    assert_eq!(policy.len(), 1);
    assert_eq!(policy.days_for("scheduler_history"), Some(30));
    assert_eq!(policy.days_for("authentication"), None);
  }

  #[test]
  fn standard_retention_accepts_overrides() {
    let doc = r#"
[retention.categories]
authentication = 30
custom_feed = 10
"#;
    let policy = SchedulerConfig::from_toml_str(doc)
      .unwrap()
      .retention_policy();
    assert_eq!(policy.days_for("authentication"), Some(30));
    assert_eq!(policy.days_for("custom_feed"), Some(10));
    assert_eq!(policy.days_for("meal_request"), Some(365));
  }

  #[test]
  fn round_trips_through_toml() {
    let config = SchedulerConfig::from_toml_str(FULL).unwrap();
    let rendered = config.to_toml().unwrap();
    let reparsed = SchedulerConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed.scheduler.max_workers, 8);
    assert_eq!(reparsed.jobs.len(), 2);
  }
}
