use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::HandlerError;
use crate::job::{ExecutionId, JobId};

// --- Task Handler ---

/// The future type produced by boxed task closures.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

/// Per-execution information handed to a task handler.
#[derive(Debug, Clone)]
pub struct TaskContext {
  pub job_id: JobId,
  pub execution_id: ExecutionId,
  /// The owning job's human-readable name.
  pub job_name: String,
  pub task_key: String,
  /// The fire time this execution was planned for (not when it started).
  pub scheduled_at: DateTime<Utc>,
}

/// The common capability every schedulable task implements.
///
/// Returning `Err` marks the execution failed and captures the error text
/// into its record; the scheduler loop itself is never affected. Panics are
/// caught by the worker and treated as [`HandlerError::Panicked`].
///
/// Any per-run resource a handler opens (a connection pool, a file handle)
/// must be released inside `execute` itself, before the returned future
/// resolves. Execution may happen on a private runtime that is torn down
/// right after the future completes, so nothing may outlive it.
#[async_trait]
pub trait TaskHandler: Send + Sync {
  async fn execute(&self, ctx: TaskContext) -> Result<(), HandlerError>;
}

/// Adapter implementing [`TaskHandler`] for plain boxed-future closures,
/// used by [`TaskRegistry::register_fn`] and the [`task_fn!`](crate::task_fn)
/// macro.
struct FnHandler<F> {
  func: F,
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
  F: Fn(TaskContext) -> TaskFuture + Send + Sync,
{
  async fn execute(&self, ctx: TaskContext) -> Result<(), HandlerError> {
    (self.func)(ctx).await
  }
}

// --- Task Registry ---

/// Metadata describing one registered task function, as listed by
/// `GET /scheduler/task-functions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
  pub key: String,
  pub description: String,
}

struct RegisteredTask {
  handler: Arc<dyn TaskHandler>,
  description: String,
}

/// The finite, process-wide set of known task kinds, keyed by
/// `task_key`.
///
/// Populated at startup and passed explicitly to `SchedulerBuilder`;
/// nothing in the crate reaches for a global. Job definitions referencing a
/// key absent from the registry are rejected at write time.
#[derive(Default)]
pub struct TaskRegistry {
  tasks: BTreeMap<String, RegisteredTask>,
}

impl TaskRegistry {
  pub fn new() -> Self {
    TaskRegistry {
      tasks: BTreeMap::new(),
    }
  }

  /// Registers a handler under `key`. Re-registering a key replaces the
  /// previous handler.
  pub fn register(
    &mut self,
    key: &str,
    description: &str,
    handler: Arc<dyn TaskHandler>,
  ) -> &mut Self {
    self.tasks.insert(
      key.to_string(),
      RegisteredTask {
        handler,
        description: description.to_string(),
      },
    );
    self
  }

  /// Registers a closure returning a boxed future, sparing callers the
  /// trait impl for one-off tasks.
  pub fn register_fn<F>(&mut self, key: &str, description: &str, func: F) -> &mut Self
  where
    F: Fn(TaskContext) -> TaskFuture + Send + Sync + 'static,
  {
    self.register(key, description, Arc::new(FnHandler { func }))
  }

  pub fn get(&self, key: &str) -> Option<Arc<dyn TaskHandler>> {
    self.tasks.get(key).map(|task| Arc::clone(&task.handler))
  }

  pub fn contains(&self, key: &str) -> bool {
    self.tasks.contains_key(key)
  }

  /// All registered task metadata, in key order.
  pub fn metas(&self) -> Vec<TaskMeta> {
    self
      .tasks
      .iter()
      .map(|(key, task)| TaskMeta {
        key: key.clone(),
        description: task.description.clone(),
      })
      .collect()
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

// Handlers are opaque; show only the registered keys.
impl fmt::Debug for TaskRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRegistry")
      .field("keys", &self.tasks.keys().collect::<Vec<_>>())
      .finish()
  }
}
