use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::history::ExecutionLog;
use crate::job::{ExecutionId, JobId};
use crate::registry::{TaskContext, TaskRegistry};
use crate::store::JobStore;
use crate::worker::run_handler;

// --- Remote Queue Port ---

/// Identifier a broker assigns to an accepted task.
pub type RemoteTaskId = String;

/// Envelope enqueued to the distributed worker queue.
///
/// Carries the `execution_id` so the remote worker can drive the same
/// execution record the scheduler created, and enough job context to run
/// the handler without a store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
  pub task_key: String,
  pub job_id: JobId,
  pub execution_id: ExecutionId,
  pub job_name: String,
  pub scheduled_at: DateTime<Utc>,
}

/// Client port for a distributed task queue with at-least-once delivery.
#[async_trait]
pub trait RemoteQueue: Send + Sync {
  async fn enqueue(&self, task: RemoteTask) -> Result<RemoteTaskId, QueueError>;
}

// --- Dispatch Bridge ---

/// Decides, per claimed execution, whether to hand work to the remote queue
/// or leave it to the inline worker pool.
///
/// The bridge is a best-effort accelerator: every outcome other than a
/// successful enqueue is `None`, which the caller treats as "execute
/// inline". Broker errors are logged and swallowed here; correctness never
/// depends on the remote path.
#[derive(Clone)]
pub struct DispatchBridge {
  queue: Option<Arc<dyn RemoteQueue>>,
  enabled: bool,
  routable: HashSet<String>,
}

impl DispatchBridge {
  pub fn new(
    queue: Option<Arc<dyn RemoteQueue>>,
    enabled: bool,
    routable: impl IntoIterator<Item = String>,
  ) -> Self {
    DispatchBridge {
      queue,
      enabled,
      routable: routable.into_iter().collect(),
    }
  }

  /// A bridge that always declines, for deployments without a broker.
  pub fn disabled() -> Self {
    DispatchBridge {
      queue: None,
      enabled: false,
      routable: HashSet::new(),
    }
  }

  /// Whether `task_key` would be considered for remote dispatch at all.
  pub fn routes(&self, task_key: &str) -> bool {
    self.enabled && self.queue.is_some() && self.routable.contains(task_key)
  }

  /// Attempts remote dispatch. `None` means the caller must execute inline.
  pub async fn dispatch(&self, task: RemoteTask) -> Option<RemoteTaskId> {
    if !self.enabled {
      return None;
    }
    let queue = self.queue.as_ref()?;
    if !self.routable.contains(&task.task_key) {
      // Silent degrade: unrouted keys simply run inline.
      debug!(task_key = %task.task_key, "Task key has no remote route; executing inline.");
      return None;
    }
    match queue.enqueue(task.clone()).await {
      Ok(remote_id) => {
        debug!(
          execution_id = %task.execution_id,
          remote_id = %remote_id,
          "Execution handed to remote queue."
        );
        Some(remote_id)
      }
      Err(e) => {
        warn!(
          execution_id = %task.execution_id,
          task_key = %task.task_key,
          error = %e,
          "Remote enqueue failed; executing inline."
        );
        None
      }
    }
  }
}

// --- In-Process Queue ---

/// Reference [`RemoteQueue`] backed by an in-process channel, paired with a
/// [`RemoteWorker`] that consumes it.
///
/// Stands in for a real broker in single-process deployments and tests;
/// the worker drives the same execution-record transitions a distributed
/// worker would.
pub struct InProcessQueue {
  sender: mpsc::UnboundedSender<RemoteTask>,
}

/// Receiving half of an [`InProcessQueue`], consumed by a
/// [`RemoteWorker`].
pub struct RemoteConsumer {
  receiver: mpsc::UnboundedReceiver<RemoteTask>,
}

impl InProcessQueue {
  pub fn new() -> (Arc<Self>, RemoteConsumer) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
      Arc::new(InProcessQueue { sender }),
      RemoteConsumer { receiver },
    )
  }
}

#[async_trait]
impl RemoteQueue for InProcessQueue {
  async fn enqueue(&self, task: RemoteTask) -> Result<RemoteTaskId, QueueError> {
    let remote_id = format!("inproc-{}", task.execution_id);
    self.sender.send(task).map_err(|_| QueueError::Closed)?;
    Ok(remote_id)
  }
}

// --- Remote Worker ---

/// Consumes remotely dispatched tasks and runs them against the shared
/// registry, log, and store.
///
/// Calls `mark_running` on receipt even though the dispatching side already
/// marked the record at hand-off; the log keeps the first transition, so
/// the duplicate mark is a no-op.
pub struct RemoteWorker {
  consumer: RemoteConsumer,
  registry: Arc<TaskRegistry>,
  log: Arc<dyn ExecutionLog>,
  store: Arc<dyn JobStore>,
}

impl RemoteWorker {
  pub fn new(
    consumer: RemoteConsumer,
    registry: Arc<TaskRegistry>,
    log: Arc<dyn ExecutionLog>,
    store: Arc<dyn JobStore>,
  ) -> Self {
    RemoteWorker {
      consumer,
      registry,
      log,
      store,
    }
  }

  /// Runs until the queue side is dropped. Spawn this on the runtime.
  pub async fn run(mut self) {
    info!("Remote worker started.");
    while let Some(task) = self.consumer.receiver.recv().await {
      self.process(task).await;
    }
    info!("Remote worker stopped (queue closed).");
  }

  async fn process(&self, task: RemoteTask) {
    let execution_id = task.execution_id;
    if let Err(e) = self.log.mark_running(execution_id).await {
      warn!(execution_id = %execution_id, error = %e, "Remote worker could not mark execution running.");
    }

    let outcome = match self.registry.get(&task.task_key) {
      Some(handler) => {
        let ctx = TaskContext {
          job_id: task.job_id,
          execution_id,
          job_name: task.job_name.clone(),
          task_key: task.task_key.clone(),
          scheduled_at: task.scheduled_at,
        };
        run_handler(handler, ctx).await
      }
      None => Err(crate::error::HandlerError::msg(format!(
        "no handler registered for task key '{}'",
        task.task_key
      ))),
    };

    let mark_result = match outcome {
      Ok(()) => self.log.mark_succeeded(execution_id).await,
      Err(e) => {
        warn!(
          execution_id = %execution_id,
          task_key = %task.task_key,
          error = %e,
          "Remotely dispatched execution failed."
        );
        self.log.mark_failed(execution_id, &e.to_string()).await
      }
    };
    // Only the party that performed the terminal transition frees the
    // claim slot; the sweep may have timed this run out already.
    match mark_result {
      Ok(mark) if mark.transitioned => self.store.release(task.job_id).await,
      Ok(_) => debug!(
        execution_id = %execution_id,
        "Run was settled elsewhere before it finished; leaving the slot alone."
      ),
      Err(e) => {
        warn!(execution_id = %execution_id, error = %e, "Remote worker could not record execution outcome.");
        self.store.release(task.job_id).await;
      }
    }
  }
}
