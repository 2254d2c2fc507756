use crate::command::ShutdownMode;
use crate::error::HandlerError;
use crate::history::ExecutionLog;
use crate::job::{ExecutionId, JobDefinition, WorkerId};
use crate::metrics::SchedulerMetrics;
use crate::registry::{TaskContext, TaskHandler, TaskRegistry};
use crate::runtime::panic_message;
use crate::store::JobStore;

use std::ops::ControlFlow;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use async_channel::Receiver;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

// --- Shared Handler Execution ---

/// Runs a handler on its own task so a panic is confined to that task and
/// surfaces as a [`HandlerError::Panicked`] instead of tearing down the
/// caller.
///
/// Shared by the inline worker pool and the remote-task consumer so both
/// paths fail the same way.
pub(crate) async fn run_handler(
  handler: Arc<dyn TaskHandler>,
  ctx: TaskContext,
) -> Result<(), HandlerError> {
  let task = tokio::spawn(async move { handler.execute(ctx).await });
  match task.await {
    Ok(result) => result,
    Err(join_error) => {
      if join_error.is_panic() {
        let message = panic_message(join_error.into_panic().as_ref());
        Err(HandlerError::Panicked(message))
      } else {
        // Cancelled mid-flight (runtime teardown). Record it as a failure
        // so the execution record does not stay running forever.
        Err(HandlerError::msg(
          "execution task was cancelled before completion",
        ))
      }
    }
  }
}

// --- Inline Dispatch Message ---

/// A claimed fire travelling from the coordinator to the inline pool.
///
/// Carries a snapshot of the definition taken at claim time; later edits to
/// the job do not affect an execution already in flight.
#[derive(Debug, Clone)]
pub(crate) struct InlineExecution {
  pub execution_id: ExecutionId,
  pub job: JobDefinition,
  pub scheduled_at: DateTime<Utc>,
}

// --- Worker ---

/// A worker task executing claimed fires from the shared inline channel.
///
/// Workers own the full lifecycle of an execution they pick up: the
/// running mark, the handler call (with panic capture), the terminal mark,
/// and the release of the job's instance slot. Nothing a handler does can
/// propagate past `run_handler`, so one bad job never stalls the pool.
pub(crate) struct Worker {
  id: WorkerId,
  registry: Arc<TaskRegistry>,
  store: Arc<dyn JobStore>,
  log: Arc<dyn ExecutionLog>,
  metrics: SchedulerMetrics,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  execution_rx: Receiver<InlineExecution>,
}

impl Worker {
  pub fn new(
    id: WorkerId,
    registry: Arc<TaskRegistry>,
    store: Arc<dyn JobStore>,
    log: Arc<dyn ExecutionLog>,
    metrics: SchedulerMetrics,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    execution_rx: Receiver<InlineExecution>,
  ) -> Self {
    Self {
      id,
      registry,
      store,
      log,
      metrics,
      shutdown_rx,
      execution_rx,
    }
  }

  /// Runs the main loop for the worker task.
  /// Waits for dispatched executions or shutdown signals.
  ///
  /// On graceful shutdown the worker finishes the execution it is in,
  /// drains fires already queued in the dispatch channel, and exits once
  /// the coordinator has closed it. On force shutdown (including a force
  /// escalation during the drain) it stops waiting immediately; in-flight
  /// and queued fires keep their records and claimed slots, and the
  /// stale-execution sweep reconciles them on the next scheduler start.
  pub async fn run(&mut self) {
    info!(worker_id = self.id, "Worker started. Waiting for executions...");

    loop {
      match self.current_mode() {
        Some(ShutdownMode::Force) => break,
        Some(ShutdownMode::Graceful) => {
          info!(worker_id = self.id, "Graceful shutdown: draining queued executions.");
          self.drain_remaining().await;
          break;
        }
        None => {}
      }

      tokio::select! {
        biased; // Prioritize checking the shutdown signal

        Ok(()) = self.shutdown_rx.changed() => {
          if let Some(mode) = self.current_mode() {
            info!(worker_id = self.id, ?mode, "Worker received shutdown signal.");
            // The loop top decides between draining and stopping.
          }
        }

        result = self.execution_rx.recv() => {
          match result {
            Ok(work) => {
              if self.execute_or_abandon(work).await.is_break() {
                break;
              }
            }
            Err(_) => {
              // Channel closed, the coordinator is gone.
              if self.current_mode().is_some() {
                info!(worker_id = self.id, "Dispatch channel closed during shutdown. Worker exiting.");
              } else {
                error!(worker_id = self.id, "Dispatch channel closed unexpectedly. Worker exiting.");
              }
              break;
            }
          }
        }
      }
    }

    info!(worker_id = self.id, "Worker task shutting down.");
  }

  /// Reads the shutdown signal without blocking.
  fn current_mode(&self) -> Option<ShutdownMode> {
    *self.shutdown_rx.borrow()
  }

  /// Graceful-shutdown tail: keeps executing queued fires until the
  /// coordinator closes the channel and it runs dry. A force escalation
  /// cuts the drain short.
  async fn drain_remaining(&self) {
    let mut force_rx = self.shutdown_rx.clone();
    loop {
      let work = tokio::select! {
        biased;

        _ = force_rx.wait_for(|mode| matches!(mode, Some(ShutdownMode::Force))) => {
          info!(worker_id = self.id, "Force escalation ended the graceful drain.");
          return;
        }

        result = self.execution_rx.recv() => match result {
          Ok(work) => work,
          Err(_) => {
            info!(worker_id = self.id, "Dispatch channel drained. Worker exiting.");
            return;
          }
        },
      };
      if Self::race_force(&mut force_rx, self.execute(work)).await.is_break() {
        warn!(
          worker_id = self.id,
          "Force shutdown: abandoning the in-flight execution to the stale sweep."
        );
        return;
      }
    }
  }

  /// Runs one execution, abandoning it if the signal escalates to force
  /// mid-run.
  async fn execute_or_abandon(&self, work: InlineExecution) -> ControlFlow<()> {
    let mut force_rx = self.shutdown_rx.clone();
    let flow = Self::race_force(&mut force_rx, self.execute(work)).await;
    if flow.is_break() {
      warn!(
        worker_id = self.id,
        "Force shutdown: abandoning the in-flight execution to the stale sweep."
      );
    }
    flow
  }

  /// Resolves to `Break` if force shutdown wins the race against `fut`.
  async fn race_force(
    force_rx: &mut watch::Receiver<Option<ShutdownMode>>,
    fut: impl std::future::Future<Output = ()>,
  ) -> ControlFlow<()> {
    tokio::select! {
      () = fut => ControlFlow::Continue(()),
      _ = force_rx.wait_for(|mode| matches!(mode, Some(ShutdownMode::Force))) => {
        ControlFlow::Break(())
      }
    }
  }

  async fn execute(&self, work: InlineExecution) {
    let active = self
      .metrics
      .workers_active_current
      .fetch_add(1, AtomicOrdering::Relaxed)
      + 1;
    debug!(
      worker_id = self.id,
      active,
      execution_id = %work.execution_id,
      "Worker picked up execution."
    );

    let span = tracing::span!(
      tracing::Level::INFO,
      "job_exec",
      worker_id = self.id,
      job_id = %work.job.id,
      execution_id = %work.execution_id,
      job_name = work.job.name_en.as_str(),
    );
    self.execute_inner(work).instrument(span).await;

    let previous = self
      .metrics
      .workers_active_current
      .fetch_sub(1, AtomicOrdering::Relaxed);
    debug!(
      worker_id = self.id,
      active = previous.saturating_sub(1),
      "Worker finished execution."
    );
  }

  /// Marks, runs, records, and releases one execution.
  async fn execute_inner(&self, work: InlineExecution) {
    let InlineExecution {
      execution_id,
      job,
      scheduled_at,
    } = work;

    // First transition wins in the log, so this is safe even if the record
    // was already marked (the remote hand-off marks eagerly).
    if let Err(e) = self.log.mark_running(execution_id).await {
      warn!(error = %e, "Could not mark execution running.");
    }

    let started = Instant::now();
    let outcome = match self.registry.get(&job.task_key) {
      Some(handler) => {
        let ctx = TaskContext {
          job_id: job.id,
          execution_id,
          job_name: job.name_en.clone(),
          task_key: job.task_key.clone(),
          scheduled_at,
        };
        run_handler(handler, ctx).await
      }
      None => Err(HandlerError::msg(format!(
        "no handler registered for task key '{}'",
        job.task_key
      ))),
    };
    let duration = started.elapsed();
    self.metrics.execution_duration.record(duration);

    let marked = match outcome {
      Ok(()) => {
        self
          .metrics
          .executions_succeeded
          .fetch_add(1, AtomicOrdering::Relaxed);
        info!(
          duration_ms = duration.as_millis() as u64,
          "Execution succeeded."
        );
        match self.log.mark_succeeded(execution_id).await {
          Ok(mark) => Some(mark),
          Err(e) => {
            warn!(error = %e, "Could not record execution success.");
            None
          }
        }
      }
      Err(err) => {
        if matches!(err, HandlerError::Panicked(_)) {
          self
            .metrics
            .executions_panicked
            .fetch_add(1, AtomicOrdering::Relaxed);
          error!(
            duration_ms = duration.as_millis() as u64,
            error = %err,
            "Execution panicked."
          );
        } else {
          self
            .metrics
            .executions_failed
            .fetch_add(1, AtomicOrdering::Relaxed);
          warn!(
            duration_ms = duration.as_millis() as u64,
            error = %err,
            "Execution failed."
          );
        }
        match self.log.mark_failed(execution_id, &err.to_string()).await {
          Ok(mark) => Some(mark),
          Err(e) => {
            warn!(error = %e, "Could not record execution failure.");
            None
          }
        }
      }
    };

    // The slot is released by whoever performed the terminal transition.
    // If the sweep already timed this execution out, it released the slot
    // then; releasing again here would hand a saturated job a second one.
    match marked {
      Some(mark) if mark.transitioned => self.store.release(job.id).await,
      Some(_) => debug!(
        execution_id = %execution_id,
        "Run was settled elsewhere before it finished; leaving the slot alone."
      ),
      None => self.store.release(job.id).await,
    }
  }
}
