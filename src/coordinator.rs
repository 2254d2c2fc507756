use crate::bridge::{DispatchBridge, RemoteTask};
use crate::command::{CoordinatorCommand, ShutdownMode};
use crate::error::{ClaimError, TriggerError};
use crate::history::ExecutionLog;
use crate::job::{ExecutionId, JobDefinition, JobId};
use crate::metrics::SchedulerMetrics;
use crate::store::{ClaimedFire, JobStore};
use crate::worker::InlineExecution;

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Internal state owned by the Coordinator task.
pub(crate) struct CoordinatorState {
  // Receivers
  pub cmd_rx: mpsc::Receiver<CoordinatorCommand>,
  pub shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  // Sender
  pub dispatch_tx: async_channel::Sender<InlineExecution>,
  // Shared collaborators
  pub store: Arc<dyn JobStore>,
  pub log: Arc<dyn ExecutionLog>,
  pub bridge: DispatchBridge,
  pub metrics: SchedulerMetrics,
  // Loop configuration
  pub tick_interval: Duration,
  pub sweep_every_ticks: u32,
  pub stale_run_timeout: chrono::Duration,
}

/// The central Coordinator task for the scheduler.
///
/// Runs a fixed tick loop: every tick it asks the store for due jobs,
/// claims them one at a time, writes a pending execution record, and hands
/// each claim either to the remote queue (through the dispatch bridge) or
/// to the inline worker pool. Failures while firing one job are contained
/// to that job; the rest of the tick proceeds.
pub(crate) struct Coordinator {
  state: CoordinatorState,
  ticks_since_sweep: u32,
}

impl Coordinator {
  pub fn new(state: CoordinatorState) -> Self {
    Self {
      state,
      ticks_since_sweep: 0,
    }
  }

  /// Runs the main event loop for the Coordinator.
  pub async fn run(&mut self) {
    info!(tick = ?self.state.tick_interval, "Coordinator started.");

    // Reconcile records a previous process left behind before the first
    // tick can claim anything new.
    self.sweep_stale(Utc::now()).await;

    let mut ticker = tokio::time::interval(self.state.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased; // Prioritize checking the shutdown signal

        // --- Shutdown Check ---
        Ok(()) = self.state.shutdown_rx.changed() => {
          if let Some(mode) = *self.state.shutdown_rx.borrow() {
            info!(?mode, "Coordinator received shutdown signal.");
            break;
          }
        }

        // --- Command Processing ---
        maybe_cmd = self.state.cmd_rx.recv() => {
          match maybe_cmd {
            Some(cmd) => self.handle_command(cmd).await,
            None => {
              // Every handle is gone; nothing can reach the scheduler
              // anymore.
              info!("Command channel closed; coordinator stopping.");
              break;
            }
          }
        }

        // --- Tick ---
        _ = ticker.tick() => {
          let now = Utc::now();
          self.state.metrics.record_tick(now);

          self.ticks_since_sweep += 1;
          if self.ticks_since_sweep >= self.state.sweep_every_ticks {
            self.ticks_since_sweep = 0;
            self.sweep_stale(now).await;
          }

          self.dispatch_due(now).await;
        }
      }
    }

    // Reject trigger requests that raced the shutdown signal so their
    // callers get an answer instead of a dropped channel.
    self.state.cmd_rx.close();
    while let Ok(cmd) = self.state.cmd_rx.try_recv() {
      Self::reject_command(cmd);
    }

    info!("Coordinator task shutting down.");
    // Closing the dispatch channel tells idle workers no more work is
    // coming.
    self.state.dispatch_tx.close();
  }

  fn reject_command(cmd: CoordinatorCommand) {
    match cmd {
      CoordinatorCommand::TriggerJob { job_id, responder } => {
        debug!(job_id = %job_id, "Rejecting trigger received during shutdown.");
        let _ = responder.send(Err(TriggerError::SchedulerShutdown));
      }
    }
  }

  /// Handles incoming commands from the scheduler handle.
  async fn handle_command(&mut self, cmd: CoordinatorCommand) {
    match cmd {
      CoordinatorCommand::TriggerJob { job_id, responder } => {
        let result = self.trigger_now(job_id).await;
        if responder.send(result).is_err() {
          warn!(job_id = %job_id, "Trigger requester went away before the response.");
        }
      }
    }
  }

  /// Claims and dispatches one out-of-schedule fire. The job's planned
  /// `next_run_at` is left exactly as it was.
  async fn trigger_now(&self, job_id: JobId) -> Result<ExecutionId, TriggerError> {
    let job = match self.state.store.claim_manual(job_id).await {
      Ok(job) => job,
      Err(ClaimError::NotFound(id)) => return Err(TriggerError::NotFound(id)),
      Err(ClaimError::Disabled(id)) => return Err(TriggerError::Disabled(id)),
      Err(ClaimError::Saturated(conflict)) => return Err(TriggerError::Conflict(conflict)),
      Err(e) => return Err(TriggerError::Internal(e.to_string())),
    };
    self
      .state
      .metrics
      .executions_claimed
      .fetch_add(1, AtomicOrdering::Relaxed);
    info!(job_id = %job_id, "Manual trigger claimed an execution slot.");

    self
      .dispatch_claimed(ClaimedFire {
        job,
        scheduled_at: Utc::now(),
      })
      .await
  }

  /// Fires everything the store reports due at `now`.
  async fn dispatch_due(&self, now: DateTime<Utc>) {
    let due = self.state.store.due_jobs(now).await;
    if due.is_empty() {
      return;
    }
    trace!(count = due.len(), "Tick found due jobs.");

    for job in due {
      self.fire_due(job, now).await;
    }
  }

  /// Claims and dispatches a single due job. Failures are logged and end
  /// with this job only.
  async fn fire_due(&self, job: JobDefinition, now: DateTime<Utc>) {
    let claimed = match self.state.store.claim_due(job.id, now).await {
      Ok(claimed) => claimed,
      Err(ClaimError::Saturated(conflict)) => {
        self
          .state
          .metrics
          .claims_rejected
          .fetch_add(1, AtomicOrdering::Relaxed);
        debug!(
          job_id = %job.id,
          max_instances = conflict.max_instances,
          "Job at its instance limit; fire stays due for a later tick."
        );
        return;
      }
      Err(ClaimError::NotDue(_)) | Err(ClaimError::Disabled(_)) | Err(ClaimError::NotFound(_)) => {
        // The job changed between listing and claiming.
        trace!(job_id = %job.id, "Job no longer claimable this tick.");
        return;
      }
      Err(ClaimError::Backend(reason)) => {
        error!(job_id = %job.id, error = %reason, "Claim failed in the store backend.");
        return;
      }
    };
    self
      .state
      .metrics
      .executions_claimed
      .fetch_add(1, AtomicOrdering::Relaxed);

    if let Err(e) = self.dispatch_claimed(claimed).await {
      // Already logged where it happened; the claim was released there too.
      debug!(job_id = %job.id, error = %e, "Due fire could not be dispatched.");
    }
  }

  /// Records and routes a claimed fire: remote queue first if the bridge
  /// accepts it, otherwise the inline worker pool.
  async fn dispatch_claimed(&self, fire: ClaimedFire) -> Result<ExecutionId, TriggerError> {
    let ClaimedFire { job, scheduled_at } = fire;

    let execution_id = match self.state.log.create_pending(job.id, scheduled_at).await {
      Ok(id) => id,
      Err(e) => {
        error!(
          job_id = %job.id,
          error = %e,
          "Could not create execution record; releasing claim."
        );
        self.state.store.release(job.id).await;
        return Err(TriggerError::Internal(e.to_string()));
      }
    };

    let remote = self
      .state
      .bridge
      .dispatch(RemoteTask {
        task_key: job.task_key.clone(),
        job_id: job.id,
        execution_id,
        job_name: job.name_en.clone(),
        scheduled_at,
      })
      .await;

    if let Some(remote_id) = remote {
      // Mark at hand-off so the record reflects the dispatch even before
      // the consumer's own mark arrives (the log keeps the first one).
      if let Err(e) = self.state.log.mark_running(execution_id).await {
        warn!(
          execution_id = %execution_id,
          error = %e,
          "Could not mark remotely dispatched execution running."
        );
      }
      self
        .state
        .metrics
        .dispatched_remote
        .fetch_add(1, AtomicOrdering::Relaxed);
      info!(
        job_id = %job.id,
        execution_id = %execution_id,
        remote_id = %remote_id,
        "Execution handed to remote queue."
      );
      return Ok(execution_id);
    }

    let job_id = job.id;
    let work = InlineExecution {
      execution_id,
      job,
      scheduled_at,
    };
    if self.state.dispatch_tx.send(work).await.is_err() {
      error!(
        job_id = %job_id,
        execution_id = %execution_id,
        "Inline dispatch channel closed; releasing claim."
      );
      if let Err(e) = self
        .state
        .log
        .mark_failed(execution_id, "worker pool unavailable at dispatch")
        .await
      {
        warn!(execution_id = %execution_id, error = %e, "Could not record dispatch failure.");
      }
      self.state.store.release(job_id).await;
      return Err(TriggerError::SchedulerShutdown);
    }
    self
      .state
      .metrics
      .dispatched_inline
      .fetch_add(1, AtomicOrdering::Relaxed);
    debug!(
      job_id = %job_id,
      execution_id = %execution_id,
      "Execution dispatched to inline pool."
    );
    Ok(execution_id)
  }

  /// Marks executions failed whose last activity predates the stale
  /// timeout, and releases the instance slots they were holding.
  ///
  /// This is what straightens out records orphaned by a crash or by fires
  /// still queued when a previous process shut down.
  async fn sweep_stale(&self, now: DateTime<Utc>) {
    let cutoff = now - self.state.stale_run_timeout;
    let stale = self.state.log.stale_before(cutoff).await;
    if stale.is_empty() {
      return;
    }
    warn!(count = stale.len(), cutoff = %cutoff, "Sweeping stale executions.");

    let note = format!(
      "Execution exceeded the stale run timeout ({}s) without completing.",
      self.state.stale_run_timeout.num_seconds()
    );
    for record in stale {
      match self.state.log.mark_failed(record.execution_id, &note).await {
        Ok(mark) if mark.transitioned => {
          self.state.store.release(record.job_id).await;
          self
            .state
            .metrics
            .executions_swept
            .fetch_add(1, AtomicOrdering::Relaxed);
          warn!(
            execution_id = %record.execution_id,
            job_id = %record.job_id,
            "Stale execution marked failed and its slot released."
          );
        }
        // Its runner finished between the stale query and this mark; the
        // runner's own terminal transition released the slot.
        Ok(_) => debug!(
          execution_id = %record.execution_id,
          "Execution completed before it could be swept."
        ),
        Err(e) => {
          warn!(
            execution_id = %record.execution_id,
            error = %e,
            "Could not mark stale execution failed."
          );
        }
      }
    }
  }
}
