use crate::error::TriggerError;
use crate::job::{ExecutionId, JobId};

use tokio::sync::oneshot;

/// Commands sent from the `Scheduler` handle to the central Coordinator task.
///
/// Reads (job listings, history, status) go straight to the shared store and
/// execution log, so the only thing that must travel through the coordinator
/// is work that changes what the loop does next.
#[derive(Debug)]
pub(crate) enum CoordinatorCommand {
  /// Manually fire a job outside its schedule.
  ///
  /// The coordinator claims an instance slot, writes the pending record,
  /// and dispatches it exactly like a due fire. The regular schedule is
  /// left untouched.
  TriggerJob {
    job_id: JobId,
    /// Channel to send the `Result<ExecutionId, TriggerError>` back.
    responder: oneshot::Sender<Result<ExecutionId, TriggerError>>,
  },
}

/// Represents the requested shutdown mode. Sent via a `watch` channel.
/// `None` indicates the scheduler is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownMode {
  /// Stop claiming, finish in-flight executions, and drain fires already
  /// queued for dispatch before exiting.
  Graceful,
  /// Stop waiting as soon as possible. In-flight and queued fires are left
  /// where they stand for the stale sweep.
  Force,
}
