use crate::bridge::{DispatchBridge, RemoteQueue};
use crate::command::{CoordinatorCommand, ShutdownMode};
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::error::{BuildError, ShutdownError, StoreError, SubmitError, TriggerError};
use crate::history::{
  ExecStatus, ExecutionLog, ExecutionRecord, HistoryFilter, MemoryExecutionLog,
};
use crate::job::{ExecutionId, JobDefinition, JobId, JobPatch, JobRequest};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics, SchedulerStatus};
use crate::registry::{TaskMeta, TaskRegistry};
use crate::runtime;
use crate::store::{JobStore, MemoryJobStore};
use crate::worker::{InlineExecution, Worker};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_COMMAND_BOUND: usize = 128;
const DEFAULT_DISPATCH_BOUND: usize = 1; // Coordinator -> worker hand-off
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_STALE_RUN_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SWEEP_EVERY_TICKS: u32 = 60;

// --- Builder ---

/// Builder for configuring and starting a [`Scheduler`] instance.
///
/// # Example
///
/// ```no_run
/// use taskwheel::{JobRequest, Scheduler, TaskRegistry};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut registry = TaskRegistry::new();
/// registry.register_fn("reports.daily", "Build the daily report.", |_ctx| {
///     Box::pin(async { Ok(()) })
/// });
///
/// let scheduler = Scheduler::builder()
///     .max_workers(4)
///     .task_registry(registry)
///     .seed_job(JobRequest::from_cron("Daily report", "reports.daily", "0 6 * * *")?)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SchedulerBuilder {
  max_workers: Option<usize>,
  tick_interval: Duration,
  command_buffer_size: usize,
  dispatch_buffer_size: usize,
  stale_run_timeout: Duration,
  sweep_every_ticks: u32,
  error_message_cap: usize,
  registry: TaskRegistry,
  store: Option<Arc<dyn JobStore>>,
  log: Option<Arc<dyn ExecutionLog>>,
  remote_queue: Option<Arc<dyn RemoteQueue>>,
  remote_routes: Vec<String>,
  remote_enabled: bool,
  seed_jobs: Vec<JobRequest>,
}

impl Default for SchedulerBuilder {
  fn default() -> Self {
    Self {
      max_workers: None,
      tick_interval: DEFAULT_TICK_INTERVAL,
      command_buffer_size: DEFAULT_COMMAND_BOUND,
      dispatch_buffer_size: DEFAULT_DISPATCH_BOUND,
      stale_run_timeout: DEFAULT_STALE_RUN_TIMEOUT,
      sweep_every_ticks: DEFAULT_SWEEP_EVERY_TICKS,
      error_message_cap: crate::history::DEFAULT_ERROR_MESSAGE_CAP,
      registry: TaskRegistry::new(),
      store: None,
      log: None,
      remote_queue: None,
      remote_routes: Vec::new(),
      remote_enabled: true,
      seed_jobs: Vec::new(),
    }
  }
}

impl fmt::Debug for SchedulerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerBuilder")
      .field("max_workers", &self.max_workers)
      .field("tick_interval", &self.tick_interval)
      .field("stale_run_timeout", &self.stale_run_timeout)
      .field("remote_enabled", &self.remote_enabled)
      .field("seed_jobs", &self.seed_jobs.len())
      .finish_non_exhaustive()
  }
}

impl SchedulerBuilder {
  /// Creates a new builder with default settings.
  /// - `max_workers`: Not set (required).
  /// - `tick_interval`: 1 second.
  /// - `stale_run_timeout`: 1 hour.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the number of inline worker tasks (required, must be > 0).
  pub fn max_workers(mut self, count: usize) -> Self {
    self.max_workers = Some(count);
    self
  }

  /// Sets how often the loop looks for due jobs.
  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  /// Sets the size of the internal buffer for commands (manual triggers).
  pub fn command_buffer_size(mut self, size: usize) -> Self {
    self.command_buffer_size = size.max(1);
    self
  }

  /// Sets the size of the channel used to hand claimed fires to idle
  /// workers. The default of 1 means a tick waits until a worker picks the
  /// fire up, providing backpressure.
  pub fn dispatch_buffer_size(mut self, size: usize) -> Self {
    self.dispatch_buffer_size = size.max(1);
    self
  }

  /// Sets how long a non-terminal execution record may sit without
  /// activity before the sweep marks it failed and frees its slot.
  pub fn stale_run_timeout(mut self, timeout: Duration) -> Self {
    self.stale_run_timeout = timeout;
    self
  }

  /// Sets how many ticks pass between stale-execution sweeps.
  pub fn sweep_every_ticks(mut self, ticks: u32) -> Self {
    self.sweep_every_ticks = ticks.max(1);
    self
  }

  /// Caps the length of error messages kept by the default in-memory
  /// execution log. Ignored when [`execution_log`](Self::execution_log)
  /// supplies an external log.
  pub fn error_message_cap(mut self, cap: usize) -> Self {
    self.error_message_cap = cap.max(1);
    self
  }

  /// Installs the task registry jobs resolve their handlers from.
  ///
  /// The registry is rebuilt for every scheduler start; stored job
  /// definitions carry only the task key.
  pub fn task_registry(mut self, registry: TaskRegistry) -> Self {
    self.registry = registry;
    self
  }

  /// Overrides the job-definition store (defaults to in-memory).
  pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Overrides the execution log (defaults to in-memory).
  pub fn execution_log(mut self, log: Arc<dyn ExecutionLog>) -> Self {
    self.log = Some(log);
    self
  }

  /// Connects a remote task queue client. Only keys named via
  /// [`remote_route_keys`](Self::remote_route_keys) are offered to it.
  pub fn remote_queue(mut self, queue: Arc<dyn RemoteQueue>) -> Self {
    self.remote_queue = Some(queue);
    self
  }

  /// Replaces the set of task keys routed to the remote queue. Keys outside
  /// the set always run inline.
  pub fn remote_route_keys<S: Into<String>>(mut self, routes: impl IntoIterator<Item = S>) -> Self {
    self.remote_routes = routes.into_iter().map(Into::into).collect();
    self
  }

  /// Turns remote dispatch off without removing the queue configuration.
  /// Everything runs inline while disabled.
  pub fn remote_dispatch_enabled(mut self, enabled: bool) -> Self {
    self.remote_enabled = enabled;
    self
  }

  /// Adds a job definition inserted into the store at startup.
  pub fn seed_job(mut self, request: JobRequest) -> Self {
    self.seed_jobs.push(request);
    self
  }

  /// Adds several startup job definitions at once.
  pub fn seed_jobs(mut self, requests: impl IntoIterator<Item = JobRequest>) -> Self {
    self.seed_jobs.extend(requests);
    self
  }

  /// Builds and starts the scheduler.
  ///
  /// This validates the seed jobs against the registry, spawns the central
  /// Coordinator task and the pool of Worker tasks, and returns the handle.
  /// Must be called within a Tokio runtime.
  ///
  /// # Errors
  ///
  /// - [`BuildError::MissingOrZeroMaxWorkers`]: `max_workers` unset or zero.
  /// - [`BuildError::ZeroTickInterval`]: zero tick interval.
  /// - [`BuildError::SeedUnknownTaskKey`]: a seed job names a task key the
  ///   registry does not contain.
  /// - [`BuildError::SeedSchedule`]: a seed job's schedule produces no
  ///   future fire time.
  pub fn build(self) -> Result<Scheduler, BuildError> {
    let max_workers = self
      .max_workers
      .filter(|count| *count > 0)
      .ok_or(BuildError::MissingOrZeroMaxWorkers)?;
    if self.tick_interval.is_zero() {
      return Err(BuildError::ZeroTickInterval);
    }

    let registry = Arc::new(self.registry);

    // Resolve seeds up front so a bad definition fails the build instead
    // of surfacing later as a job that never fires.
    let now = Utc::now();
    let mut seed_definitions = Vec::with_capacity(self.seed_jobs.len());
    for request in self.seed_jobs {
      if !registry.contains(&request.task_key) {
        return Err(BuildError::SeedUnknownTaskKey {
          name: request.name_en,
          task_key: request.task_key,
        });
      }
      let name = request.name_en.clone();
      let job = JobDefinition::from_request(request, now)
        .map_err(|source| BuildError::SeedSchedule { name, source })?;
      seed_definitions.push(job);
    }

    // --- Initialize Shared State & Channels ---
    let metrics = SchedulerMetrics::new();
    let store: Arc<dyn JobStore> = self
      .store
      .unwrap_or_else(|| Arc::new(MemoryJobStore::new()));
    let error_message_cap = self.error_message_cap;
    let log: Arc<dyn ExecutionLog> = self
      .log
      .unwrap_or_else(|| Arc::new(MemoryExecutionLog::with_error_cap(error_message_cap)));
    let bridge = DispatchBridge::new(self.remote_queue, self.remote_enabled, self.remote_routes);

    let (cmd_tx, cmd_rx) = mpsc::channel::<CoordinatorCommand>(self.command_buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);
    let (dispatch_tx, dispatch_rx) =
      async_channel::bounded::<InlineExecution>(self.dispatch_buffer_size);

    let stale_run_timeout =
      chrono::Duration::from_std(self.stale_run_timeout).unwrap_or(chrono::Duration::MAX);

    // --- Seed Store ---
    // Seeds land before the handle is returned, so a caller sees them in
    // reads immediately after `build()`. The store port is async, so the
    // insertion is driven on a bridge runtime rather than the ambient one.
    if !seed_definitions.is_empty() {
      let seed_store = store.clone();
      let seeded = runtime::run_blocking(async move {
        for job in seed_definitions {
          let job_id = job.id;
          let name = job.name_en.clone();
          match seed_store.insert(job).await {
            Ok(()) => info!(job_id = %job_id, job_name = %name, "Seed job inserted."),
            Err(e) => error!(job_id = %job_id, job_name = %name, error = %e, "Could not insert seed job."),
          }
        }
      });
      if let Err(e) = seeded {
        error!(error = %e, "Seed job insertion did not run to completion.");
      }
    }

    // --- Spawn Coordinator ---
    let coordinator_state = CoordinatorState {
      cmd_rx,
      shutdown_rx: shutdown_rx.clone(),
      dispatch_tx,
      store: store.clone(),
      log: log.clone(),
      bridge: bridge.clone(),
      metrics: metrics.clone(),
      tick_interval: self.tick_interval,
      sweep_every_ticks: self.sweep_every_ticks.max(1),
      stale_run_timeout,
    };

    let coordinator_handle = Handle::current().spawn(async move {
      let mut coordinator = Coordinator::new(coordinator_state);
      coordinator.run().await;
      info!("Coordinator task finished.");
    });

    // --- Spawn Workers ---
    let mut worker_handles = Vec::with_capacity(max_workers);
    for worker_id in 0..max_workers {
      let worker_registry = registry.clone();
      let worker_store = store.clone();
      let worker_log = log.clone();
      let worker_metrics = metrics.clone();
      let worker_shutdown_rx = shutdown_rx.clone();
      let worker_dispatch_rx = dispatch_rx.clone();

      let handle = Handle::current().spawn(async move {
        let mut worker = Worker::new(
          worker_id,
          worker_registry,
          worker_store,
          worker_log,
          worker_metrics,
          worker_shutdown_rx,
          worker_dispatch_rx,
        );
        worker.run().await;
      });
      worker_handles.push(handle);
    }

    Ok(Scheduler {
      registry,
      store,
      log,
      metrics,
      bridge,
      tick_interval: self.tick_interval,
      cmd_tx,
      shutdown_tx,
      coordinator_handle: Arc::new(Mutex::new(Some(coordinator_handle))),
      worker_handles: Arc::new(Mutex::new(worker_handles)),
    })
  }
}

// --- Scheduler Handle ---

/// Handle to a running scheduler.
///
/// Job definitions, execution history, and status are read straight from
/// the shared store and log; only manual triggers travel through the
/// coordinator so they can reuse its claim-and-dispatch path.
///
/// Use [`Scheduler::builder()`] to configure and start an instance.
pub struct Scheduler {
  registry: Arc<TaskRegistry>,
  store: Arc<dyn JobStore>,
  log: Arc<dyn ExecutionLog>,
  metrics: SchedulerMetrics,
  bridge: DispatchBridge,
  tick_interval: Duration,
  cmd_tx: mpsc::Sender<CoordinatorCommand>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  coordinator_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
  worker_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("tick_interval", &self.tick_interval)
      .field("registered_tasks", &self.registry.len())
      .finish_non_exhaustive()
  }
}

impl Scheduler {
  /// Returns a builder to configure and create a `Scheduler` instance.
  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
  }

  // --- Job Definition Management ---

  /// Submits a new job, returning its unique ID.
  ///
  /// The request's task key must be registered; the first planned fire time
  /// is computed here so the job can be claimed as soon as it is due.
  ///
  /// # Errors
  ///
  /// - [`SubmitError::UnknownTaskKey`]: no handler under that key.
  /// - [`SubmitError::InvalidSchedule`]: the schedule has no future fire.
  /// - [`SubmitError::Store`]: the store rejected the insert.
  pub async fn add_job(&self, request: JobRequest) -> Result<JobId, SubmitError> {
    if !self.registry.contains(&request.task_key) {
      return Err(SubmitError::UnknownTaskKey(request.task_key));
    }
    let job = JobDefinition::from_request(request, Utc::now())?;
    let job_id = job.id;
    self.store.insert(job).await?;
    info!(job_id = %job_id, "Job definition added.");
    Ok(job_id)
  }

  /// Applies a partial update to a stored job.
  ///
  /// Changing the schedule recomputes the next planned fire from the new
  /// schedule at update time. Executions already in flight are not
  /// affected.
  pub async fn update_job(
    &self,
    job_id: JobId,
    patch: JobPatch,
  ) -> Result<JobDefinition, SubmitError> {
    let mut job = self.store.get(job_id).await?;
    if let Some(name_en) = patch.name_en {
      job.name_en = name_en;
    }
    if let Some(schedule) = patch.schedule {
      job.next_run_at = Some(schedule.next_fire_time(Utc::now())?);
      job.schedule = schedule;
    }
    if let Some(enabled) = patch.enabled {
      job.enabled = enabled;
    }
    if let Some(priority) = patch.priority {
      job.priority = priority;
    }
    if let Some(max_instances) = patch.max_instances {
      job.max_instances = max_instances.max(1);
    }
    let updated = self.store.update(job).await?;
    info!(job_id = %job_id, "Job definition updated.");
    Ok(updated)
  }

  /// Marks the job eligible for scheduling again.
  ///
  /// Fire times the job missed while disabled are still planned; the loop
  /// works through them one per tick until the schedule catches up.
  pub async fn enable_job(&self, job_id: JobId) -> Result<JobDefinition, SubmitError> {
    self.update_job(job_id, JobPatch::new().enabled(true)).await
  }

  /// Stops the job from firing. In-flight executions finish normally.
  pub async fn disable_job(&self, job_id: JobId) -> Result<JobDefinition, SubmitError> {
    self
      .update_job(job_id, JobPatch::new().enabled(false))
      .await
  }

  /// Deletes a job definition.
  ///
  /// Refused while any execution record still references the job, so
  /// history never points at a definition that no longer exists.
  pub async fn delete_job(&self, job_id: JobId) -> Result<(), SubmitError> {
    if self.log.has_records(job_id).await {
      return Err(SubmitError::HistoryReferenced(job_id));
    }
    self.store.delete(job_id).await?;
    info!(job_id = %job_id, "Job definition deleted.");
    Ok(())
  }

  // --- Queries ---

  pub async fn get_job(&self, job_id: JobId) -> Result<JobDefinition, StoreError> {
    self.store.get(job_id).await
  }

  /// Page of job definitions plus the total count. `page` is 1-based.
  pub async fn list_jobs(&self, page: u64, per_page: u64) -> (Vec<JobDefinition>, u64) {
    self.store.list(page, per_page).await
  }

  /// Execution history for one job, newest first, plus the total count.
  ///
  /// # Errors
  ///
  /// - [`StoreError::NotFound`]: no job with the given ID exists.
  pub async fn job_history(
    &self,
    job_id: JobId,
    page: u64,
    per_page: u64,
  ) -> Result<(Vec<ExecutionRecord>, u64), StoreError> {
    self.store.get(job_id).await?;
    Ok(
      self
        .log
        .query(HistoryFilter::for_job(job_id), page, per_page)
        .await,
    )
  }

  /// Metadata for every registered task function.
  pub fn task_functions(&self) -> Vec<TaskMeta> {
    self.registry.metas()
  }

  /// Whether executions of `task_key` would be offered to the remote queue.
  pub fn remote_routable(&self, task_key: &str) -> bool {
    self.bridge.routes(task_key)
  }

  /// Dashboard snapshot: job counts, running executions, and whether the
  /// loop heartbeat is recent (within two tick intervals).
  pub async fn status(&self) -> SchedulerStatus {
    let counts = self.store.counts().await;
    let (_, running_executions) = self
      .log
      .query(
        HistoryFilter {
          job_id: None,
          status: Some(ExecStatus::Running),
        },
        1,
        1,
      )
      .await;

    let last_heartbeat = self.metrics.last_heartbeat();
    let is_running = last_heartbeat.is_some_and(|beat| {
      chrono::Duration::from_std(self.tick_interval * 2)
        .map(|window| Utc::now() - beat <= window)
        .unwrap_or(true)
    });

    SchedulerStatus {
      is_running,
      active_instances: counts.active_instances,
      total_jobs: counts.total,
      enabled_jobs: counts.enabled,
      running_executions,
      last_heartbeat,
    }
  }

  /// Retrieves a snapshot of the current scheduler metrics.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  // --- Shared Collaborators ---

  pub fn registry(&self) -> Arc<TaskRegistry> {
    self.registry.clone()
  }

  pub fn job_store(&self) -> Arc<dyn JobStore> {
    self.store.clone()
  }

  pub fn execution_log(&self) -> Arc<dyn ExecutionLog> {
    self.log.clone()
  }

  // --- Manual Trigger ---

  /// Fires a job now, outside its schedule, returning the execution ID.
  ///
  /// The fire goes through the coordinator's regular claim-and-dispatch
  /// path, so instance limits apply and the planned schedule is untouched.
  ///
  /// # Errors
  ///
  /// - [`TriggerError::NotFound`] / [`TriggerError::Disabled`]
  /// - [`TriggerError::Conflict`]: the job is at its instance limit.
  /// - [`TriggerError::SchedulerShutdown`]: the scheduler is stopping.
  pub async fn trigger_job(&self, job_id: JobId) -> Result<ExecutionId, TriggerError> {
    Self::trigger_via(self.cmd_tx.clone(), job_id).await
  }

  /// Blocking variant of [`Scheduler::trigger_job`] for synchronous
  /// callers.
  ///
  /// Safe to call from threads with or without an ambient Tokio runtime;
  /// when one is present the request runs on a dedicated bridge thread so
  /// the caller never blocks the runtime itself.
  pub fn trigger_job_blocking(&self, job_id: JobId) -> Result<ExecutionId, TriggerError> {
    let cmd_tx = self.cmd_tx.clone();
    match runtime::run_blocking(async move { Self::trigger_via(cmd_tx, job_id).await }) {
      Ok(result) => result,
      Err(e) => Err(TriggerError::Internal(e.to_string())),
    }
  }

  async fn trigger_via(
    cmd_tx: mpsc::Sender<CoordinatorCommand>,
    job_id: JobId,
  ) -> Result<ExecutionId, TriggerError> {
    let (responder, response_rx) = oneshot::channel();
    cmd_tx
      .send(CoordinatorCommand::TriggerJob { job_id, responder })
      .await
      .map_err(|_| TriggerError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| TriggerError::ResponseFailed)?
  }

  // --- Shutdown ---

  /// Initiates a graceful shutdown.
  ///
  /// Signals the loop to stop claiming, then waits for workers to finish
  /// the executions they are in and drain fires already queued for
  /// dispatch. A concurrent [`shutdown_force`](Scheduler::shutdown_force)
  /// escalates the mode and cuts the drain short.
  ///
  /// Calling shutdown again after it completed is a no-op.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::Timeout`]: tasks outlived the timeout.
  /// - [`ShutdownError::TaskPanic`]: a task panicked while stopping.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self.shutdown_tx.send_replace(Some(ShutdownMode::Graceful));
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown.
  ///
  /// Stops the loop immediately and abandons in-flight executions where
  /// they stand; nothing is cancelled mid-run, the scheduler just stops
  /// waiting. Abandoned records keep their claimed slots and are reconciled
  /// by the stale sweep on the next start.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self.shutdown_tx.send_replace(Some(ShutdownMode::Force));
    self.await_shutdown(timeout).await
  }

  /// Helper to wait for task handles during shutdown.
  async fn await_shutdown(&self, timeout_duration: Option<Duration>) -> Result<(), ShutdownError> {
    let mut coordinator_handle_opt = self.coordinator_handle.lock().await.take();
    let worker_handles = {
      let mut guard = self.worker_handles.lock().await;
      std::mem::take(&mut *guard)
    };

    let mut tasks = Vec::with_capacity(1 + worker_handles.len());
    if let Some(coordinator_handle) = coordinator_handle_opt.take() {
      tasks.push(tokio::spawn(async move {
        match coordinator_handle.await {
          Ok(()) => {
            info!("Coordinator task joined.");
            Ok(())
          }
          Err(e) => {
            error!("Coordinator task panicked: {:?}", e);
            Err(ShutdownError::TaskPanic)
          }
        }
      }));
    } else {
      warn!("Coordinator handle missing during shutdown wait.");
    }

    for (worker_id, handle) in worker_handles.into_iter().enumerate() {
      tasks.push(tokio::spawn(async move {
        match handle.await {
          Ok(()) => Ok(()),
          Err(e) => {
            error!(worker_id, "Worker task panicked: {:?}", e);
            Err(ShutdownError::TaskPanic)
          }
        }
      }));
    }

    if tasks.is_empty() {
      warn!("No tasks found to await during shutdown.");
      return Ok(());
    }

    let join_all_fut = try_join_all(tasks);

    let collect = |results: Vec<Result<(), ShutdownError>>| {
      results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    };

    let result = if let Some(timeout) = timeout_duration {
      match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(Ok(results)) => collect(results),
        Ok(Err(join_err)) => {
          error!("A task panicked during shutdown: {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          Err(ShutdownError::Timeout)
        }
      }
    } else {
      match join_all_fut.await {
        Ok(results) => collect(results),
        Err(join_err) => {
          error!("A task panicked during shutdown (no timeout): {:?}", join_err);
          Err(ShutdownError::TaskPanic)
        }
      }
    };

    if result.is_ok() {
      info!("All tasks joined successfully.");
    }
    result
  }
}
