//! HTTP admin surface for a running scheduler.
//!
//! [`scheduler_router`] builds an `axum` router with every route under a
//! `/scheduler` prefix, backed by a shared [`Scheduler`] handle. The wire
//! shapes are camelCase JSON; domain errors map onto `404` (unknown ids),
//! `422` (invalid schedule or payload), and `409` (claim conflicts and
//! history-referenced deletes). Job execution failures never surface here:
//! they are visible only through the history and status routes.

use crate::error::{InvalidScheduleError, StoreError, SubmitError, TriggerError};
use crate::history::ExecutionRecord;
use crate::job::{ExecutionId, JobDefinition, JobId, JobPatch, JobRequest};
use crate::metrics::SchedulerStatus;
use crate::schedule::Schedule;
use crate::scheduler::Scheduler;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

// --- State & Router ---

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct ApiState {
  scheduler: Arc<Scheduler>,
}

impl ApiState {
  pub fn new(scheduler: Arc<Scheduler>) -> Self {
    ApiState { scheduler }
  }
}

/// Builds the admin router.
///
/// Routes:
/// - `GET    /scheduler/jobs` (paginated), `POST /scheduler/jobs`
/// - `GET    /scheduler/jobs/{id}`, `PATCH`, `DELETE`
/// - `GET    /scheduler/jobs/{id}/history` (paginated, newest first)
/// - `POST   /scheduler/jobs/{id}/trigger`
/// - `GET    /scheduler/status`
/// - `GET    /scheduler/task-functions`
pub fn scheduler_router(state: ApiState) -> Router {
  let routes = Router::new()
    .route("/jobs", get(list_jobs).post(create_job))
    .route(
      "/jobs/{id}",
      get(get_job).patch(update_job).delete(delete_job),
    )
    .route("/jobs/{id}/history", get(job_history))
    .route("/jobs/{id}/trigger", post(trigger_job))
    .route("/status", get(status))
    .route("/task-functions", get(task_functions));
  Router::new().nest("/scheduler", routes).with_state(state)
}

// --- Wire Shapes ---

/// A job definition as it travels over the wire.
///
/// Exactly one of `cronExpression` or the `interval*` fields is present,
/// mirroring the schedule sum type. `isActive` reflects live executions and
/// is derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
  pub id: JobId,
  pub name_en: String,
  pub task_function_key: String,
  pub is_enabled: bool,
  pub is_active: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cron_expression: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interval_days: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interval_hours: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interval_minutes: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub interval_seconds: Option<i64>,
  pub last_run_at: Option<DateTime<Utc>>,
  pub next_run_at: Option<DateTime<Utc>>,
  pub priority: i32,
  pub max_instances: u32,
}

impl JobPayload {
  pub fn from_definition(job: &JobDefinition) -> Self {
    let interval = job.schedule.interval_spec();
    JobPayload {
      id: job.id,
      name_en: job.name_en.clone(),
      task_function_key: job.task_key.clone(),
      is_enabled: job.enabled,
      is_active: job.is_active(),
      cron_expression: job.schedule.cron_expression().map(str::to_owned),
      interval_days: interval.map(|spec| spec.days),
      interval_hours: interval.map(|spec| spec.hours),
      interval_minutes: interval.map(|spec| spec.minutes),
      interval_seconds: interval.map(|spec| spec.seconds),
      last_run_at: job.last_run_at,
      next_run_at: job.next_run_at,
      priority: job.priority,
      max_instances: job.max_instances,
    }
  }
}

/// An execution record as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
  pub execution_id: ExecutionId,
  pub job_id: JobId,
  pub status_name: String,
  pub scheduled_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<u64>,
  pub error_message: Option<String>,
}

impl ExecutionPayload {
  pub fn from_record(record: &ExecutionRecord) -> Self {
    ExecutionPayload {
      execution_id: record.execution_id,
      job_id: record.job_id,
      status_name: record.status.wire_name().to_owned(),
      scheduled_at: record.scheduled_at,
      started_at: record.started_at,
      completed_at: record.completed_at,
      duration_ms: record.duration_ms,
      error_message: record.error_message.clone(),
    }
  }
}

/// One registered task function, with whether the dispatch bridge would
/// consider it for remote execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFunctionPayload {
  pub key: String,
  pub description: String,
  pub remote_routable: bool,
}

/// Page envelope shared by the list routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
  pub items: Vec<T>,
  pub total: u64,
  pub page: u64,
  pub per_page: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
  #[serde(default = "default_page")]
  pub page: u64,
  #[serde(default = "default_per_page")]
  pub per_page: u64,
}

fn default_page() -> u64 {
  1
}

fn default_per_page() -> u64 {
  20
}

/// Body for `POST /scheduler/jobs`. Either a cron expression or at least
/// one interval component must be given; a non-blank cron expression wins
/// when both appear.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobPayload {
  pub name_en: String,
  pub task_function_key: String,
  pub cron_expression: Option<String>,
  pub interval_days: Option<i64>,
  pub interval_hours: Option<i64>,
  pub interval_minutes: Option<i64>,
  pub interval_seconds: Option<i64>,
  #[serde(default = "default_enabled")]
  pub is_enabled: bool,
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

impl CreateJobPayload {
  fn into_request(self) -> Result<JobRequest, InvalidScheduleError> {
    let schedule = Schedule::resolve(
      self.cron_expression.as_deref(),
      self.interval_days,
      self.interval_hours,
      self.interval_minutes,
      self.interval_seconds,
    )?;
    Ok(
      JobRequest::new(&self.name_en, &self.task_function_key, schedule)
        .with_enabled(self.is_enabled)
        .with_priority(self.priority)
        .with_max_instances(self.max_instances),
    )
  }
}

/// Body for `PATCH /scheduler/jobs/{id}`. Absent fields are left alone;
/// providing any schedule field replaces the whole schedule and recomputes
/// the next planned fire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobPayload {
  pub name_en: Option<String>,
  pub cron_expression: Option<String>,
  pub interval_days: Option<i64>,
  pub interval_hours: Option<i64>,
  pub interval_minutes: Option<i64>,
  pub interval_seconds: Option<i64>,
  pub is_enabled: Option<bool>,
  pub priority: Option<i32>,
  pub max_instances: Option<u32>,
}

impl UpdateJobPayload {
  fn touches_schedule(&self) -> bool {
    self.cron_expression.is_some()
      || self.interval_days.is_some()
      || self.interval_hours.is_some()
      || self.interval_minutes.is_some()
      || self.interval_seconds.is_some()
  }

  fn into_patch(self) -> Result<JobPatch, InvalidScheduleError> {
    let wants_schedule = self.touches_schedule();
    let mut patch = JobPatch::new();
    if let Some(name_en) = self.name_en {
      patch = patch.name_en(&name_en);
    }
    if wants_schedule {
      patch = patch.schedule(Schedule::resolve(
        self.cron_expression.as_deref(),
        self.interval_days,
        self.interval_hours,
        self.interval_minutes,
        self.interval_seconds,
      )?);
    }
    if let Some(enabled) = self.is_enabled {
      patch = patch.enabled(enabled);
    }
    if let Some(priority) = self.priority {
      patch = patch.priority(priority);
    }
    if let Some(max_instances) = self.max_instances {
      patch = patch.max_instances(max_instances);
    }
    Ok(patch)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
  pub execution_id: ExecutionId,
}

// --- Errors ---

/// Wraps the scheduler handle's error types for HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error(transparent)]
  Submit(#[from] SubmitError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Trigger(#[from] TriggerError),
}

impl ApiError {
  fn classify(&self) -> (StatusCode, &'static str) {
    match self {
      ApiError::Submit(SubmitError::UnknownTaskKey(_)) => {
        (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_TASK_KEY")
      }
      ApiError::Submit(SubmitError::InvalidSchedule(_)) => {
        (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_SCHEDULE")
      }
      ApiError::Submit(SubmitError::HistoryReferenced(_)) => {
        (StatusCode::CONFLICT, "HISTORY_REFERENCED")
      }
      ApiError::Submit(SubmitError::Store(e)) => classify_store(e),
      ApiError::Store(e) => classify_store(e),
      ApiError::Trigger(TriggerError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
      ApiError::Trigger(TriggerError::Disabled(_)) => {
        (StatusCode::UNPROCESSABLE_ENTITY, "JOB_DISABLED")
      }
      ApiError::Trigger(TriggerError::Conflict(_)) => (StatusCode::CONFLICT, "CLAIM_CONFLICT"),
      ApiError::Trigger(TriggerError::SchedulerShutdown) => {
        (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
      }
      ApiError::Trigger(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
  }
}

fn classify_store(error: &StoreError) -> (StatusCode, &'static str) {
  match error {
    StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
    StoreError::AlreadyExists(_) => (StatusCode::CONFLICT, "CONFLICT"),
    StoreError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind) = self.classify();
    let message = self.to_string();
    if status.is_server_error() {
      error!(%status, kind, error = %message, "Admin API request failed.");
    } else {
      debug!(%status, kind, error = %message, "Admin API request rejected.");
    }
    let body = Json(json!({ "error": kind, "message": message }));
    (status, body).into_response()
  }
}

type ApiResult<T> = Result<T, ApiError>;

// --- Handlers ---

async fn list_jobs(
  State(state): State<ApiState>,
  Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<JobPayload>>> {
  let (jobs, total) = state
    .scheduler
    .list_jobs(params.page, params.per_page)
    .await;
  Ok(Json(Paginated {
    items: jobs.iter().map(JobPayload::from_definition).collect(),
    total,
    page: params.page,
    per_page: params.per_page,
  }))
}

async fn create_job(
  State(state): State<ApiState>,
  Json(payload): Json<CreateJobPayload>,
) -> ApiResult<(StatusCode, Json<JobPayload>)> {
  let request = payload.into_request().map_err(SubmitError::from)?;
  let job_id = state.scheduler.add_job(request).await?;
  let job = state.scheduler.get_job(job_id).await?;
  Ok((StatusCode::CREATED, Json(JobPayload::from_definition(&job))))
}

async fn get_job(
  State(state): State<ApiState>,
  Path(id): Path<JobId>,
) -> ApiResult<Json<JobPayload>> {
  let job = state.scheduler.get_job(id).await?;
  Ok(Json(JobPayload::from_definition(&job)))
}

async fn update_job(
  State(state): State<ApiState>,
  Path(id): Path<JobId>,
  Json(payload): Json<UpdateJobPayload>,
) -> ApiResult<Json<JobPayload>> {
  let patch = payload.into_patch().map_err(SubmitError::from)?;
  let job = state.scheduler.update_job(id, patch).await?;
  Ok(Json(JobPayload::from_definition(&job)))
}

async fn delete_job(State(state): State<ApiState>, Path(id): Path<JobId>) -> ApiResult<StatusCode> {
  state.scheduler.delete_job(id).await?;
  Ok(StatusCode::NO_CONTENT)
}

async fn job_history(
  State(state): State<ApiState>,
  Path(id): Path<JobId>,
  Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<ExecutionPayload>>> {
  let (records, total) = state
    .scheduler
    .job_history(id, params.page, params.per_page)
    .await?;
  Ok(Json(Paginated {
    items: records.iter().map(ExecutionPayload::from_record).collect(),
    total,
    page: params.page,
    per_page: params.per_page,
  }))
}

async fn trigger_job(
  State(state): State<ApiState>,
  Path(id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
  let execution_id = state.scheduler.trigger_job(id).await?;
  Ok((StatusCode::ACCEPTED, Json(TriggerResponse { execution_id })))
}

async fn status(State(state): State<ApiState>) -> Json<SchedulerStatus> {
  Json(state.scheduler.status().await)
}

async fn task_functions(State(state): State<ApiState>) -> Json<Vec<TaskFunctionPayload>> {
  let payloads = state
    .scheduler
    .task_functions()
    .into_iter()
    .map(|meta| TaskFunctionPayload {
      remote_routable: state.scheduler.remote_routable(&meta.key),
      key: meta.key,
      description: meta.description,
    })
    .collect();
  Json(payloads)
}

// --- Tests ---

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ClaimConflictError;

  fn cron_job() -> JobDefinition {
    let request = JobRequest::new(
      "Nightly report",
      "reports.nightly",
      Schedule::cron("0 2 * * *").unwrap(),
    );
    JobDefinition::from_request(request, Utc::now()).unwrap()
  }

  fn interval_job() -> JobDefinition {
    let request = JobRequest::new(
      "Sync",
      "sync.partners",
      Schedule::interval(0, 4, 30, 0).unwrap(),
    );
    JobDefinition::from_request(request, Utc::now()).unwrap()
  }

  #[test]
  fn job_payload_uses_camel_case_keys() {
    let json = serde_json::to_value(JobPayload::from_definition(&cron_job())).unwrap();
    for key in [
      "id",
      "nameEn",
      "taskFunctionKey",
      "isEnabled",
      "isActive",
      "nextRunAt",
      "priority",
      "maxInstances",
    ] {
      assert!(json.get(key).is_some(), "missing key {key}");
    }
  }

  #[test]
  fn cron_job_payload_omits_interval_fields() {
    let json = serde_json::to_value(JobPayload::from_definition(&cron_job())).unwrap();
    assert_eq!(
      json.get("cronExpression").and_then(|v| v.as_str()),
      Some("0 2 * * *")
    );
    assert!(json.get("intervalDays").is_none());
    assert!(json.get("intervalMinutes").is_none());
  }

  #[test]
  fn interval_job_payload_carries_components_and_no_cron() {
    let json = serde_json::to_value(JobPayload::from_definition(&interval_job())).unwrap();
    assert!(json.get("cronExpression").is_none());
    assert_eq!(json.get("intervalHours").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(
      json.get("intervalMinutes").and_then(|v| v.as_i64()),
      Some(30)
    );
    assert_eq!(json.get("intervalSeconds").and_then(|v| v.as_i64()), Some(0));
  }

  #[test]
  fn create_payload_prefers_cron_over_interval() {
    let payload: CreateJobPayload = serde_json::from_value(json!({
      "nameEn": "Mixed",
      "taskFunctionKey": "reports.nightly",
      "cronExpression": "*/5 * * * *",
      "intervalMinutes": 10,
    }))
    .unwrap();
    let request = payload.into_request().unwrap();
    assert_eq!(request.schedule.cron_expression(), Some("*/5 * * * *"));
  }

  #[test]
  fn create_payload_without_schedule_is_rejected() {
    let payload: CreateJobPayload = serde_json::from_value(json!({
      "nameEn": "Empty",
      "taskFunctionKey": "reports.nightly",
    }))
    .unwrap();
    assert!(matches!(
      payload.into_request(),
      Err(InvalidScheduleError::Missing)
    ));
  }

  #[test]
  fn update_payload_without_schedule_fields_leaves_schedule_alone() {
    let payload = UpdateJobPayload {
      is_enabled: Some(false),
      ..UpdateJobPayload::default()
    };
    let patch = payload.into_patch().unwrap();
    assert!(patch.schedule.is_none());
    assert_eq!(patch.enabled, Some(false));
  }

  #[test]
  fn not_found_maps_to_404() {
    let response = ApiError::from(StoreError::NotFound(JobId::new_v4())).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }

  #[test]
  fn invalid_schedule_maps_to_422() {
    let response =
      ApiError::from(SubmitError::from(InvalidScheduleError::Missing)).into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[test]
  fn claim_conflict_maps_to_409() {
    let conflict = ClaimConflictError {
      job_id: JobId::new_v4(),
      max_instances: 1,
    };
    let response = ApiError::from(TriggerError::from(conflict)).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
  }

  #[test]
  fn history_referenced_delete_maps_to_409() {
    let response =
      ApiError::from(SubmitError::HistoryReferenced(JobId::new_v4())).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
  }
}
