//! HTTP routes for the intelligence service.
//!
//! A thin adapter over [`InvestigationTaskService`](crate::service::InvestigationTaskService):
//! handlers parse input, call the service and map errors to `{error, code}`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use intel_common::Error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::domain::{AgentStep, InvestigationTask, TaskId, TaskStatus};
use crate::IntelState;

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<IntelState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/intelligence/tasks/industry-research",
            post(create_industry_research),
        )
        .route(
            "/api/intelligence/tasks/credibility-verification",
            post(create_credibility_verification),
        )
        .route("/api/intelligence/tasks", get(list_tasks))
        .route("/api/intelligence/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/intelligence/tasks/:id/cancel", post(cancel_task))
        .route("/api/intelligence/events", get(task_events))
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Error body returned by every handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.error_code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub running_tasks: usize,
}

#[derive(Debug, Deserialize)]
pub struct IndustryResearchRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct CredibilityVerificationRequest {
    pub stock_code: String,
    pub concept: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// Task as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub task_type: &'static str,
    pub query: String,
    pub status: &'static str,
    pub progress: u8,
    pub agent_steps: Vec<AgentStep>,
    pub result_type: Option<&'static str>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds from creation to completion
    pub duration: Option<f64>,
}

impl TaskResponse {
    pub fn from_task(task: &InvestigationTask) -> intel_common::Result<Self> {
        let result = task.result().map(|r| r.to_payload()).transpose()?;
        Ok(Self {
            task_id: task.task_id().to_string(),
            task_type: task.task_type().as_str(),
            query: task.query().to_string(),
            status: task.status().as_str(),
            progress: task.progress(),
            agent_steps: task.agent_steps().to_vec(),
            result_type: task.result().map(|r| r.result_type()),
            result,
            error_message: task.error_message().map(str::to_string),
            error_code: task.error_code().map(|c| c.as_str()),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
            completed_at: task.completed_at(),
            duration: task.duration(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<Arc<IntelState>>) -> Json<HealthResponse> {
    let running_tasks = state
        .service
        .count_by_status(TaskStatus::Running)
        .unwrap_or_default();
    Json(HealthResponse {
        status: "healthy",
        service: "intel-research",
        version: env!("CARGO_PKG_VERSION"),
        running_tasks,
    })
}

pub async fn create_industry_research(
    State(state): State<Arc<IntelState>>,
    Json(req): Json<IndustryResearchRequest>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let task_id = state.service.create_industry_research_task(&req.query).await?;
    Ok(created(task_id))
}

pub async fn create_credibility_verification(
    State(state): State<Arc<IntelState>>,
    Json(req): Json<CredibilityVerificationRequest>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let task_id = state
        .service
        .create_credibility_verification_task(&req.stock_code, &req.concept)
        .await?;
    Ok(created(task_id))
}

pub async fn get_task(
    State(state): State<Arc<IntelState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let task_id = TaskId::parse(&id)?;
    let task = state
        .service
        .get_task(&task_id)?
        .ok_or_else(|| Error::TaskNotFound(id))?;
    Ok(Json(TaskResponse::from_task(&task)?))
}

pub async fn list_tasks(
    State(state): State<Arc<IntelState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<TaskListResponse>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| Error::Validation(format!("未知的任务状态: {}", raw)))?,
        ),
    };

    let tasks = state
        .service
        .list_tasks(status, query.limit, query.offset)?
        .iter()
        .map(TaskResponse::from_task)
        .collect::<intel_common::Result<Vec<_>>>()?;
    let count = tasks.len();
    Ok(Json(TaskListResponse { tasks, count }))
}

pub async fn cancel_task(
    State(state): State<Arc<IntelState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    let task_id = TaskId::parse(&id)?;
    let task = state.service.cancel_task(&task_id).await?;
    Ok(Json(TaskResponse::from_task(&task)?))
}

pub async fn delete_task(
    State(state): State<Arc<IntelState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let task_id = TaskId::parse(&id)?;
    state.service.delete_task(&task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent stream of task events.
pub async fn task_events(
    State(state): State<Arc<IntelState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.event.as_str())
                        .data(event.payload.to_string());
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn created(task_id: TaskId) -> (StatusCode, Json<CreatedResponse>) {
    (
        StatusCode::CREATED,
        Json(CreatedResponse {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
        }),
    )
}
