//! REST surface exposed with `--serve`.
//!
//! Mirrors the task service: submit an analysis, poll a task, query
//! history. Schemas follow the domain objects.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::application::task_service::TaskService;
use crate::domain::analysis::ReportType;

#[derive(Clone)]
pub struct ApiState {
    pub tasks: Arc<TaskService>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/analysis/stock/:code", post(submit_analysis))
        .route("/api/v1/analysis/tasks/:id", get(task_status))
        .route("/api/v1/analysis/tasks", get(list_tasks))
        .route("/api/v1/analysis/history", get(history))
        .with_state(state)
}

pub async fn serve(state: ApiState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.0,
            Json(serde_json::json!({ "success": false, "error": self.1 })),
        )
            .into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize, Default)]
struct SubmitBody {
    report_type: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    success: bool,
    message: String,
    code: String,
    task_id: String,
    report_type: String,
}

async fn submit_analysis(
    State(state): State<ApiState>,
    Path(code): Path<String>,
    body: Option<Json<SubmitBody>>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let code = code.trim().to_string();
    if code.is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "empty code".into()));
    }

    let report_type = body
        .and_then(|b| b.0.report_type)
        .map(|s| ReportType::parse(&s))
        .unwrap_or_default();

    let task = state.tasks.submit(&code, report_type, "api").await;
    Ok(Json(SubmitResponse {
        success: true,
        message: "分析任務已提交，將異步執行並推送通知".into(),
        code,
        task_id: task.task_id,
        report_type: task.report_type.as_str().into(),
    }))
}

async fn task_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.tasks.get_task_status(&id).await {
        Some(task) => Ok(Json(serde_json::to_value(task).unwrap_or_default())),
        None => Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("task {} not found", id),
        )),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let tasks = state.tasks.list_tasks(query.limit.unwrap_or(20)).await;
    Json(serde_json::json!({ "tasks": tasks }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    code: Option<String>,
    query_id: Option<String>,
    days: Option<u32>,
    limit: Option<u32>,
}

async fn history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state
        .tasks
        .get_analysis_history(
            query.code.as_deref(),
            query.query_id.as_deref(),
            query.days.unwrap_or(30),
            query.limit.unwrap_or(50),
        )
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "records": records })))
}
