use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, post},
};
use serde::Deserialize;

use crate::application::sync::{ListState, SyncService};
use crate::domain::store::TaskStore;
use crate::domain::task::TaskId;
use crate::http::types::ApiError;

pub struct TasksState<S: TaskStore> {
    pub sync: Arc<SyncService<S>>,
}

impl<S: TaskStore> Clone for TasksState<S> {
    fn clone(&self) -> Self {
        Self { sync: self.sync.clone() }
    }
}

pub fn router<S: TaskStore>(state: TasksState<S>) -> Router {
    Router::new()
        .route("/tasks", post(create_task::<S>).get(list_tasks::<S>))
        .route("/tasks/:id/toggle", post(toggle_task::<S>))
        .route("/tasks/:id", delete(delete_task::<S>))
        .route("/tasks/resync", post(resync::<S>))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateBody {
    title: String,
    #[serde(default)]
    detail: String,
}

async fn list_tasks<S: TaskStore>(State(state): State<TasksState<S>>) -> Json<serde_json::Value> {
    let body = match state.sync.state() {
        ListState::SignedOut => serde_json::json!({ "state": "signed_out" }),
        ListState::Unavailable { reason } => {
            serde_json::json!({ "state": "unavailable", "reason": reason })
        }
        ListState::Live(snapshot) => serde_json::json!({
            "state": "live",
            "remaining": snapshot.remaining(),
            "items": snapshot.tasks.iter().map(|t| serde_json::json!({
                "id": t.id,
                "title": t.title,
                "detail": t.detail,
                "completed": t.completed,
                "created_at": t.created_at,
            })).collect::<Vec<_>>(),
        }),
    };
    Json(body)
}

async fn create_task<S: TaskStore>(
    State(state): State<TasksState<S>>,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = state.sync.create_task(&body.title, &body.detail).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn toggle_task<S: TaskStore>(
    State(state): State<TasksState<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sync.toggle_task(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_task<S: TaskStore>(
    State(state): State<TasksState<S>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.sync.delete_task(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deliberate re-subscription after the list became unavailable.
async fn resync<S: TaskStore>(State(state): State<TasksState<S>>) -> StatusCode {
    state.sync.resync();
    StatusCode::ACCEPTED
}

fn parse_id(s: &str) -> Result<TaskId, ApiError> {
    uuid::Uuid::parse_str(s)
        .map(TaskId)
        .map_err(|_| ApiError::bad_request("invalid task id"))
}
