use axum::{
    extract::{Path, Request, State},
    middleware,
    response::Json,
    routing::get,
    Extension, Router,
};
use uuid::Uuid;

use super::{read_form_or_json, JsonBody};
use crate::errors::AppError;
use crate::middleware::{require_auth, AuthUser};
use crate::models::{
    CreateTaskRequest, DeletedTaskResponse, Task, TaskUpdateResponse, UpdateTaskRequest,
};
use crate::AppState;

/// Multipart field carrying an uploaded proof file.
const PROOF_FIELD: &str = "proof";

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/history", get(task_history))
        .route("/:id", get(get_task).put(update_task).delete(delete_task))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/// GET /api/todos - the caller's tasks, deleted ones excluded
async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Task>>, AppError> {
    Ok(Json(state.tasks.list(user.id).await?))
}

/// POST /api/todos
async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<CreateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.tasks.create(user.id, payload).await?))
}

/// GET /api/todos/history - completed tasks, most recent first
async fn task_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Task>>, AppError> {
    Ok(Json(state.tasks.history(user.id).await?))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.tasks.get(id, user.id).await?))
}

/// PUT /api/todos/:id
///
/// Accepts a JSON patch, or multipart form fields plus an optional `proof`
/// file. Completing an open task also returns the updated progress, what was
/// earned, and the respawned task for recurring ones.
async fn update_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    request: Request,
) -> Result<Json<TaskUpdateResponse>, AppError> {
    let (payload, upload) = read_form_or_json::<UpdateTaskRequest>(request, PROOF_FIELD).await?;
    let update = state.tasks.update(id, user.id, payload, upload).await?;

    let response = match update.completion {
        Some(completion) => TaskUpdateResponse {
            task: update.task,
            progress: Some(completion.progress),
            rewards: Some(completion.outcome),
            spawned_task: completion.spawned,
        },
        None => TaskUpdateResponse {
            task: update.task,
            progress: None,
            rewards: None,
            spawned_task: None,
        },
    };
    Ok(Json(response))
}

/// DELETE /api/todos/:id - soft delete
async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedTaskResponse>, AppError> {
    let id = state.tasks.delete(id, user.id).await?;
    Ok(Json(DeletedTaskResponse { id }))
}
