use crate::auth::CurrentUser;
use crate::task::web::TaskState;
use crate::task::{StorageError, Task, TaskStatus};
use crate::validation::{FieldErrors, TaskInput};
use crate::web::api::ErrorResponse;
use axum::{
    Router,
    extract::{
        Extension, Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// JSON representation of a Task for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    /// Unique identifier for the task
    id: i32,
    title: String,
    description: Option<String>,
    /// Deadline in RFC 3339, if any
    due_date: Option<DateTime<Utc>>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().map(str::to_string),
            due_date: task.due_date(),
            status: task.status(),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        }
    }
}

/// API response for listing the caller's tasks.
#[derive(Debug, Serialize, ToSchema)]
pub struct TasksResponse {
    /// Tasks, most recently created first
    tasks: Vec<TaskJson>,
}

/// Request body for creating or replacing a task.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskPayload {
    title: String,
    #[serde(default)]
    description: Option<String>,
    /// RFC 3339 or `YYYY-MM-DDTHH:MM`; values without an offset are UTC
    #[serde(default)]
    due_date: Option<String>,
    /// One of `pending`, `in_progress`, `completed`; defaults to `pending`
    #[serde(default)]
    status: Option<String>,
}

impl From<TaskPayload> for TaskInput {
    fn from(payload: TaskPayload) -> Self {
        Self {
            title: payload.title,
            description: payload.description,
            due_date: payload.due_date,
            status: payload.status,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedResponse {
    id: i32,
    message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Errors returned by the task API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid data: {0}")]
    MalformedBody(String),
    #[error("Invalid data: {0}")]
    Validation(FieldErrors),
    #[error("Task not found")]
    NotFound,
    #[error("Update failed")]
    UpdateFailed,
    #[error("Delete failed")]
    DeleteFailed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MalformedBody(reason) => {
                tracing::warn!("Rejected task payload: {}", reason);
                (StatusCode::BAD_REQUEST, ErrorResponse::new("Invalid data"))
            }
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_errors("Invalid data", errors),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, ErrorResponse::new("Task not found")),
            ApiError::UpdateFailed => (StatusCode::BAD_REQUEST, ErrorResponse::new("Update failed")),
            ApiError::DeleteFailed => (StatusCode::BAD_REQUEST, ErrorResponse::new("Delete failed")),
            ApiError::Storage(err) => {
                tracing::error!("Task storage failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn parse_payload(
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<TaskInput, ApiError> {
    match payload {
        Ok(Json(payload)) => Ok(TaskInput::from(payload)),
        Err(rejection) => Err(ApiError::MalformedBody(rejection.body_text())),
    }
}

/// An id that does not parse as a task id cannot name an existing task.
fn task_id(path: Result<Path<i32>, PathRejection>) -> Result<i32, ApiError> {
    path.map(|Path(id)| id).map_err(|_| ApiError::NotFound)
}

/// Handler for GET /api/tasks/ - Returns the caller's tasks.
#[tracing::instrument(skip(state, user), fields(user_id = user.id))]
#[utoipa::path(
    get,
    path = "/api/tasks/",
    responses(
        (status = 200, description = "Successfully retrieved tasks", body = TasksResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn list_tasks_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<TasksResponse>, ApiError> {
    let tasks = state.tasks.list_tasks(user.id).await?;
    Ok(Json(TasksResponse {
        tasks: tasks.into_iter().map(TaskJson::from).collect(),
    }))
}

/// Handler for POST /api/tasks/ - Creates a task owned by the caller.
#[tracing::instrument(skip(state, user, payload), fields(user_id = user.id))]
#[utoipa::path(
    post,
    path = "/api/tasks/",
    request_body = TaskPayload,
    responses(
        (status = 201, description = "Task created", body = CreatedResponse),
        (status = 400, description = "Invalid data", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let input = parse_payload(payload)?;
    let fields = input.validate(Utc::now()).map_err(ApiError::Validation)?;
    let id = state.tasks.create_task(user.id, fields).await?;
    tracing::info!("Task {} created", id);
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id,
            message: "Task created".to_string(),
        }),
    ))
}

/// Handler for GET /api/tasks/{id}/ - Returns one of the caller's tasks.
#[tracing::instrument(skip(state, user, path), fields(user_id = user.id))]
#[utoipa::path(
    get,
    path = "/api/tasks/{id}/",
    params(("id" = i32, Path, description = "Task id")),
    responses(
        (status = 200, description = "Successfully retrieved task", body = TaskJson),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn get_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<TaskJson>, ApiError> {
    let id = task_id(path)?;
    let task = state
        .tasks
        .get_task(user.id, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(TaskJson::from(task)))
}

/// Handler for PUT /api/tasks/{id}/ - Replaces the client-controlled fields of a task.
#[tracing::instrument(skip(state, user, path, payload), fields(user_id = user.id))]
#[utoipa::path(
    put,
    path = "/api/tasks/{id}/",
    params(("id" = i32, Path, description = "Task id")),
    request_body = TaskPayload,
    responses(
        (status = 200, description = "Task updated", body = MessageResponse),
        (status = 400, description = "Invalid data or update failed", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn update_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = task_id(path)?;
    if state.tasks.get_task(user.id, id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let input = parse_payload(payload)?;
    let fields = input.validate(Utc::now()).map_err(ApiError::Validation)?;
    if !state.tasks.update_task(user.id, id, fields).await? {
        return Err(ApiError::UpdateFailed);
    }
    tracing::info!("Task {} updated", id);
    Ok(Json(MessageResponse::new("Task updated")))
}

/// Handler for DELETE /api/tasks/{id}/ - Deletes one of the caller's tasks.
#[tracing::instrument(skip(state, user, path), fields(user_id = user.id))]
#[utoipa::path(
    delete,
    path = "/api/tasks/{id}/",
    params(("id" = i32, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task deleted", body = MessageResponse),
        (status = 400, description = "Delete failed", body = ErrorResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = task_id(path)?;
    if state.tasks.get_task(user.id, id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    if !state.tasks.delete_task(user.id, id).await? {
        return Err(ApiError::DeleteFailed);
    }
    tracing::info!("Task {} deleted", id);
    Ok(Json(MessageResponse::new("Task deleted")))
}

/// Creates and returns the tasks API router, relative to `/api`.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks/", get(list_tasks_handler).post(create_task_handler))
        .route(
            "/tasks/{id}/",
            get(get_task_handler)
                .put(update_task_handler)
                .delete(delete_task_handler),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{MockTaskRepository, TaskRepository};
    use axum::body::Body;
    use axum::http::Request;
    use sea_orm::DbErr;
    use tower::ServiceExt;

    fn app_with(mock: MockTaskRepository) -> Router {
        let tasks: Arc<dyn TaskRepository> = Arc::new(mock);
        create_api_router(Arc::new(TaskState { tasks }))
            .layer(Extension(CurrentUser::new(1, "testuser".to_string())))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn storage_failure() -> StorageError {
        StorageError::Database(DbErr::Custom("connection reset".to_string()))
    }

    #[tokio::test]
    async fn can_hide_storage_failure_behind_generic_error() {
        let mut mock = MockTaskRepository::new();
        mock.expect_list_tasks()
            .returning(|_| Err(storage_failure()));

        let response = app_with(mock)
            .oneshot(Request::builder().uri("/tasks/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        insta::assert_yaml_snapshot!(body_json(response).await, @r#"
        error: Internal server error
        "#);
    }

    #[tokio::test]
    async fn cannot_create_task_with_invalid_fields() {
        let mut mock = MockTaskRepository::new();
        mock.expect_create_task().never();

        let response = app_with(mock)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tasks/")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"title": "   ", "due_date": "2001-01-01T00:00:00Z", "status": "done"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        insta::assert_yaml_snapshot!(body_json(response).await, @r#"
        error: Invalid data
        errors:
          due_date: Due date must be in the future.
          status: Select a valid choice. done is not one of the available choices.
          title: Title is required.
        "#);
    }

    #[tokio::test]
    async fn cannot_update_task_of_another_owner() {
        let mut mock = MockTaskRepository::new();
        mock.expect_get_task()
            .withf(|owner_id, id| *owner_id == 1 && *id == 42)
            .returning(|_, _| Ok(None));
        mock.expect_update_task().never();

        let response = app_with(mock)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/tasks/42/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "Hijacked"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Task not found"})
        );
    }

    #[tokio::test]
    async fn cannot_find_task_with_unparseable_id() {
        let mut mock = MockTaskRepository::new();
        mock.expect_get_task().never();
        let app = app_with(mock);

        for uri in ["/tasks/abc/", "/tasks/3000000000/"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(
                body_json(response).await,
                serde_json::json!({"error": "Task not found"})
            );
        }
    }

    #[tokio::test]
    async fn cannot_update_missing_task_even_with_malformed_body() {
        let mut mock = MockTaskRepository::new();
        mock.expect_get_task()
            .withf(|owner_id, id| *owner_id == 1 && *id == 99)
            .returning(|_, _| Ok(None));
        mock.expect_update_task().never();

        let response = app_with(mock)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/tasks/99/")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Task not found"})
        );
    }

    #[tokio::test]
    async fn can_report_delete_that_affected_no_rows() {
        let mut mock = MockTaskRepository::new();
        mock.expect_get_task().returning(|_, _| {
            Ok(Some(Task::from(crate::entities::task::Model {
                id: 7,
                owner_id: 1,
                title: "Racing".to_string(),
                description: None,
                due_date: None,
                status: TaskStatus::Pending,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })))
        });
        mock.expect_delete_task().returning(|_, _| Ok(false));

        let response = app_with(mock)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/tasks/7/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Delete failed"})
        );
    }
}
