use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{Next, from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use serde::Serialize;
use tower::ServiceBuilder;
use utoipa::{OpenApi, ToSchema};

use crate::auth::{self, AuthState, CurrentUser};
use crate::task::web::TaskState;
use crate::validation::FieldErrors;

/// Error body shared by every JSON endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Short summary of what went wrong
    pub error: String,
    /// Per-field validation messages, present only for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            errors: None,
        }
    }

    pub fn with_errors(error: &str, errors: FieldErrors) -> Self {
        Self {
            error: error.to_string(),
            errors: Some(errors),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::task::api::list_tasks_handler,
        crate::task::api::create_task_handler,
        crate::task::api::get_task_handler,
        crate::task::api::update_task_handler,
        crate::task::api::delete_task_handler,
    ),
    components(schemas(
        ErrorResponse,
        crate::task::api::TaskJson,
        crate::task::api::TasksResponse,
        crate::task::api::TaskPayload,
        crate::task::api::CreatedResponse,
        crate::task::api::MessageResponse,
    )),
    tags((name = "Tasks", description = "Owner-scoped task management"))
)]
pub struct ApiDoc;

/// Creates the `/api` routes. Task endpoints answer 401 without a session.
pub fn create_api_router(auth_state: Arc<AuthState>, task_state: Arc<TaskState>) -> Router {
    let protected_routes = crate::task::api::create_api_router(task_state)
        .layer(ServiceBuilder::new().layer(from_fn(require_auth_middleware)));
    let api_routes = Router::new()
        .route("/openapi.json", get(openapi_handler))
        .merge(protected_routes);
    Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::auth_user_middleware,
        )))
}

/// Rejects API requests that carry no valid session with 401 JSON.
/// Must run after `auth_user_middleware`.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Authentication required")),
        )
            .into_response();
    }

    next.run(request).await
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
