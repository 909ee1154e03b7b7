use askama::Template;
use axum::Router;
use axum::http::{StatusCode, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Html;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{
    AuthState, FilteredMakeSpan, auth_user_middleware, create_auth_router,
    login_redirect_middleware,
};
use crate::config;
use crate::task::web::{TaskState, create_home_router, create_task_router};
use crate::task::{SeaOrmTaskRepository, TaskRepository};

pub mod api;
pub mod notice;

use notice::Notice;

/// Generic 500 page. Error details stay in the logs.
pub fn internal_server_error_page() -> (StatusCode, Html<String>) {
    let user_facing_error_message =
        "An unexpected error occurred while processing your request. Please try again later.";
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!(
            "<h1>Internal Server Error</h1><p>{}</p>",
            user_facing_error_message
        )),
    )
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: config::Config) -> anyhow::Result<()> {
    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    let db = Arc::new(Database::connect(&config.db_url).await?);
    migration::Migrator::up(db.as_ref(), None).await?;
    tracing::info!("Database migrations applied successfully");

    let auth_state = Arc::new(AuthState::from_config(&config, db.clone()));
    let app = create_app(db, auth_state);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Assembles every router over an already migrated database.
pub fn create_app(db: Arc<DatabaseConnection>, auth_state: Arc<AuthState>) -> Router {
    let tasks: Arc<dyn TaskRepository> = Arc::new(SeaOrmTaskRepository::new(db));
    let task_state = Arc::new(TaskState { tasks });

    let protected_routes = create_task_router(task_state.clone()).layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware))
            .layer(from_fn(login_redirect_middleware)),
    );

    let public_routes = Router::new()
        .route("/health", axum::routing::get(health_check_handler))
        .merge(create_home_router(task_state.clone()))
        .merge(create_auth_router(auth_state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(auth_state.clone(), auth_user_middleware)),
        );

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .merge(api::create_api_router(auth_state, task_state))
        .fallback(not_found_handler)
        .layer(
            ServiceBuilder::new()
                .layer(SetSensitiveRequestHeadersLayer::new([
                    header::AUTHORIZATION,
                    header::COOKIE,
                ]))
                .layer(TraceLayer::new_for_http().make_span_with(FilteredMakeSpan)),
        )
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}

async fn not_found_handler() -> (StatusCode, Html<&'static str>) {
    (StatusCode::NOT_FOUND, Html("<h1>Not Found</h1>"))
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub message: String,
}

impl NotFoundTemplate {
    pub fn new(username: Option<String>, message: &str) -> Self {
        Self {
            username,
            notices: Vec::new(),
            message: message.to_string(),
        }
    }
}
