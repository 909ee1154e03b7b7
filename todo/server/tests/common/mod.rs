#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response, header};
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{ActiveModelTrait, ActiveValue, ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::{postgres, testcontainers};
use todo_server::auth::{AUTH_COOKIE, AuthState, encode_jwt};
use todo_server::entities::user;

pub const JWT_SECRET: &str = "test_secret";

/// Fresh in-memory database with the real migrations applied.
pub async fn setup_db() -> anyhow::Result<Arc<DatabaseConnection>> {
    // A single pooled connection keeps every query on the same in-memory database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub async fn setup_container() -> anyhow::Result<testcontainers::ContainerAsync<postgres::Postgres>>
{
    let container = postgres::Postgres::default().start().await?;
    Ok(container)
}

/// Connects to the Postgres container and applies the real migrations.
pub async fn setup_postgres(
    container: &testcontainers::ContainerAsync<postgres::Postgres>,
) -> anyhow::Result<Arc<DatabaseConnection>> {
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let db_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let db = Database::connect(&db_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

/// Inserts a user directly, bypassing password hashing. Returns the user id.
pub async fn seed_user(db: &DatabaseConnection, username: &str) -> anyhow::Result<i32> {
    let model = user::ActiveModel {
        username: ActiveValue::Set(username.to_string()),
        email: ActiveValue::Set(None),
        password_hash: ActiveValue::Set("not-a-real-hash".to_string()),
        created_at: ActiveValue::Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub fn auth_state(db: Arc<DatabaseConnection>) -> Arc<AuthState> {
    Arc::new(AuthState {
        db,
        jwt_secret: JWT_SECRET.to_string(),
    })
}

/// Full application over `db`, with every layer the server uses.
pub fn create_test_app(db: Arc<DatabaseConnection>) -> axum::Router {
    let auth_state = auth_state(db.clone());
    todo_server::web::create_app(db, auth_state)
}

/// `Cookie` header value carrying a valid session for the user.
pub fn session_cookie(user_id: i32, username: &str) -> String {
    let token = encode_jwt(user_id, username.to_string(), JWT_SECRET).unwrap();
    format!("{}={}", AUTH_COOKIE, token)
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, cookie: Option<&str>, form: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(form.to_string())).unwrap()
}

pub fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// `Set-Cookie` values of a response, e.g. `notice=task_added; HttpOnly; ...`.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// `name=value` of the cookie named `name` as a response set it, for replaying it on the next request.
pub fn cookie_pair(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|cookie| cookie.starts_with(&format!("{name}=")))
        .and_then(|cookie| cookie.split(';').next().map(str::to_string))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
