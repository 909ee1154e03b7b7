use askama::Template;
use axum::Router;
use axum::extract::{Extension, Form, MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::encode;
use std::sync::Arc;
use tower_http::trace::MakeSpan;
use tracing::Span;

use crate::config::Config;
use crate::user::{User, UserService, UserServiceError};
use crate::validation::{FieldErrors, LoginInput, RegistrationInput};
use crate::web::internal_server_error_page;
use crate::web::notice::{self, Notice};

/// Name of the cookie carrying the session token.
pub const AUTH_COOKIE: &str = "auth_token";

const SESSION_HOURS: i64 = 24;

/// Represents the currently authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
}

impl CurrentUser {
    /// Creates a new CurrentUser instance.
    pub fn new(id: i32, username: String) -> Self {
        Self { id, username }
    }
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self::new(user.id(), user.username().to_string())
    }
}

/// Authentication state: the identity store and the token signing secret.
#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub jwt_secret: String,
}

impl AuthState {
    /// Creates a new AuthState from the application config.
    pub fn from_config(config: &Config, db: Arc<sea_orm::DatabaseConnection>) -> Self {
        Self {
            db,
            jwt_secret: config.jwt_secret.clone(),
        }
    }
}

/// Creates the router for registration, login and logout pages.
pub fn create_auth_router(state: Arc<AuthState>) -> Router<()> {
    Router::new()
        .route(
            "/register/",
            axum::routing::get(register_page_handler).post(register_handler),
        )
        .route(
            "/login/",
            axum::routing::get(login_page_handler).post(login_handler),
        )
        .route("/logout/", axum::routing::get(logout_handler))
        .with_state(state)
}

/// Resolves the session token from the `auth_token` cookie or an `Authorization: Bearer` header
/// and stores the `CurrentUser` extension. Never rejects a request.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    // A stale cookie must not shadow a valid bearer token.
    let claims = jar
        .get(AUTH_COOKIE)
        .and_then(|cookie| decode_jwt(cookie.value(), &state.jwt_secret).ok())
        .or_else(|| bearer.and_then(|token| decode_jwt(token, &state.jwt_secret).ok()));

    if let Some(claims) = claims {
        let current_user = CurrentUser::new(claims.sub, claims.username);
        request.extensions_mut().insert(current_user);
    }

    next.run(request).await
}

/// Redirects unauthenticated page requests to the login page.
/// Must run after `auth_user_middleware`.
pub async fn login_redirect_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none() {
        return Redirect::to("/login/").into_response();
    }

    next.run(request).await
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct Claims {
    pub exp: usize,       // Expiry time of the token
    pub iat: usize,       // Issued at time of the token
    pub sub: i32,         // User id
    pub username: String, // Username of the authenticated user
}

/// Custom error type for authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Represents an error during template rendering.
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    /// Represents an error during JWT operations.
    #[error("JWT operation failed")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl axum::response::IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("Authentication request failed: {}", self);
        internal_server_error_page().into_response()
    }
}

pub fn encode_jwt(
    user_id: i32,
    username: String,
    jwt_secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let expire = chrono::Duration::hours(SESSION_HOURS);
    let exp = (now + expire).timestamp() as usize;
    let iat = now.timestamp() as usize;
    let claims = Claims {
        exp,
        iat,
        sub: user_id,
        username,
    };
    encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

pub fn decode_jwt(token: &str, jwt_secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = jsonwebtoken::decode(
        token,
        &jsonwebtoken::DecodingKey::from_secret(jwt_secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Starts a session for `user` by adding the signed token cookie to the jar.
fn start_session(jar: CookieJar, user: &User, jwt_secret: &str) -> Result<CookieJar, AuthError> {
    let jwt_token = encode_jwt(user.id(), user.username().to_string(), jwt_secret)?;
    let cookie = Cookie::build((AUTH_COOKIE, jwt_token))
        .http_only(true)
        .secure(false) // Set to true in production with HTTPS
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(SESSION_HOURS))
        .path("/")
        .build();
    Ok(jar.add(cookie))
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub form_username: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub form_username: String,
    pub form_email: String,
    pub errors: FieldErrors,
}

fn render_login(
    form_username: &str,
    errors: FieldErrors,
    notices: Vec<Notice>,
) -> Result<Html<String>, AuthError> {
    let template = LoginTemplate {
        username: None,
        notices,
        form_username: form_username.to_string(),
        errors,
    };
    template.render().map(Html).map_err(AuthError::from)
}

fn render_register(
    form: &RegistrationInput,
    errors: FieldErrors,
    notices: Vec<Notice>,
) -> Result<Html<String>, AuthError> {
    let template = RegisterTemplate {
        username: None,
        notices,
        form_username: form.username.clone(),
        form_email: form.email.clone(),
        errors,
    };
    template.render().map(Html).map_err(AuthError::from)
}

/// Handles GET requests to display the login page.
#[tracing::instrument(skip(jar))]
pub async fn login_page_handler(
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let (jar, notice) = notice::take(jar);
    let html = render_login("", FieldErrors::new(), notice.into_iter().collect())?;
    Ok((jar, html).into_response())
}

/// Handles the login form. Valid credentials start a session and redirect home.
#[tracing::instrument(skip(state, jar, form))]
pub async fn login_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
    Form(form): Form<LoginInput>,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    if let Err(errors) = form.validate() {
        tracing::warn!("Invalid login form submission: {}", errors);
        return Ok(render_login(&form.username, errors, Vec::new())?.into_response());
    }

    let username = form.username.trim();
    let users = UserService::new(&state.db);
    match users.authenticate(username, &form.password).await {
        Ok(Some(user)) => {
            let jar = start_session(jar, &user, &state.jwt_secret)?;
            let jar = notice::flash(jar, Notice::WelcomeBack(user.username().to_string()));
            tracing::info!("User {} logged in successfully.", user.username());
            Ok((jar, Redirect::to("/")).into_response())
        }
        Ok(None) => {
            tracing::warn!("Failed login attempt for username: {}", username);
            let html = render_login(
                &form.username,
                FieldErrors::new(),
                vec![Notice::InvalidCredentials],
            )?;
            Ok(html.into_response())
        }
        Err(err) => {
            tracing::error!("Error during login for user {}: {}", username, err);
            let html = render_login(&form.username, FieldErrors::new(), vec![Notice::LoginFailed])?;
            Ok(html.into_response())
        }
    }
}

/// Ends the session and redirects home.
#[tracing::instrument(skip(jar))]
pub async fn logout_handler(
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(user)) = current_user else {
        return Redirect::to("/").into_response();
    };
    let jar = jar.remove(Cookie::build((AUTH_COOKIE, "")).path("/"));
    let jar = notice::flash(jar, Notice::LoggedOut);
    tracing::info!("User {} logged out.", user.username);
    (jar, Redirect::to("/")).into_response()
}

/// Handles GET requests to display the registration page.
#[tracing::instrument(skip(jar))]
pub async fn register_page_handler(
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let (jar, notice) = notice::take(jar);
    let html = render_register(
        &RegistrationInput::default(),
        FieldErrors::new(),
        notice.into_iter().collect(),
    )?;
    Ok((jar, html).into_response())
}

/// Handles the registration form. A valid form creates the account, logs the user in and
/// redirects home; otherwise the form is shown again with every field error.
#[tracing::instrument(skip(state, jar, form))]
pub async fn register_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
    Form(form): Form<RegistrationInput>,
) -> Result<Response, AuthError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    let users = UserService::new(&state.db);
    let username_taken = match users.username_exists(form.username()).await {
        Ok(taken) => taken,
        Err(err) => {
            tracing::error!("Error during user registration: {}", err);
            let html = render_register(&form, FieldErrors::new(), vec![Notice::RegistrationFailed])?;
            return Ok(html.into_response());
        }
    };

    let account = match form.validate(username_taken) {
        Ok(account) => account,
        Err(errors) => {
            tracing::warn!("Invalid registration form submission: {}", errors);
            return Ok(render_register(&form, errors, Vec::new())?.into_response());
        }
    };

    match users.create_user(account).await {
        Ok(user) => {
            let jar = start_session(jar, &user, &state.jwt_secret)?;
            let jar = notice::flash(jar, Notice::Registered);
            tracing::info!("User {} registered successfully.", user.username());
            Ok((jar, Redirect::to("/")).into_response())
        }
        Err(UserServiceError::DuplicateUsername(username)) => {
            tracing::warn!("Username {} was taken during registration", username);
            let mut errors = FieldErrors::new();
            errors.add("username", "This username is already taken.");
            Ok(render_register(&form, errors, Vec::new())?.into_response())
        }
        Err(err) => {
            tracing::error!("Error during user registration: {}", err);
            let html = render_register(&form, FieldErrors::new(), vec![Notice::RegistrationFailed])?;
            Ok(html.into_response())
        }
    }
}

/// Span maker that keeps credential routes out of request logs.
#[derive(Clone, Debug)]
pub struct FilteredMakeSpan;

impl<B> MakeSpan<B> for FilteredMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        let uri = request.uri();
        let method = request.method();
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str);

        if matches!(uri.path(), "/login/" | "/register/") {
            tracing::info_span!(
                "request",
                method = %method,
                uri = %uri,
                matched_path,
                sensitive_route = true,
            )
        } else {
            tracing::info_span!(
                "request",
                method = %method,
                uri = %uri,
                matched_path,
            )
        }
    }
}
