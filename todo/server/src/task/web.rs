use crate::auth::CurrentUser;
use crate::task::{StorageError, Task, TaskRepository, TaskStatus};
use crate::validation::{FieldErrors, TaskInput};
use crate::web::notice::{self, Notice};
use crate::web::{NotFoundTemplate, internal_server_error_page};
use askama::Template;
use axum::extract::rejection::{FormRejection, PathRejection};
use axum::extract::{Extension, Form, Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Router, routing::get};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use std::sync::Arc;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";
const INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Clone)]
pub struct TaskState {
    pub tasks: Arc<dyn TaskRepository>,
}

/// Custom error type for task page handlers.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("Template rendering failed")]
    Template(#[from] askama::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The task does not exist or belongs to someone else.
    #[error("Task not found")]
    NotFound { username: String },
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        match self {
            PageError::NotFound { username } => {
                match NotFoundTemplate::new(Some(username), "Task not found").render() {
                    Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
                    Err(err) => {
                        tracing::error!("Failed to render not found page: {}", err);
                        (StatusCode::NOT_FOUND, "Task not found").into_response()
                    }
                }
            }
            err => {
                tracing::error!("Task page request failed: {}", err);
                internal_server_error_page().into_response()
            }
        }
    }
}

/// A task prepared for display.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub status: &'static str,
    pub status_label: &'static str,
    pub created_at: String,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            description: task.description().unwrap_or_default().to_string(),
            due_date: task
                .due_date()
                .map(|due| due.format(DISPLAY_FORMAT).to_string())
                .unwrap_or_default(),
            status: task.status().as_str(),
            status_label: task.status().label(),
            created_at: task.created_at().format(DISPLAY_FORMAT).to_string(),
        }
    }
}

pub struct StatusOption {
    pub value: &'static str,
    pub label: &'static str,
    pub selected: bool,
}

/// Values shown in a task form, either from a stored task or echoed from a submission.
#[derive(Debug, Clone, Default)]
pub struct TaskFormView {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub status: String,
}

impl TaskFormView {
    pub fn status_options(&self) -> Vec<StatusOption> {
        let selected = if self.status.is_empty() {
            TaskStatus::default().as_str()
        } else {
            self.status.as_str()
        };
        TaskStatus::ALL
            .iter()
            .map(|status| StatusOption {
                value: status.as_str(),
                label: status.label(),
                selected: status.as_str() == selected,
            })
            .collect()
    }
}

impl From<&Task> for TaskFormView {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title().to_string(),
            description: task.description().unwrap_or_default().to_string(),
            due_date: task
                .due_date()
                .map(|due| due.format(INPUT_FORMAT).to_string())
                .unwrap_or_default(),
            status: task.status().as_str().to_string(),
        }
    }
}

impl From<&TaskInput> for TaskFormView {
    fn from(input: &TaskInput) -> Self {
        Self {
            title: input.title.clone(),
            description: input.description.clone().unwrap_or_default(),
            due_date: input.due_date.clone().unwrap_or_default(),
            status: input.status.clone().unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub tasks: Vec<TaskView>,
    pub form: TaskFormView,
    pub errors: FieldErrors,
}

impl IndexTemplate {
    /// Landing page for visitors without a session.
    pub fn landing(notices: Vec<Notice>) -> Self {
        Self {
            username: None,
            notices,
            tasks: Vec::new(),
            form: TaskFormView::default(),
            errors: FieldErrors::new(),
        }
    }
}

#[derive(Template)]
#[template(path = "edit_task.html")]
pub struct EditTaskTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub task_id: i32,
    pub form: TaskFormView,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "delete_confirm.html")]
pub struct DeleteConfirmTemplate {
    pub username: Option<String>,
    pub notices: Vec<Notice>,
    pub task: TaskView,
}

/// Routes reachable without a session. `/` shows the landing page to visitors.
pub fn create_home_router(state: Arc<TaskState>) -> Router<()> {
    Router::new()
        .route("/", get(home_page_handler).post(create_task_page_handler))
        .with_state(state)
}

/// Routes that require a session.
pub fn create_task_router(state: Arc<TaskState>) -> Router<()> {
    Router::new()
        .route(
            "/edit/{id}/",
            get(edit_task_page_handler).post(update_task_page_handler),
        )
        .route(
            "/delete/{id}/",
            get(delete_task_page_handler).post(confirm_delete_task_handler),
        )
        .with_state(state)
}

/// Lists the user's tasks, or a storage error notice in place of them.
async fn render_index(
    state: &TaskState,
    user: &CurrentUser,
    mut notices: Vec<Notice>,
    form: TaskFormView,
    errors: FieldErrors,
) -> Result<Html<String>, PageError> {
    let tasks = match state.tasks.list_tasks(user.id).await {
        Ok(tasks) => tasks.iter().map(TaskView::from).collect(),
        Err(err) => {
            tracing::error!("Error loading tasks for user {}: {}", user.id, err);
            notices.push(Notice::LoadFailed);
            Vec::new()
        }
    };
    let template = IndexTemplate {
        username: Some(user.username.clone()),
        notices,
        tasks,
        form,
        errors,
    };
    Ok(Html(template.render()?))
}

async fn find_task(state: &TaskState, user: &CurrentUser, id: i32) -> Result<Task, PageError> {
    state
        .tasks
        .get_task(user.id, id)
        .await?
        .ok_or_else(|| PageError::NotFound {
            username: user.username.clone(),
        })
}

/// An id that does not parse as a task id cannot name an existing task.
fn task_id(
    path: Result<Path<i32>, PathRejection>,
    user: &CurrentUser,
) -> Result<i32, PageError> {
    path.map(|Path(id)| id).map_err(|_| PageError::NotFound {
        username: user.username.clone(),
    })
}

/// Handles GET `/`: the task list with the creation form, or the landing page.
#[tracing::instrument(skip(state, jar))]
pub async fn home_page_handler(
    State(state): State<Arc<TaskState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
) -> Result<Response, PageError> {
    let (jar, notice) = notice::take(jar);
    let notices: Vec<Notice> = notice.into_iter().collect();
    let html = match current_user {
        Some(Extension(user)) => {
            render_index(
                &state,
                &user,
                notices,
                TaskFormView::default(),
                FieldErrors::new(),
            )
            .await?
        }
        None => Html(IndexTemplate::landing(notices).render()?),
    };
    Ok((jar, html).into_response())
}

/// Handles POST `/`: creates a task and redirects back to the list.
#[tracing::instrument(skip(state, jar, form))]
pub async fn create_task_page_handler(
    State(state): State<Arc<TaskState>>,
    jar: CookieJar,
    current_user: Option<Extension<CurrentUser>>,
    form: Result<Form<TaskInput>, FormRejection>,
) -> Result<Response, PageError> {
    let Some(Extension(user)) = current_user else {
        return Ok(Redirect::to("/login/").into_response());
    };
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let fields = match form.validate(Utc::now()) {
        Ok(fields) => fields,
        Err(errors) => {
            tracing::warn!("Invalid task form submission: {}", errors);
            let html =
                render_index(&state, &user, Vec::new(), TaskFormView::from(&form), errors).await?;
            return Ok(html.into_response());
        }
    };

    match state.tasks.create_task(user.id, fields).await {
        Ok(id) => {
            tracing::info!("Task {} added by user {}", id, user.username);
            let jar = notice::flash(jar, Notice::TaskAdded);
            Ok((jar, Redirect::to("/")).into_response())
        }
        Err(err) => {
            tracing::error!("Error adding task for user {}: {}", user.id, err);
            let html = render_index(
                &state,
                &user,
                vec![Notice::AddFailed],
                TaskFormView::from(&form),
                FieldErrors::new(),
            )
            .await?;
            Ok(html.into_response())
        }
    }
}

/// Handles GET `/edit/{id}/`: the edit form prefilled with the stored task.
#[tracing::instrument(skip(state, path))]
pub async fn edit_task_page_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Html<String>, PageError> {
    let id = task_id(path, &user)?;
    let task = find_task(&state, &user, id).await?;
    let template = EditTaskTemplate {
        username: Some(user.username.clone()),
        notices: Vec::new(),
        task_id: task.id(),
        form: TaskFormView::from(&task),
        errors: FieldErrors::new(),
    };
    Ok(Html(template.render()?))
}

/// Handles POST `/edit/{id}/`: applies the update and redirects to the list.
#[tracing::instrument(skip(state, jar, path, form))]
pub async fn update_task_page_handler(
    State(state): State<Arc<TaskState>>,
    jar: CookieJar,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
    Form(form): Form<TaskInput>,
) -> Result<Response, PageError> {
    let id = task_id(path, &user)?;
    find_task(&state, &user, id).await?;

    let render_form = |notices: Vec<Notice>, errors: FieldErrors| {
        EditTaskTemplate {
            username: Some(user.username.clone()),
            notices,
            task_id: id,
            form: TaskFormView::from(&form),
            errors,
        }
        .render()
        .map(Html)
    };

    let fields = match form.validate(Utc::now()) {
        Ok(fields) => fields,
        Err(errors) => {
            tracing::warn!("Invalid task form submission: {}", errors);
            return Ok(render_form(Vec::new(), errors)?.into_response());
        }
    };

    match state.tasks.update_task(user.id, id, fields).await {
        Ok(true) => {
            tracing::info!("Task {} updated by user {}", id, user.username);
            let jar = notice::flash(jar, Notice::TaskUpdated);
            Ok((jar, Redirect::to("/")).into_response())
        }
        Ok(false) => Err(PageError::NotFound {
            username: user.username.clone(),
        }),
        Err(err) => {
            tracing::error!("Error updating task {} for user {}: {}", id, user.id, err);
            Ok(render_form(vec![Notice::UpdateFailed], FieldErrors::new())?.into_response())
        }
    }
}

/// Handles GET `/delete/{id}/`: asks for confirmation.
#[tracing::instrument(skip(state, path))]
pub async fn delete_task_page_handler(
    State(state): State<Arc<TaskState>>,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Html<String>, PageError> {
    let id = task_id(path, &user)?;
    let task = find_task(&state, &user, id).await?;
    let template = DeleteConfirmTemplate {
        username: Some(user.username.clone()),
        notices: Vec::new(),
        task: TaskView::from(&task),
    };
    Ok(Html(template.render()?))
}

/// Handles POST `/delete/{id}/`: deletes the task and redirects to the list.
#[tracing::instrument(skip(state, jar, path))]
pub async fn confirm_delete_task_handler(
    State(state): State<Arc<TaskState>>,
    jar: CookieJar,
    Extension(user): Extension<CurrentUser>,
    path: Result<Path<i32>, PathRejection>,
) -> Result<Response, PageError> {
    let id = task_id(path, &user)?;
    let task = find_task(&state, &user, id).await?;

    match state.tasks.delete_task(user.id, id).await {
        Ok(true) => {
            tracing::info!("Task {} deleted by user {}", id, user.username);
            let jar = notice::flash(jar, Notice::TaskDeleted);
            Ok((jar, Redirect::to("/")).into_response())
        }
        Ok(false) => Err(PageError::NotFound {
            username: user.username.clone(),
        }),
        Err(err) => {
            tracing::error!("Error deleting task {} for user {}: {}", id, user.id, err);
            let template = DeleteConfirmTemplate {
                username: Some(user.username.clone()),
                notices: vec![Notice::DeleteFailed],
                task: TaskView::from(&task),
            };
            Ok(Html(template.render()?).into_response())
        }
    }
}
