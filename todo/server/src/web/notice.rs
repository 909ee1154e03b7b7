//! One-shot notices shown at the top of a page.
//!
//! Success notices survive a redirect by riding in a short-lived `notice` cookie that the next
//! rendered page consumes. Error notices are rendered in the same response and never stored.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::validation::is_valid_username;

pub const NOTICE_COOKIE: &str = "notice";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    TaskAdded,
    TaskUpdated,
    TaskDeleted,
    Registered,
    WelcomeBack(String),
    LoggedOut,
    AddFailed,
    LoadFailed,
    UpdateFailed,
    DeleteFailed,
    InvalidCredentials,
    RegistrationFailed,
    LoginFailed,
}

impl Notice {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Notice::AddFailed
                | Notice::LoadFailed
                | Notice::UpdateFailed
                | Notice::DeleteFailed
                | Notice::InvalidCredentials
                | Notice::RegistrationFailed
                | Notice::LoginFailed
        )
    }

    /// CSS-friendly level name.
    pub fn level(&self) -> &'static str {
        if self.is_error() { "error" } else { "success" }
    }

    pub fn message(&self) -> String {
        match self {
            Notice::TaskAdded => "Task added successfully.".to_string(),
            Notice::TaskUpdated => "Task updated successfully.".to_string(),
            Notice::TaskDeleted => "Task deleted successfully.".to_string(),
            Notice::Registered => "Registration successful. You are now logged in.".to_string(),
            Notice::WelcomeBack(username) => format!("Welcome back, {username}!"),
            Notice::LoggedOut => "You have been logged out successfully.".to_string(),
            Notice::AddFailed => "Error adding task.".to_string(),
            Notice::LoadFailed => "Error loading tasks.".to_string(),
            Notice::UpdateFailed => "Error updating task.".to_string(),
            Notice::DeleteFailed => "Error deleting task.".to_string(),
            Notice::InvalidCredentials => "Invalid username or password.".to_string(),
            Notice::RegistrationFailed => {
                "An error occurred during registration. Please try again.".to_string()
            }
            Notice::LoginFailed => "An error occurred during login. Please try again.".to_string(),
        }
    }

    /// Cookie value for notices that may outlive the request.
    fn code(&self) -> Option<String> {
        let code = match self {
            Notice::TaskAdded => "task_added".to_string(),
            Notice::TaskUpdated => "task_updated".to_string(),
            Notice::TaskDeleted => "task_deleted".to_string(),
            Notice::Registered => "registered".to_string(),
            Notice::WelcomeBack(username) => format!("welcome_back:{username}"),
            Notice::LoggedOut => "logged_out".to_string(),
            _ => return None,
        };
        Some(code)
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "task_added" => Some(Notice::TaskAdded),
            "task_updated" => Some(Notice::TaskUpdated),
            "task_deleted" => Some(Notice::TaskDeleted),
            "registered" => Some(Notice::Registered),
            "logged_out" => Some(Notice::LoggedOut),
            _ => code
                .strip_prefix("welcome_back:")
                .filter(|username| is_valid_username(username))
                .map(|username| Notice::WelcomeBack(username.to_string())),
        }
    }
}

/// Stores `notice` for the next rendered page. Error notices are not carried across requests.
pub fn flash(jar: CookieJar, notice: Notice) -> CookieJar {
    let Some(code) = notice.code() else {
        return jar;
    };
    let cookie = Cookie::build((NOTICE_COOKIE, code))
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::minutes(5))
        .path("/")
        .build();
    jar.add(cookie)
}

/// Removes the pending notice from the jar and returns it.
pub fn take(jar: CookieJar) -> (CookieJar, Option<Notice>) {
    let Some(cookie) = jar.get(NOTICE_COOKIE) else {
        return (jar, None);
    };
    let notice = Notice::from_code(cookie.value());
    let jar = jar.remove(Cookie::build((NOTICE_COOKIE, "")).path("/"));
    (jar, notice)
}
