//! Input validation for tasks and accounts.
//!
//! Validators collect every failing field into [`FieldErrors`] instead of stopping at the first
//! problem, so a form or API client sees all of its mistakes at once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskFields, TaskStatus};

pub const TITLE_MAX_LENGTH: usize = 200;
pub const USERNAME_MAX_LENGTH: usize = 150;
pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const EMAIL_MAX_LENGTH: usize = 254;

const REQUIRED: &str = "This field is required.";

/// Field name to message. One message per field; the first failure recorded wins.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(field, message)| (field.as_str(), message.as_str()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Parses a due date given either as RFC 3339 or as an HTML `datetime-local` value.
///
/// Values without an offset are taken to be UTC.
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc).trunc_subsecs(6));
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    .map(|naive| naive.and_utc().trunc_subsecs(6))
}

/// Raw task fields as submitted by the task form or the JSON API.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TaskInput {
    /// Validates the input against `now` and returns the fields ready for storage.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<TaskFields, FieldErrors> {
        let mut errors = FieldErrors::new();

        let title = self.title.trim();
        if title.is_empty() {
            errors.add("title", "Title is required.");
        } else if title.chars().count() > TITLE_MAX_LENGTH {
            errors.add("title", "Title must be 200 characters or less.");
        }

        let due_date = match blank_to_none(self.due_date.as_deref()) {
            None => None,
            Some(raw) => match parse_due_date(raw) {
                Some(due_date) if due_date <= now => {
                    errors.add("due_date", "Due date must be in the future.");
                    None
                }
                Some(due_date) => Some(due_date),
                None => {
                    errors.add("due_date", "Enter a valid date/time.");
                    None
                }
            },
        };

        let status = match blank_to_none(self.status.as_deref()) {
            None => TaskStatus::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                errors.add(
                    "status",
                    format!("Select a valid choice. {raw} is not one of the available choices."),
                );
                TaskStatus::default()
            }),
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(TaskFields {
            title: title.to_string(),
            description: blank_to_none(self.description.as_deref()).map(str::to_string),
            due_date,
            status,
        })
    }
}

/// Account fields that passed validation. The password is still plaintext and only ever handed
/// to [`crate::user::UserService`] for hashing.
pub struct NewAccount {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Raw registration form.
#[derive(Default, Clone, Deserialize)]
pub struct RegistrationInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

impl fmt::Debug for RegistrationInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationInput")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.len() <= USERNAME_MAX_LENGTH
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && (domain.contains('.') || domain == "localhost")
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

impl RegistrationInput {
    /// The username as it will be stored.
    pub fn username(&self) -> &str {
        self.username.trim()
    }

    /// Validates the form. `username_taken` comes from the identity store.
    pub fn validate(&self, username_taken: bool) -> Result<NewAccount, FieldErrors> {
        let mut errors = FieldErrors::new();

        let username = self.username();
        if username.is_empty() {
            errors.add("username", REQUIRED);
        } else if !is_valid_username(username) {
            errors.add(
                "username",
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
            );
        } else if username_taken {
            errors.add("username", "This username is already taken.");
        }

        let email = self.email.trim();
        if email.chars().count() > EMAIL_MAX_LENGTH {
            errors.add("email", "Ensure this value has at most 254 characters.");
        } else if !email.is_empty() && !is_valid_email(email) {
            errors.add("email", "Enter a valid email address.");
        }

        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        } else if self.password.chars().count() < PASSWORD_MIN_LENGTH {
            errors.add("password", "Password must be at least 8 characters long.");
        }

        if self.confirm_password.is_empty() {
            errors.add("confirm_password", REQUIRED);
        } else if self.password != self.confirm_password {
            errors.add("confirm_password", "Passwords do not match.");
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(NewAccount {
            username: username.to_string(),
            email: Some(email.to_string()).filter(|email| !email.is_empty()),
            password: self.password.clone(),
        })
    }
}

/// Raw login form.
#[derive(Default, Clone, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInput")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl LoginInput {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.username.trim().is_empty() {
            errors.add("username", REQUIRED);
        }
        if self.password.is_empty() {
            errors.add("password", REQUIRED);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
