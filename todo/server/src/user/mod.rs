use crate::entities::*;
use crate::validation::NewAccount;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use sea_orm::*;

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct User {
    id: i32,
    username: String,
    email: Option<String>,
}

impl User {
    pub fn new(id: i32, username: String, email: Option<String>) -> Self {
        Self {
            id,
            username,
            email,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

impl From<user::Model> for User {
    fn from(model: user::Model) -> Self {
        User::new(model.id, model.username, model.email)
    }
}

/// Error type for UserService operations.
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// The username was registered by someone else between validation and insert.
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Identity store: user accounts and their password hashes.
pub struct UserService<'a> {
    db: &'a sea_orm::DatabaseConnection,
}

impl UserService<'_> {
    pub fn new(db: &sea_orm::DatabaseConnection) -> UserService<'_> {
        UserService { db }
    }

    /// Creates a user, storing only an argon2 hash of the password.
    #[tracing::instrument(skip(self, account), fields(username = %account.username))]
    pub async fn create_user(&self, account: NewAccount) -> Result<User, UserServiceError> {
        let password_hash = hash_password(&account.password)?;
        let active_model = user::ActiveModel {
            username: ActiveValue::Set(account.username.clone()),
            email: ActiveValue::Set(account.email),
            password_hash: ActiveValue::Set(password_hash),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        };

        match active_model.insert(self.db).await {
            Ok(model) => Ok(User::from(model)),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(UserServiceError::DuplicateUsername(account.username))
            }
            Err(err) => Err(UserServiceError::Database(err)),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn username_exists(&self, username: &str) -> Result<bool, UserServiceError> {
        let existing = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?;
        Ok(existing.is_some())
    }

    /// Checks a username/password pair. Unknown users and wrong passwords both yield `None`.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, UserServiceError> {
        let Some(model) = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?
        else {
            return Ok(None);
        };

        if verify_password(password, &model.password_hash) {
            Ok(Some(User::from(model)))
        } else {
            Ok(None)
        }
    }
}

fn hash_password(password: &str) -> Result<String, UserServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| UserServiceError::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash could not be parsed: {}", e);
            false
        }
    }
}
