use crate::entities::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::*;
use std::str::FromStr;
use std::sync::Arc;

pub use crate::entities::sea_orm_active_enums::TaskStatus;

pub mod api;
pub mod web;

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Task {
    id: i32,
    title: String,
    description: Option<String>,
    due_date: Option<DateTime<Utc>>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl From<task::Model> for Task {
    fn from(model: task::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            description: model.description,
            due_date: model.due_date,
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Client-controlled task fields, already validated.
#[derive(Debug, PartialEq, Clone, Eq)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    /// The stored and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Human-readable label for pages.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown task status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Failure of the underlying store. Never shown to clients verbatim.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Owner-scoped task persistence.
///
/// Every operation takes the owner's user id and filters on it in the query itself, so a task
/// that belongs to someone else behaves exactly like one that does not exist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts a task and returns its generated id.
    async fn create_task(&self, owner_id: i32, fields: TaskFields) -> Result<i32, StorageError>;

    /// Lists the owner's tasks, most recently created first.
    async fn list_tasks(&self, owner_id: i32) -> Result<Vec<Task>, StorageError>;

    async fn get_task(&self, owner_id: i32, id: i32) -> Result<Option<Task>, StorageError>;

    /// Returns `false` when no task with this id belongs to the owner.
    async fn update_task(
        &self,
        owner_id: i32,
        id: i32,
        fields: TaskFields,
    ) -> Result<bool, StorageError>;

    /// Returns `false` when no task with this id belongs to the owner.
    async fn delete_task(&self, owner_id: i32, id: i32) -> Result<bool, StorageError>;
}

pub struct SeaOrmTaskRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmTaskRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskRepository for SeaOrmTaskRepository {
    #[tracing::instrument(skip(self, fields))]
    async fn create_task(&self, owner_id: i32, fields: TaskFields) -> Result<i32, StorageError> {
        let now = Utc::now();
        let active_model = task::ActiveModel {
            owner_id: ActiveValue::Set(owner_id),
            title: ActiveValue::Set(fields.title),
            description: ActiveValue::Set(fields.description),
            due_date: ActiveValue::Set(fields.due_date),
            status: ActiveValue::Set(fields.status),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = task::Entity::insert(active_model).exec(&*self.db).await?;
        Ok(result.last_insert_id)
    }

    #[tracing::instrument(skip(self))]
    async fn list_tasks(&self, owner_id: i32) -> Result<Vec<Task>, StorageError> {
        let tasks = task::Entity::find()
            .filter(task::Column::OwnerId.eq(owner_id))
            .order_by_desc(task::Column::CreatedAt)
            .order_by_desc(task::Column::Id)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        Ok(tasks)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, owner_id: i32, id: i32) -> Result<Option<Task>, StorageError> {
        let task = task::Entity::find()
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::OwnerId.eq(owner_id))
            .one(&*self.db)
            .await?;
        Ok(task.map(Task::from))
    }

    #[tracing::instrument(skip(self, fields))]
    async fn update_task(
        &self,
        owner_id: i32,
        id: i32,
        fields: TaskFields,
    ) -> Result<bool, StorageError> {
        let changes = task::ActiveModel {
            title: ActiveValue::Set(fields.title),
            description: ActiveValue::Set(fields.description),
            due_date: ActiveValue::Set(fields.due_date),
            status: ActiveValue::Set(fields.status),
            updated_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        };
        let result = task::Entity::update_many()
            .set(changes)
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::OwnerId.eq(owner_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, owner_id: i32, id: i32) -> Result<bool, StorageError> {
        let result = task::Entity::delete_many()
            .filter(task::Column::Id.eq(id))
            .filter(task::Column::OwnerId.eq(owner_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
