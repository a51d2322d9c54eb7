use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl ToSql for Priority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Priority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Option<i64>,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub category_id: Option<i64>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<i64>,
    pub name: String,
    /// ARGB color, e.g. `0xFF2196F3`
    pub color: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Frozen copy of a task taken when it was moved to the recycle bin.
/// `category_id` is not linked to the categories table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecycleBinEntry {
    pub id: Option<i64>,
    pub task_id: i64,
    pub title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub category_id: Option<i64>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: String, due_date: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            title,
            description: String::new(),
            due_date,
            priority: Priority::Medium,
            category_id: None,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Category {
    pub fn new(name: String, color: u32) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name,
            color,
            created_at: now,
            updated_at: now,
        }
    }
}

impl RecycleBinEntry {
    /// Snapshot `task` for the bin. Returns `None` for a task that was never stored.
    pub fn from_task(task: &Task) -> Option<Self> {
        let task_id = task.id?;
        Some(Self {
            id: None,
            task_id,
            title: task.title.clone(),
            description: task.description.clone(),
            due_date: task.due_date,
            priority: task.priority,
            category_id: task.category_id,
            is_completed: task.is_completed,
            created_at: task.created_at,
            deleted_at: Utc::now(),
        })
    }

    /// Rebuild the task this entry was taken from, under its original id.
    pub fn to_task(&self) -> Task {
        Task {
            id: Some(self.task_id),
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            priority: self.priority,
            category_id: self.category_id,
            is_completed: self.is_completed,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}
