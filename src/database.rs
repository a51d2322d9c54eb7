use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::live::{CHANGE_CHANNEL_CAPACITY, Subscription, Table};
use crate::models::{Category, RecycleBinEntry, Task};

pub const SCHEMA_VERSION: u32 = 1;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    color           INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    due_date        TEXT NOT NULL,
    priority        TEXT NOT NULL,
    category_id     INTEGER REFERENCES categories(id) ON DELETE SET NULL,
    is_completed    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recycle_bin (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id         INTEGER NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    due_date        TEXT NOT NULL,
    priority        TEXT NOT NULL,
    category_id     INTEGER,
    is_completed    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    deleted_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_category_id ON tasks(category_id);
CREATE INDEX IF NOT EXISTS idx_tasks_due_date ON tasks(due_date);
CREATE INDEX IF NOT EXISTS idx_categories_name ON categories(name);
CREATE INDEX IF NOT EXISTS idx_recycle_bin_deleted_at ON recycle_bin(deleted_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

const TASK_COLUMNS: &str =
    "id, title, description, due_date, priority, category_id, is_completed, created_at, updated_at";
const CATEGORY_COLUMNS: &str = "id, name, color, created_at, updated_at";
const RECYCLE_BIN_COLUMNS: &str =
    "id, task_id, title, description, due_date, priority, category_id, is_completed, created_at, deleted_at";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
    #[error("{0} has no id; it was never stored")]
    MissingId(&'static str),
    #[error("Query task failed: {0}")]
    QueryTaskFailed(String),
}

/// Handle to the task database. Cheap to clone; clones share one connection
/// and one change feed.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<Table>,
}

impl Database {
    /// Open (or create) the database file and initialize the schema
    pub fn new(path: &Path) -> Result<Self, DatabaseError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        let db = Self::from_connection(conn)?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(CREATE_TABLES)?;

        let version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Receiver for table invalidations, one message per committed write.
    pub fn changes(&self) -> broadcast::Receiver<Table> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, table: Table) {
        // No receivers is fine; nobody is observing.
        let _ = self.changes.send(table);
    }

    // ---- tasks ----

    fn row_to_task(row: &rusqlite::Row) -> Result<Task, rusqlite::Error> {
        Ok(Task {
            id: Some(row.get(0)?),
            title: row.get(1)?,
            description: row.get(2)?,
            due_date: row.get(3)?,
            priority: row.get(4)?,
            category_id: row.get(5)?,
            is_completed: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    /// Insert a task and return its id. A task whose id already exists
    /// replaces the stored row.
    #[instrument(skip(self, task), fields(task_id = ?task.id))]
    pub fn insert_task(&self, task: &Task) -> Result<i64, DatabaseError> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, description, due_date, priority, category_id, is_completed, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    due_date = excluded.due_date,
                    priority = excluded.priority,
                    category_id = excluded.category_id,
                    is_completed = excluded.is_completed,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    task.id,
                    task.title,
                    task.description,
                    task.due_date,
                    task.priority,
                    task.category_id,
                    task.is_completed,
                    task.created_at,
                    task.updated_at
                ],
            )?;
            Ok(match task.id {
                Some(id) => id,
                None => conn.last_insert_rowid(),
            })
        })?;
        self.notify(Table::Tasks);
        debug!(id, "task stored");
        Ok(id)
    }

    /// Update an existing task, refreshing `updated_at`.
    /// A task that is not stored is left alone.
    #[instrument(skip(self, task), fields(task_id = ?task.id))]
    pub fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let Some(id) = task.id else {
            debug!("update of unsaved task ignored");
            return Ok(());
        };

        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks SET title = ?1, description = ?2, due_date = ?3, priority = ?4,
                 category_id = ?5, is_completed = ?6, updated_at = ?7 WHERE id = ?8",
                rusqlite::params![
                    task.title,
                    task.description,
                    task.due_date,
                    task.priority,
                    task.category_id,
                    task.is_completed,
                    Utc::now(),
                    id
                ],
            )?)
        })?;

        if changed == 0 {
            debug!(id, "update of missing task ignored");
            return Ok(());
        }
        self.notify(Table::Tasks);
        Ok(())
    }

    /// Delete a task by ID
    #[instrument(skip(self))]
    pub fn delete_task(&self, id: i64) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
            Ok(())
        })?;
        self.notify(Table::Tasks);
        Ok(())
    }

    /// Get a single task by ID
    pub fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
            Ok(conn
                .query_row(&sql, rusqlite::params![id], Self::row_to_task)
                .optional()?)
        })
    }

    /// Get all tasks ordered by due date ASC
    pub fn get_all_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY due_date ASC, id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map([], Self::row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Get completed or pending tasks ordered by due date ASC
    pub fn get_tasks_by_completion(&self, is_completed: bool) -> Result<Vec<Task>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE is_completed = ?1 ORDER BY due_date ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(rusqlite::params![is_completed], Self::row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn observe_tasks(&self) -> Subscription<Task> {
        Subscription::new(self.clone(), Table::Tasks, |db: &Database| db.get_all_tasks())
    }

    pub fn observe_tasks_by_completion(&self, is_completed: bool) -> Subscription<Task> {
        Subscription::new(self.clone(), Table::Tasks, move |db: &Database| {
            db.get_tasks_by_completion(is_completed)
        })
    }

    // ---- categories ----

    fn row_to_category(row: &rusqlite::Row) -> Result<Category, rusqlite::Error> {
        Ok(Category {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            color: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    /// Insert a category and return its id, replacing a stored row with the same id.
    #[instrument(skip(self, category), fields(category_id = ?category.id))]
    pub fn insert_category(&self, category: &Category) -> Result<i64, DatabaseError> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO categories (id, name, color, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    color = excluded.color,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    category.id,
                    category.name,
                    category.color,
                    category.created_at,
                    category.updated_at
                ],
            )?;
            Ok(match category.id {
                Some(id) => id,
                None => conn.last_insert_rowid(),
            })
        })?;
        self.notify(Table::Categories);
        debug!(id, "category stored");
        Ok(id)
    }

    /// Update an existing category, refreshing `updated_at`.
    /// A category that is not stored is left alone.
    #[instrument(skip(self, category), fields(category_id = ?category.id))]
    pub fn update_category(&self, category: &Category) -> Result<(), DatabaseError> {
        let Some(id) = category.id else {
            debug!("update of unsaved category ignored");
            return Ok(());
        };

        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE categories SET name = ?1, color = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![category.name, category.color, Utc::now(), id],
            )?)
        })?;

        if changed == 0 {
            debug!(id, "update of missing category ignored");
            return Ok(());
        }
        self.notify(Table::Categories);
        Ok(())
    }

    /// Delete a category by ID.
    /// Tasks that belonged to the category keep existing with no category.
    #[instrument(skip(self))]
    pub fn delete_category(&self, id: i64) -> Result<(), DatabaseError> {
        let detached = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let detached = tx.execute(
                "UPDATE tasks SET category_id = NULL WHERE category_id = ?1",
                rusqlite::params![id],
            )?;
            tx.execute("DELETE FROM categories WHERE id = ?1", rusqlite::params![id])?;

            tx.commit()?;
            Ok(detached)
        })?;

        self.notify(Table::Categories);
        if detached > 0 {
            debug!(id, detached, "tasks detached from deleted category");
            self.notify(Table::Tasks);
        }
        Ok(())
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1");
            Ok(conn
                .query_row(&sql, rusqlite::params![id], Self::row_to_category)
                .optional()?)
        })
    }

    /// Get all categories ordered by name ASC
    pub fn get_all_categories(&self) -> Result<Vec<Category>, DatabaseError> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name ASC, id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let categories = stmt
                .query_map([], Self::row_to_category)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(categories)
        })
    }

    pub fn observe_categories(&self) -> Subscription<Category> {
        Subscription::new(self.clone(), Table::Categories, |db: &Database| {
            db.get_all_categories()
        })
    }

    // ---- recycle bin ----

    fn row_to_bin_entry(row: &rusqlite::Row) -> Result<RecycleBinEntry, rusqlite::Error> {
        Ok(RecycleBinEntry {
            id: Some(row.get(0)?),
            task_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            due_date: row.get(4)?,
            priority: row.get(5)?,
            category_id: row.get(6)?,
            is_completed: row.get(7)?,
            created_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }

    /// Insert a recycle-bin entry and return its id, replacing a stored row with the same id.
    #[instrument(skip(self, entry), fields(entry_id = ?entry.id, task_id = entry.task_id))]
    pub fn insert_recycle_bin_entry(&self, entry: &RecycleBinEntry) -> Result<i64, DatabaseError> {
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recycle_bin (id, task_id, title, description, due_date, priority, category_id, is_completed, created_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    task_id = excluded.task_id,
                    title = excluded.title,
                    description = excluded.description,
                    due_date = excluded.due_date,
                    priority = excluded.priority,
                    category_id = excluded.category_id,
                    is_completed = excluded.is_completed,
                    created_at = excluded.created_at,
                    deleted_at = excluded.deleted_at",
                rusqlite::params![
                    entry.id,
                    entry.task_id,
                    entry.title,
                    entry.description,
                    entry.due_date,
                    entry.priority,
                    entry.category_id,
                    entry.is_completed,
                    entry.created_at,
                    entry.deleted_at
                ],
            )?;
            Ok(match entry.id {
                Some(id) => id,
                None => conn.last_insert_rowid(),
            })
        })?;
        self.notify(Table::RecycleBin);
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn delete_recycle_bin_entry(&self, id: i64) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM recycle_bin WHERE id = ?1", rusqlite::params![id])?;
            Ok(())
        })?;
        self.notify(Table::RecycleBin);
        Ok(())
    }

    /// Remove every entry from the recycle bin, returning how many were removed
    #[instrument(skip(self))]
    pub fn clear_recycle_bin(&self) -> Result<usize, DatabaseError> {
        let removed =
            self.with_conn(|conn| Ok(conn.execute("DELETE FROM recycle_bin", [])?))?;
        self.notify(Table::RecycleBin);
        Ok(removed)
    }

    pub fn get_recycle_bin_entry(&self, id: i64) -> Result<Option<RecycleBinEntry>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {RECYCLE_BIN_COLUMNS} FROM recycle_bin WHERE id = ?1");
            Ok(conn
                .query_row(&sql, rusqlite::params![id], Self::row_to_bin_entry)
                .optional()?)
        })
    }

    /// Get all recycle-bin entries, most recently deleted first
    pub fn get_all_recycle_bin_entries(&self) -> Result<Vec<RecycleBinEntry>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RECYCLE_BIN_COLUMNS} FROM recycle_bin ORDER BY deleted_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([], Self::row_to_bin_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    pub fn observe_recycle_bin(&self) -> Subscription<RecycleBinEntry> {
        Subscription::new(self.clone(), Table::RecycleBin, |db: &Database| {
            db.get_all_recycle_bin_entries()
        })
    }
}
