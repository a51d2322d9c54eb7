use tracing::{info, instrument, warn};

use crate::database::{Database, DatabaseError};
use crate::live::Subscription;
use crate::models::{Category, RecycleBinEntry, Task};

/// Domain operations over the task, category and recycle-bin tables.
///
/// Moves between tasks and the recycle bin are two separate writes. The copy
/// is always written before the original is removed, so a failure in between
/// leaves a duplicate rather than losing the task.
#[derive(Clone)]
pub struct TaskRepository {
    db: Database,
}

impl TaskRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn all_tasks(&self) -> Subscription<Task> {
        self.db.observe_tasks()
    }

    pub fn all_deleted_tasks(&self) -> Subscription<RecycleBinEntry> {
        self.db.observe_recycle_bin()
    }

    pub fn all_categories(&self) -> Subscription<Category> {
        self.db.observe_categories()
    }

    pub fn tasks_by_completion(&self, is_completed: bool) -> Subscription<Task> {
        self.db.observe_tasks_by_completion(is_completed)
    }

    pub fn insert_task(&self, task: &Task) -> Result<i64, DatabaseError> {
        self.db.insert_task(task)
    }

    pub fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.db.update_task(task)
    }

    pub fn get_task_by_id(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        self.db.get_task(id)
    }

    /// Move a task into the recycle bin. Returns the id of the new bin entry.
    #[instrument(skip(self, task), fields(task_id = ?task.id))]
    pub fn delete_task(&self, task: &Task) -> Result<i64, DatabaseError> {
        let entry = RecycleBinEntry::from_task(task).ok_or(DatabaseError::MissingId("task"))?;

        let entry_id = self.db.insert_recycle_bin_entry(&entry)?;
        self.db.delete_task(entry.task_id)?;

        info!(task_id = entry.task_id, entry_id, "task moved to recycle bin");
        Ok(entry_id)
    }

    /// Put a recycled task back under its original id and drop the bin entry.
    ///
    /// A task still stored under that id is overwritten. If the task's
    /// category has been deleted since, the task comes back without one.
    #[instrument(skip(self, entry), fields(entry_id = ?entry.id, task_id = entry.task_id))]
    pub fn restore_task(&self, entry: &RecycleBinEntry) -> Result<i64, DatabaseError> {
        let entry_id = entry.id.ok_or(DatabaseError::MissingId("recycle bin entry"))?;

        let mut task = entry.to_task();
        if let Some(category_id) = task.category_id {
            if self.db.get_category(category_id)?.is_none() {
                warn!(category_id, "category gone, restoring task without it");
                task.category_id = None;
            }
        }

        let task_id = self.db.insert_task(&task)?;
        self.db.delete_recycle_bin_entry(entry_id)?;

        info!(task_id, "task restored from recycle bin");
        Ok(task_id)
    }

    /// Drop a bin entry for good. The tasks table is untouched.
    pub fn permanently_delete_task(&self, entry: &RecycleBinEntry) -> Result<(), DatabaseError> {
        let entry_id = entry.id.ok_or(DatabaseError::MissingId("recycle bin entry"))?;
        self.db.delete_recycle_bin_entry(entry_id)
    }

    pub fn clear_recycle_bin(&self) -> Result<(), DatabaseError> {
        let removed = self.db.clear_recycle_bin()?;
        info!(removed, "recycle bin cleared");
        Ok(())
    }

    pub fn insert_category(&self, category: &Category) -> Result<i64, DatabaseError> {
        self.db.insert_category(category)
    }

    pub fn update_category(&self, category: &Category) -> Result<(), DatabaseError> {
        self.db.update_category(category)
    }

    pub fn delete_category(&self, category: &Category) -> Result<(), DatabaseError> {
        let id = category.id.ok_or(DatabaseError::MissingId("category"))?;
        self.db.delete_category(id)
    }

    pub fn get_category_by_id(&self, id: i64) -> Result<Option<Category>, DatabaseError> {
        self.db.get_category(id)
    }
}
