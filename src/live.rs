//! Live query subscriptions over the task tables.
//!
//! Every committed write on a table broadcasts a [`Table`] invalidation. A
//! [`Subscription`] yields its query result once on the first call to
//! [`Subscription::next`], then re-runs the query each time its table is
//! invalidated, always returning the full ordered collection.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::database::{Database, DatabaseError};

/// Capacity of the invalidation channel. Subscribers that fall further behind
/// than this simply re-query once.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Tasks,
    Categories,
    RecycleBin,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Categories => "categories",
            Table::RecycleBin => "recycle_bin",
        }
    }
}

type Query<T> = Arc<dyn Fn(&Database) -> Result<Vec<T>, DatabaseError> + Send + Sync>;

pub struct Subscription<T> {
    db: Database,
    table: Table,
    rx: broadcast::Receiver<Table>,
    query: Query<T>,
    primed: bool,
}

impl<T: Send + 'static> Subscription<T> {
    pub(crate) fn new<F>(db: Database, table: Table, query: F) -> Self
    where
        F: Fn(&Database) -> Result<Vec<T>, DatabaseError> + Send + Sync + 'static,
    {
        // Subscribe before the first query so no write can slip between them.
        let rx = db.changes();
        Self {
            db,
            table,
            rx,
            query: Arc::new(query),
            primed: false,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Wait for the next emission of the collection.
    ///
    /// The query itself runs on the blocking pool, so a write holding the
    /// connection never stalls the async workers.
    pub async fn next(&mut self) -> Result<Vec<T>, DatabaseError> {
        if !self.primed {
            self.primed = true;
            return Self::collect(self.spawn_query()).await;
        }

        loop {
            match self.rx.recv().await {
                Ok(table) if table == self.table => break,
                Ok(_) => continue,
                // `self.db` owns the sender, so this is only ever `Lagged`.
                Err(e) => {
                    debug!(table = self.table.name(), error = %e, "change feed interrupted, re-querying");
                    break;
                }
            }
        }
        Self::collect(self.spawn_query()).await
    }

    fn spawn_query(&self) -> JoinHandle<Result<Vec<T>, DatabaseError>> {
        let db = self.db.clone();
        let query = Arc::clone(&self.query);
        tokio::task::spawn_blocking(move || query(&db))
    }

    async fn collect(
        handle: JoinHandle<Result<Vec<T>, DatabaseError>>,
    ) -> Result<Vec<T>, DatabaseError> {
        handle
            .await
            .map_err(|e| DatabaseError::QueryTaskFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Task};
    use chrono::{Duration, Utc};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn first_emission_is_current_contents() {
        let db = Database::in_memory().unwrap();
        db.insert_category(&Category::new("Work".to_string(), 0xFFFF0000)).unwrap();

        let mut sub = db.observe_categories();
        let first = sub.next().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "Work");
    }

    #[tokio::test]
    async fn writes_re_emit_the_full_collection() {
        let db = Database::in_memory().unwrap();
        let mut sub = db.observe_tasks();
        assert!(sub.next().await.unwrap().is_empty());

        let now = Utc::now();
        db.insert_task(&Task::new("later".to_string(), now + Duration::days(2))).unwrap();
        let after_one = sub.next().await.unwrap();
        assert_eq!(after_one.len(), 1);

        db.insert_task(&Task::new("sooner".to_string(), now)).unwrap();
        let after_two = sub.next().await.unwrap();
        let titles: Vec<_> = after_two.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["sooner", "later"]);
    }

    #[tokio::test]
    async fn other_tables_do_not_wake_subscribers() {
        let db = Database::in_memory().unwrap();
        let mut sub = db.observe_recycle_bin();
        sub.next().await.unwrap();

        db.insert_category(&Category::new("Home".to_string(), 0xFF00FF00)).unwrap();
        let woke = tokio::time::timeout(StdDuration::from_millis(50), sub.next()).await;
        assert!(woke.is_err());
    }

    #[tokio::test]
    async fn completion_streams_follow_updates() {
        let db = Database::in_memory().unwrap();
        let repo = crate::repository::TaskRepository::new(db.clone());
        let mut pending = repo.tasks_by_completion(false);
        let mut completed = db.observe_tasks_by_completion(true);
        assert!(pending.next().await.unwrap().is_empty());
        assert!(completed.next().await.unwrap().is_empty());

        let mut task = Task::new("file taxes".to_string(), Utc::now());
        task.id = Some(db.insert_task(&task).unwrap());
        let open = pending.next().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "file taxes");
        assert!(completed.next().await.unwrap().is_empty());

        task.is_completed = true;
        db.update_task(&task).unwrap();
        assert!(pending.next().await.unwrap().is_empty());
        let done = completed.next().await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, task.id);
        assert!(done[0].is_completed);
    }

    #[tokio::test]
    async fn re_query_does_not_stall_the_runtime() {
        let db = Database::in_memory().unwrap();
        let mut sub = db.observe_categories();
        sub.next().await.unwrap();

        let holder = db.clone();
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let writer = std::thread::spawn(move || {
            holder.with_conn(|_| {
                let _ = locked_tx.send(());
                std::thread::sleep(StdDuration::from_millis(800));
                Ok(())
            })
        });
        locked_rx.await.unwrap();

        let reader = tokio::spawn(async move { sub.next().await });
        db.notify(Table::Categories);

        let started = std::time::Instant::now();
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(started.elapsed() < StdDuration::from_millis(400));

        writer.join().unwrap().unwrap();
        assert!(reader.await.unwrap().unwrap().is_empty());
    }
}
