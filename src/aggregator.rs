//! Reactive view state over the task repository.
//!
//! [`TaskAggregator`] keeps one immutable [`UiState`] snapshot. Three
//! background subscriptions (tasks, recycle bin, categories) each replace
//! their own slice of it; commands run against the repository on the blocking
//! pool and report through the shared `is_loading` flag and `error` slot.
//! Every write swaps in a whole new snapshot, so readers never see a
//! half-applied update.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::database::DatabaseError;
use crate::live::Subscription;
use crate::models::{Category, RecycleBinEntry, Task};
use crate::repository::TaskRepository;

pub const EMPTY_TITLE: &str = "Title cannot be empty";
pub const EMPTY_CATEGORY_NAME: &str = "Category name cannot be empty";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiState {
    /// Ascending due date
    pub tasks: Vec<Task>,
    /// Most recently deleted first
    pub deleted_tasks: Vec<RecycleBinEntry>,
    /// Ascending name
    pub categories: Vec<Category>,
    pub selected_task: Option<Task>,
    pub is_loading: bool,
    pub error: Option<String>,
    in_flight: usize,
}

type SharedState = Arc<watch::Sender<Arc<UiState>>>;

fn replace_state<F>(state: &watch::Sender<Arc<UiState>>, f: F)
where
    F: FnOnce(&UiState) -> UiState,
{
    state.send_modify(|current| *current = Arc::new(f(&**current)));
}

fn set_error(state: &watch::Sender<Arc<UiState>>, message: String) {
    replace_state(state, |s| UiState {
        error: Some(message),
        ..s.clone()
    });
}

/// Holds `is_loading` up for one command. Releasing it is skipped once the
/// aggregator has been cancelled.
struct LoadingGuard {
    state: SharedState,
    cancel: CancellationToken,
}

impl LoadingGuard {
    fn begin(state: SharedState, cancel: CancellationToken) -> Self {
        replace_state(&state, |s| UiState {
            in_flight: s.in_flight + 1,
            is_loading: true,
            ..s.clone()
        });
        Self { state, cancel }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        replace_state(&self.state, |s| {
            let in_flight = s.in_flight.saturating_sub(1);
            UiState {
                in_flight,
                is_loading: in_flight > 0,
                ..s.clone()
            }
        });
    }
}

/// Completion handle for a command. Dropping it does not cancel the command.
pub struct CommandHandle {
    inner: Option<JoinHandle<()>>,
}

impl CommandHandle {
    fn rejected() -> Self {
        Self { inner: None }
    }

    /// True when validation failed and the repository was never called.
    pub fn is_rejected(&self) -> bool {
        self.inner.is_none()
    }

    /// Wait until the command has finished and its effects on the state are applied.
    pub async fn finished(self) {
        if let Some(handle) = self.inner {
            if let Err(e) = handle.await {
                debug!(error = %e, "command task did not complete");
            }
        }
    }
}

pub struct TaskAggregator {
    repo: TaskRepository,
    state: SharedState,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskAggregator {
    /// Start the aggregator and its three subscriptions.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(repo: TaskRepository) -> Self {
        let (tx, _) = watch::channel(Arc::new(UiState::default()));
        let aggregator = Self {
            state: Arc::new(tx),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            repo,
        };

        aggregator.follow(aggregator.repo.all_tasks(), |s, tasks| UiState {
            tasks,
            ..s.clone()
        });
        aggregator.follow(aggregator.repo.all_deleted_tasks(), |s, deleted_tasks| UiState {
            deleted_tasks,
            ..s.clone()
        });
        aggregator.follow(aggregator.repo.all_categories(), |s, categories| UiState {
            categories,
            ..s.clone()
        });

        aggregator
    }

    fn follow<T, F>(&self, mut subscription: Subscription<T>, apply: F)
    where
        T: Send + 'static,
        F: Fn(&UiState, Vec<T>) -> UiState + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let table = subscription.table().name();

        self.tracker.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = subscription.next() => next,
                };

                match next {
                    Ok(items) => {
                        debug!(table, count = items.len(), "collection updated");
                        replace_state(&state, |s| apply(s, items));
                    }
                    Err(e) => {
                        warn!(table, error = %e, "subscription failed");
                        set_error(&state, e.to_string());
                        break;
                    }
                }
            }
            debug!(table, "subscription stopped");
        });
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<UiState> {
        Arc::clone(&self.state.borrow())
    }

    /// Read-only feed of snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<UiState>> {
        self.state.subscribe()
    }

    fn reject(&self, command: &'static str, message: &str) -> CommandHandle {
        debug!(command, message, "command rejected");
        set_error(&self.state, message.to_string());
        CommandHandle::rejected()
    }

    fn launch<F>(&self, command: &'static str, op: F) -> CommandHandle
    where
        F: FnOnce(&TaskRepository) -> Result<(), DatabaseError> + Send + 'static,
    {
        let repo = self.repo.clone();
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let guard = LoadingGuard::begin(Arc::clone(&state), cancel.clone());

        let handle = self.tracker.spawn(async move {
            let _guard = guard;
            let work = tokio::task::spawn_blocking(move || op(&repo));

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(command, "command cancelled");
                    return;
                }
                outcome = work => outcome,
            };
            if cancel.is_cancelled() {
                return;
            }

            match outcome {
                Ok(Ok(())) => debug!(command, "command finished"),
                Ok(Err(e)) => {
                    warn!(command, error = %e, "command failed");
                    set_error(&state, e.to_string());
                }
                Err(e) => {
                    warn!(command, error = %e, "command panicked");
                    set_error(&state, e.to_string());
                }
            }
        });

        CommandHandle {
            inner: Some(handle),
        }
    }

    pub fn add_task(&self, task: Task) -> CommandHandle {
        if task.title.trim().is_empty() {
            return self.reject("add_task", EMPTY_TITLE);
        }
        self.launch("add_task", move |repo| repo.insert_task(&task).map(|_| ()))
    }

    pub fn update_task(&self, task: Task) -> CommandHandle {
        if task.title.trim().is_empty() {
            return self.reject("update_task", EMPTY_TITLE);
        }
        self.launch("update_task", move |repo| repo.update_task(&task))
    }

    pub fn delete_task(&self, task: Task) -> CommandHandle {
        self.launch("delete_task", move |repo| repo.delete_task(&task).map(|_| ()))
    }

    pub fn restore_task(&self, entry: RecycleBinEntry) -> CommandHandle {
        self.launch("restore_task", move |repo| repo.restore_task(&entry).map(|_| ()))
    }

    pub fn permanently_delete_task(&self, entry: RecycleBinEntry) -> CommandHandle {
        self.launch("permanently_delete_task", move |repo| {
            repo.permanently_delete_task(&entry)
        })
    }

    pub fn clear_recycle_bin(&self) -> CommandHandle {
        self.launch("clear_recycle_bin", |repo| repo.clear_recycle_bin())
    }

    pub fn add_category(&self, category: Category) -> CommandHandle {
        if category.name.trim().is_empty() {
            return self.reject("add_category", EMPTY_CATEGORY_NAME);
        }
        self.launch("add_category", move |repo| {
            repo.insert_category(&category).map(|_| ())
        })
    }

    pub fn update_category(&self, category: Category) -> CommandHandle {
        if category.name.trim().is_empty() {
            return self.reject("update_category", EMPTY_CATEGORY_NAME);
        }
        self.launch("update_category", move |repo| repo.update_category(&category))
    }

    pub fn delete_category(&self, category: Category) -> CommandHandle {
        self.launch("delete_category", move |repo| repo.delete_category(&category))
    }

    /// Look up a task in the current snapshot (not the database).
    pub fn get_task_by_id(&self, id: i64) -> Option<Task> {
        self.state
            .borrow()
            .tasks
            .iter()
            .find(|t| t.id == Some(id))
            .cloned()
    }

    /// Look up a category in the current snapshot (not the database).
    pub fn get_category_by_id(&self, id: i64) -> Option<Category> {
        self.state
            .borrow()
            .categories
            .iter()
            .find(|c| c.id == Some(id))
            .cloned()
    }

    pub fn set_selected_task(&self, task: Option<Task>) {
        replace_state(&self.state, |s| UiState {
            selected_task: task,
            ..s.clone()
        });
    }

    pub fn clear_error(&self) {
        replace_state(&self.state, |s| UiState {
            error: None,
            ..s.clone()
        });
    }

    /// Cancel the subscriptions and any running command, then wait for them to stop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("aggregator stopped");
    }
}

impl Drop for TaskAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::live::Table;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn day(n: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, n, 8, 0, 0).unwrap()
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<Arc<UiState>>, pred: F) -> Arc<UiState>
    where
        F: Fn(&UiState) -> bool,
    {
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("state never converged")
            .expect("aggregator dropped");
        Arc::clone(&state)
    }

    fn setup() -> (Database, TaskAggregator) {
        let db = Database::in_memory().unwrap();
        let aggregator = TaskAggregator::new(TaskRepository::new(db.clone()));
        (db, aggregator)
    }

    #[tokio::test]
    async fn picks_up_existing_rows_on_start() {
        let db = Database::in_memory().unwrap();
        db.insert_task(&Task::new("existing".to_string(), day(1))).unwrap();
        db.insert_category(&Category::new("Work".to_string(), 0xFF0000)).unwrap();

        let aggregator = TaskAggregator::new(TaskRepository::new(db));
        let mut rx = aggregator.subscribe();
        let state = wait_for(&mut rx, |s| s.tasks.len() == 1 && s.categories.len() == 1).await;
        assert_eq!(state.tasks[0].title, "existing");
        assert!(state.deleted_tasks.is_empty());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let (db, aggregator) = setup();
        let handle = aggregator.add_task(Task::new("   ".to_string(), day(1)));
        assert!(handle.is_rejected());
        handle.finished().await;

        let state = aggregator.state();
        assert_eq!(state.error.as_deref(), Some(EMPTY_TITLE));
        assert!(!state.is_loading);
        assert!(db.get_all_tasks().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_category_name_is_rejected() {
        let (db, aggregator) = setup();
        let handle = aggregator.update_category(Category::new("".to_string(), 0));
        assert!(handle.is_rejected());
        assert_eq!(aggregator.state().error.as_deref(), Some(EMPTY_CATEGORY_NAME));
        assert!(db.get_all_categories().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_task_shows_up_in_state() {
        let (_db, aggregator) = setup();
        let mut rx = aggregator.subscribe();

        let handle = aggregator.add_task(Task::new("Buy milk".to_string(), day(2)));
        assert!(aggregator.state().is_loading);
        handle.finished().await;

        let state = wait_for(&mut rx, |s| s.tasks.len() == 1).await;
        assert!(!state.is_loading);
        assert_eq!(state.error, None);
        let id = state.tasks[0].id.unwrap();
        assert_eq!(aggregator.get_task_by_id(id).unwrap().title, "Buy milk");
        assert!(aggregator.get_task_by_id(id + 1).is_none());
    }

    #[tokio::test]
    async fn failure_sets_error_and_success_keeps_it() {
        let (_db, aggregator) = setup();
        let mut orphan = Task::new("orphan".to_string(), day(1));
        orphan.category_id = Some(404);
        aggregator.add_task(orphan).finished().await;

        let state = aggregator.state();
        assert!(state.error.is_some());
        assert!(!state.is_loading);

        aggregator
            .add_category(Category::new("Home".to_string(), 0x00FF00))
            .finished()
            .await;
        assert!(aggregator.state().error.is_some());

        aggregator.clear_error();
        assert_eq!(aggregator.state().error, None);
    }

    #[tokio::test]
    async fn delete_and_restore_through_commands() {
        let (_db, aggregator) = setup();
        let mut rx = aggregator.subscribe();
        aggregator
            .add_task(Task::new("Buy milk".to_string(), day(3)))
            .finished()
            .await;
        let state = wait_for(&mut rx, |s| s.tasks.len() == 1).await;
        let task = state.tasks[0].clone();

        aggregator.delete_task(task.clone()).finished().await;
        let state = wait_for(&mut rx, |s| s.tasks.is_empty() && s.deleted_tasks.len() == 1).await;
        let entry = state.deleted_tasks[0].clone();
        assert_eq!(Some(entry.task_id), task.id);

        aggregator.restore_task(entry).finished().await;
        let state = wait_for(&mut rx, |s| s.tasks.len() == 1 && s.deleted_tasks.is_empty()).await;
        assert_eq!(
            Task {
                updated_at: task.updated_at,
                ..state.tasks[0].clone()
            },
            task
        );
    }

    #[tokio::test]
    async fn category_lookup_and_delete() {
        let (db, aggregator) = setup();
        let mut rx = aggregator.subscribe();
        let work = db.insert_category(&Category::new("Work".to_string(), 0xFF0000)).unwrap();
        let mut task = Task::new("report".to_string(), day(4));
        task.category_id = Some(work);
        db.insert_task(&task).unwrap();

        wait_for(&mut rx, |s| s.categories.len() == 1 && s.tasks.len() == 1).await;
        let category = aggregator.get_category_by_id(work).unwrap();

        aggregator.delete_category(category).finished().await;
        let state = wait_for(&mut rx, |s| {
            s.categories.is_empty() && s.tasks.iter().all(|t| t.category_id.is_none())
        })
        .await;
        assert_eq!(state.tasks.len(), 1);
        assert!(aggregator.get_category_by_id(work).is_none());
    }

    #[tokio::test]
    async fn selected_task_is_independent() {
        let (_db, aggregator) = setup();
        let task = Task::new("pick me".to_string(), day(5));
        aggregator.set_selected_task(Some(task.clone()));
        assert_eq!(aggregator.state().selected_task, Some(task));
        aggregator.set_selected_task(None);
        assert_eq!(aggregator.state().selected_task, None);
    }

    #[tokio::test]
    async fn failed_subscription_leaves_other_slices_running() {
        let (db, aggregator) = setup();
        let mut rx = aggregator.subscribe();
        // Let all three subscriptions take their first snapshot.
        db.insert_category(&Category::new("Work".to_string(), 1)).unwrap();
        wait_for(&mut rx, |s| s.categories.len() == 1).await;

        db.with_conn(|conn| {
            conn.execute_batch("DELETE FROM categories; DROP TABLE categories;")?;
            Ok(())
        })
        .unwrap();
        db.notify(Table::Categories);
        let state = wait_for(&mut rx, |s| s.error.is_some()).await;
        assert_eq!(state.categories.len(), 1);

        aggregator.clear_error();
        db.with_conn(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
            Ok(())
        })
        .unwrap();
        db.insert_task(&Task::new("still live".to_string(), day(6))).unwrap();
        let state = wait_for(&mut rx, |s| s.tasks.len() == 1).await;
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn shutdown_stops_updates() {
        let (db, aggregator) = setup();
        let mut rx = aggregator.subscribe();
        wait_for(&mut rx, |s| s.tasks.is_empty()).await;

        aggregator.shutdown().await;
        db.insert_task(&Task::new("after".to_string(), day(7))).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.borrow().tasks.is_empty());
    }

    #[tokio::test]
    async fn command_cancelled_mid_flight_leaves_slots_alone() {
        let (db, aggregator) = setup();
        let mut rx = aggregator.subscribe();

        let holder = db.clone();
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let writer = std::thread::spawn(move || {
            holder.with_conn(|_| {
                let _ = locked_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
        });
        locked_rx.await.unwrap();

        // Fails on the foreign key once it gets the connection.
        let mut orphan = Task::new("orphan".to_string(), day(8));
        orphan.category_id = Some(404);
        let handle = aggregator.add_task(orphan);
        assert!(aggregator.state().is_loading);

        aggregator.shutdown().await;
        handle.finished().await;
        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = rx.borrow_and_update().clone();
        assert_eq!(state.error, None);
        assert!(state.is_loading);
        assert!(db.get_all_tasks().unwrap().is_empty());
    }
}
