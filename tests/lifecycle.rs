use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tasklog::{Category, Database, TaskAggregator, Task, TaskRepository, UiState};
use tokio::sync::watch;

async fn settle<F>(rx: &mut watch::Receiver<Arc<UiState>>, pred: F) -> Arc<UiState>
where
    F: Fn(&UiState) -> bool,
{
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
        .await
        .expect("state never converged")
        .expect("aggregator gone");
    Arc::clone(&state)
}

fn due(day: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, day, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn work_and_home_categories() {
    let db = Database::in_memory().unwrap();
    let repo = TaskRepository::new(db.clone());
    let aggregator = TaskAggregator::new(repo.clone());
    let mut rx = aggregator.subscribe();

    aggregator
        .add_category(Category::new("Work".to_string(), 0xFF0000))
        .finished()
        .await;
    aggregator
        .add_category(Category::new("Home".to_string(), 0x00FF00))
        .finished()
        .await;
    let state = settle(&mut rx, |s| s.categories.len() == 2).await;
    let names: Vec<_> = state.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Home", "Work"]);

    let work = state.categories[1].clone();
    let mut task = Task::new("Quarterly report".to_string(), due(1));
    task.category_id = work.id;
    aggregator.add_task(task).finished().await;
    settle(&mut rx, |s| s.tasks.len() == 1).await;

    aggregator.delete_category(work).finished().await;
    let state = settle(&mut rx, |s| {
        s.categories.len() == 1 && s.tasks.iter().all(|t| t.category_id.is_none())
    })
    .await;
    assert_eq!(state.categories[0].name, "Home");
    assert_eq!(state.error, None);
    assert_eq!(repo.get_task_by_id(state.tasks[0].id.unwrap()).unwrap().unwrap().category_id, None);

    aggregator.shutdown().await;
}

#[tokio::test]
async fn clearing_the_bin_twice_is_quiet() {
    let db = Database::in_memory().unwrap();
    let aggregator = TaskAggregator::new(TaskRepository::new(db.clone()));
    let mut rx = aggregator.subscribe();

    for day in [1, 2] {
        aggregator
            .add_task(Task::new(format!("t{day}"), due(day)))
            .finished()
            .await;
    }
    let state = settle(&mut rx, |s| s.tasks.len() == 2).await;
    for task in state.tasks.iter().cloned() {
        aggregator.delete_task(task).finished().await;
    }
    settle(&mut rx, |s| s.deleted_tasks.len() == 2).await;

    aggregator.clear_recycle_bin().finished().await;
    settle(&mut rx, |s| s.deleted_tasks.is_empty()).await;
    aggregator.clear_recycle_bin().finished().await;

    let state = aggregator.state();
    assert!(state.deleted_tasks.is_empty());
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
    assert!(db.get_all_recycle_bin_entries().unwrap().is_empty());
}

#[tokio::test]
async fn interleaved_writes_converge_to_latest_of_each_table() {
    let db = Database::in_memory().unwrap();
    let aggregator = TaskAggregator::new(TaskRepository::new(db.clone()));
    let mut rx = aggregator.subscribe();

    let writers = [
        {
            let db = db.clone();
            tokio::task::spawn_blocking(move || {
                for day in [3, 1, 2] {
                    db.insert_task(&Task::new(format!("task {day}"), due(day))).unwrap();
                }
            })
        },
        {
            let db = db.clone();
            tokio::task::spawn_blocking(move || {
                for name in ["b", "a", "c"] {
                    db.insert_category(&Category::new(name.to_string(), 0)).unwrap();
                }
            })
        },
        {
            let db = db.clone();
            tokio::task::spawn_blocking(move || {
                for id in 100..103 {
                    let mut task = Task::new(format!("gone {id}"), due(9));
                    task.id = Some(id);
                    let entry = tasklog::RecycleBinEntry::from_task(&task).unwrap();
                    db.insert_recycle_bin_entry(&entry).unwrap();
                }
            })
        },
    ];
    for writer in writers {
        writer.await.unwrap();
    }

    let state = settle(&mut rx, |s| {
        s.tasks.len() == 3 && s.categories.len() == 3 && s.deleted_tasks.len() == 3
    })
    .await;

    assert_eq!(state.tasks, db.get_all_tasks().unwrap());
    assert_eq!(state.categories, db.get_all_categories().unwrap());
    assert_eq!(state.deleted_tasks, db.get_all_recycle_bin_entries().unwrap());

    let titles: Vec<_> = state.tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, ["task 1", "task 2", "task 3"]);
    let names: Vec<_> = state.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
}
