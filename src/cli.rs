use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::aggregator::{EMPTY_CATEGORY_NAME, EMPTY_TITLE};
use crate::database::DatabaseError;
use crate::models::{Category, Priority, RecycleBinEntry, Task};
use crate::preferences::{ListViewType, PreferenceError, PreferenceStore};
use crate::repository::TaskRepository;
use crate::utils::{format_timestamp, parse_argb, parse_due_date};

#[derive(Parser)]
#[command(name = "tasklog")]
#[command(about = "Tasks, categories and a recycle bin")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new task
    AddTask {
        /// Task title
        title: String,
        /// Due date (YYYY-MM-DD or "YYYY-MM-DD HH:MM")
        #[arg(long)]
        due: String,
        /// Longer description
        #[arg(long, default_value = "")]
        description: String,
        /// LOW, MEDIUM or HIGH
        #[arg(long, default_value = "MEDIUM")]
        priority: Priority,
        /// Category id
        #[arg(long)]
        category: Option<i64>,
    },
    /// List tasks by due date
    List(ListArgs),
    /// Mark a task as completed (or pending again with --undo)
    Complete {
        id: i64,
        #[arg(long)]
        undo: bool,
    },
    /// Move a task to the recycle bin
    Delete { id: i64 },
    /// Show the recycle bin, most recently deleted first
    Bin {
        #[arg(long)]
        json: bool,
    },
    /// Restore a recycle bin entry
    Restore { entry_id: i64 },
    /// Permanently remove a recycle bin entry
    Purge { entry_id: i64 },
    /// Permanently remove everything in the recycle bin
    EmptyBin,
    /// Add a new category
    AddCategory {
        name: String,
        /// Color as #RRGGBB or #AARRGGBB
        #[arg(long, default_value = "#2196F3")]
        color: String,
    },
    /// List categories by name
    Categories {
        #[arg(long)]
        json: bool,
    },
    /// Delete a category; its tasks keep existing without one
    DeleteCategory { id: i64 },
    /// Show or change preferences
    Settings(SettingsArgs),
}

#[derive(Args)]
pub struct ListArgs {
    /// Only completed tasks
    #[arg(long, conflicts_with = "pending")]
    pub completed: bool,
    /// Only pending tasks
    #[arg(long)]
    pub pending: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SettingsArgs {
    /// Theme color index (0-4)
    #[arg(long)]
    pub theme_color: Option<u8>,
    #[arg(long)]
    pub dark_mode: Option<bool>,
    /// list or grid
    #[arg(long)]
    pub view: Option<ListViewType>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Preference error: {0}")]
    PreferenceError(#[from] PreferenceError),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Failed to encode JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        let mark = if task.is_completed { "x" } else { " " };
        let category = task
            .category_id
            .map(|c| format!(" #{c}"))
            .unwrap_or_default();
        println!(
            "[{mark}] {:>4}  {}  {:<6}  {}{}",
            task.id.unwrap_or_default(),
            format_timestamp(&task.due_date),
            task.priority,
            task.title,
            category
        );
    }
}

fn print_bin(entries: &[RecycleBinEntry]) {
    if entries.is_empty() {
        println!("Recycle bin is empty.");
        return;
    }
    for entry in entries {
        println!(
            "{:>4}  task {:>4}  deleted {}  {}",
            entry.id.unwrap_or_default(),
            entry.task_id,
            format_timestamp(&entry.deleted_at),
            entry.title
        );
    }
}

/// Handle the add-task command
pub fn handle_add_task(
    title: String,
    due: String,
    description: String,
    priority: Priority,
    category: Option<i64>,
    repo: &TaskRepository,
) -> Result<(), CliError> {
    if title.trim().is_empty() {
        return Err(CliError::InvalidInput(EMPTY_TITLE.to_string()));
    }
    let due_date = parse_due_date(&due)
        .map_err(|e| CliError::DateParseError(format!("Invalid date format '{}': {}", due, e)))?;
    if let Some(id) = category {
        if repo.get_category_by_id(id)?.is_none() {
            return Err(CliError::NotFound(format!("Category {id}")));
        }
    }

    let mut task = Task::new(title, due_date);
    task.description = description;
    task.priority = priority;
    task.category_id = category;

    let id = repo.insert_task(&task)?;
    println!("Task created successfully (ID: {})", id);
    Ok(())
}

pub fn handle_list(args: ListArgs, repo: &TaskRepository) -> Result<(), CliError> {
    let db = repo.database();
    let tasks = if args.completed {
        db.get_tasks_by_completion(true)?
    } else if args.pending {
        db.get_tasks_by_completion(false)?
    } else {
        db.get_all_tasks()?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        print_tasks(&tasks);
    }
    Ok(())
}

pub fn handle_complete(id: i64, undo: bool, repo: &TaskRepository) -> Result<(), CliError> {
    let mut task = repo
        .get_task_by_id(id)?
        .ok_or_else(|| CliError::NotFound(format!("Task {id}")))?;
    task.is_completed = !undo;
    repo.update_task(&task)?;
    println!("Task {} marked {}", id, if undo { "pending" } else { "completed" });
    Ok(())
}

pub fn handle_delete(id: i64, repo: &TaskRepository) -> Result<(), CliError> {
    let task = repo
        .get_task_by_id(id)?
        .ok_or_else(|| CliError::NotFound(format!("Task {id}")))?;
    let entry_id = repo.delete_task(&task)?;
    println!("Task {} moved to recycle bin (entry {})", id, entry_id);
    Ok(())
}

pub fn handle_bin(json: bool, repo: &TaskRepository) -> Result<(), CliError> {
    let entries = repo.database().get_all_recycle_bin_entries()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_bin(&entries);
    }
    Ok(())
}

fn bin_entry(entry_id: i64, repo: &TaskRepository) -> Result<RecycleBinEntry, CliError> {
    repo.database()
        .get_recycle_bin_entry(entry_id)?
        .ok_or_else(|| CliError::NotFound(format!("Recycle bin entry {entry_id}")))
}

pub fn handle_restore(entry_id: i64, repo: &TaskRepository) -> Result<(), CliError> {
    let entry = bin_entry(entry_id, repo)?;
    let task_id = repo.restore_task(&entry)?;
    println!("Task {} restored", task_id);
    Ok(())
}

pub fn handle_purge(entry_id: i64, repo: &TaskRepository) -> Result<(), CliError> {
    let entry = bin_entry(entry_id, repo)?;
    repo.permanently_delete_task(&entry)?;
    println!("Entry {} permanently deleted", entry_id);
    Ok(())
}

pub fn handle_empty_bin(repo: &TaskRepository) -> Result<(), CliError> {
    repo.clear_recycle_bin()?;
    println!("Recycle bin emptied");
    Ok(())
}

pub fn handle_add_category(name: String, color: String, repo: &TaskRepository) -> Result<(), CliError> {
    if name.trim().is_empty() {
        return Err(CliError::InvalidInput(EMPTY_CATEGORY_NAME.to_string()));
    }
    let color = parse_argb(&color).map_err(CliError::InvalidInput)?;
    let id = repo.insert_category(&Category::new(name, color))?;
    println!("Category created successfully (ID: {})", id);
    Ok(())
}

pub fn handle_categories(json: bool, repo: &TaskRepository) -> Result<(), CliError> {
    let categories = repo.database().get_all_categories()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
        return Ok(());
    }
    if categories.is_empty() {
        println!("No categories.");
    }
    for category in &categories {
        println!(
            "{:>4}  #{:08X}  {}",
            category.id.unwrap_or_default(),
            category.color,
            category.name
        );
    }
    Ok(())
}

pub fn handle_delete_category(id: i64, repo: &TaskRepository) -> Result<(), CliError> {
    let category = repo
        .get_category_by_id(id)?
        .ok_or_else(|| CliError::NotFound(format!("Category {id}")))?;
    repo.delete_category(&category)?;
    println!("Category {} deleted", id);
    Ok(())
}

pub fn handle_settings(args: SettingsArgs, prefs: &PreferenceStore) -> Result<(), CliError> {
    if let Some(color) = args.theme_color {
        prefs.set_theme_color(color)?;
    }
    if let Some(dark_mode) = args.dark_mode {
        prefs.set_dark_mode(dark_mode)?;
    }
    if let Some(view) = args.view {
        prefs.set_list_view_type(view)?;
    }

    let current = prefs.snapshot();
    println!("theme_color    = {}", current.theme_color);
    println!("dark_mode      = {}", current.dark_mode);
    println!("list_view_type = {}", current.list_view_type);
    Ok(())
}

/// Dispatch a parsed command
pub fn run(command: Commands, repo: &TaskRepository, prefs: &PreferenceStore) -> Result<(), CliError> {
    match command {
        Commands::AddTask {
            title,
            due,
            description,
            priority,
            category,
        } => handle_add_task(title, due, description, priority, category, repo),
        Commands::List(args) => handle_list(args, repo),
        Commands::Complete { id, undo } => handle_complete(id, undo, repo),
        Commands::Delete { id } => handle_delete(id, repo),
        Commands::Bin { json } => handle_bin(json, repo),
        Commands::Restore { entry_id } => handle_restore(entry_id, repo),
        Commands::Purge { entry_id } => handle_purge(entry_id, repo),
        Commands::EmptyBin => handle_empty_bin(repo),
        Commands::AddCategory { name, color } => handle_add_category(name, color, repo),
        Commands::Categories { json } => handle_categories(json, repo),
        Commands::DeleteCategory { id } => handle_delete_category(id, repo),
        Commands::Settings(args) => handle_settings(args, prefs),
    }
}
