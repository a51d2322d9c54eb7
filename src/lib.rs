pub mod aggregator;
pub mod cli;
pub mod config;
pub mod database;
pub mod live;
pub mod logging;
pub mod models;
pub mod preferences;
pub mod repository;
pub mod utils;

pub use aggregator::{CommandHandle, TaskAggregator, UiState};
pub use config::Config;
pub use database::{Database, DatabaseError};
pub use live::{Subscription, Table};
pub use models::{Category, Priority, RecycleBinEntry, Task};
pub use preferences::{ListViewType, PreferenceStore, Preferences};
pub use repository::TaskRepository;
pub use utils::Profile;
