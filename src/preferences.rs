//! Durable user preferences with live observation.
//!
//! Values live in `<dir>/<namespace>.toml`. Keys that were never set are
//! left out of the file and read back as their defaults.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

pub const DEFAULT_NAMESPACE: &str = "settings";

/// Number of selectable theme colors; valid indices are `0..THEME_COLOR_COUNT`.
pub const THEME_COLOR_COUNT: u8 = 5;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("Failed to read preferences: {0}")]
    ReadError(String),
    #[error("Failed to parse preferences: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write preferences: {0}")]
    WriteError(String),
    #[error("Theme color {0} out of range (0-{max})", max = THEME_COLOR_COUNT - 1)]
    InvalidThemeColor(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListViewType {
    #[default]
    List,
    Grid,
}

impl ListViewType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListViewType::List => "list",
            ListViewType::Grid => "grid",
        }
    }
}

impl fmt::Display for ListViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ListViewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(ListViewType::List),
            "grid" => Ok(ListViewType::Grid),
            other => Err(format!("unknown list view type: {other}")),
        }
    }
}

/// What is actually on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    theme_color: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dark_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_view_type: Option<ListViewType>,
}

/// Resolved preferences, defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preferences {
    pub theme_color: u8,
    pub dark_mode: bool,
    pub list_view_type: ListViewType,
}

impl From<&StoredPreferences> for Preferences {
    fn from(stored: &StoredPreferences) -> Self {
        Self {
            theme_color: stored.theme_color.unwrap_or(0),
            dark_mode: stored.dark_mode.unwrap_or(false),
            list_view_type: stored.list_view_type.unwrap_or_default(),
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::from(&StoredPreferences::default())
    }
}

pub struct PreferenceStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    tx: watch::Sender<StoredPreferences>,
}

impl PreferenceStore {
    /// Open the store in `<dir>/<namespace>.toml`, reading existing values.
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, PreferenceError> {
        let path = dir.join(format!("{namespace}.toml"));

        let stored = if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| PreferenceError::ReadError(e.to_string()))?;
            toml::from_str(&contents)?
        } else {
            StoredPreferences::default()
        };

        debug!(path = %path.display(), "preferences loaded");
        let (tx, _) = watch::channel(stored);
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Preferences {
        Preferences::from(&*self.tx.borrow())
    }

    pub fn observe_theme_color(&self) -> PreferenceStream<u8> {
        PreferenceStream::new(self.tx.subscribe(), |p| p.theme_color)
    }

    pub fn observe_dark_mode(&self) -> PreferenceStream<bool> {
        PreferenceStream::new(self.tx.subscribe(), |p| p.dark_mode)
    }

    pub fn observe_list_view_type(&self) -> PreferenceStream<ListViewType> {
        PreferenceStream::new(self.tx.subscribe(), |p| p.list_view_type)
    }

    pub fn set_theme_color(&self, color: u8) -> Result<(), PreferenceError> {
        if color >= THEME_COLOR_COUNT {
            return Err(PreferenceError::InvalidThemeColor(color));
        }
        self.edit(|p| p.theme_color = Some(color))
    }

    pub fn set_dark_mode(&self, dark_mode: bool) -> Result<(), PreferenceError> {
        self.edit(|p| p.dark_mode = Some(dark_mode))
    }

    pub fn set_list_view_type(&self, view_type: ListViewType) -> Result<(), PreferenceError> {
        self.edit(|p| p.list_view_type = Some(view_type))
    }

    /// Apply `f`, persist, then publish. Observers only see values that made it to disk.
    fn edit<F>(&self, f: F) -> Result<(), PreferenceError>
    where
        F: FnOnce(&mut StoredPreferences),
    {
        let _guard = self.write_lock.lock();

        let mut next = (*self.tx.borrow()).clone();
        f(&mut next);
        self.persist(&next)?;

        info!(path = %self.path.display(), "preferences saved");
        self.tx.send_replace(next);
        Ok(())
    }

    fn persist(&self, stored: &StoredPreferences) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PreferenceError::WriteError(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(stored)
            .map_err(|e| PreferenceError::WriteError(format!("Failed to serialize preferences: {}", e)))?;

        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, toml_string).map_err(|e| PreferenceError::WriteError(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| PreferenceError::WriteError(e.to_string()))?;
        Ok(())
    }
}

/// Live value of one preference key.
///
/// The first [`next`](Self::next) returns the current value; later calls wait
/// until this key's value actually changes.
pub struct PreferenceStream<T> {
    rx: watch::Receiver<StoredPreferences>,
    project: fn(&Preferences) -> T,
    last: Option<T>,
}

impl<T: Copy + PartialEq> PreferenceStream<T> {
    fn new(rx: watch::Receiver<StoredPreferences>, project: fn(&Preferences) -> T) -> Self {
        Self {
            rx,
            project,
            last: None,
        }
    }

    pub fn current(&self) -> T {
        (self.project)(&Preferences::from(&*self.rx.borrow()))
    }

    /// Returns `None` once the store has been dropped.
    pub async fn next(&mut self) -> Option<T> {
        if self.last.is_none() {
            let value = (self.project)(&Preferences::from(&*self.rx.borrow_and_update()));
            self.last = Some(value);
            return Some(value);
        }

        loop {
            self.rx.changed().await.ok()?;
            let value = (self.project)(&Preferences::from(&*self.rx.borrow_and_update()));
            if self.last != Some(value) {
                self.last = Some(value);
                return Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        assert_eq!(
            store.snapshot(),
            Preferences {
                theme_color: 0,
                dark_mode: false,
                list_view_type: ListViewType::List,
            }
        );
        assert!(!store.path().exists());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = PreferenceStore::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
            store.set_theme_color(3).unwrap();
            store.set_list_view_type(ListViewType::Grid).unwrap();
        }

        let store = PreferenceStore::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        let prefs = store.snapshot();
        assert_eq!(prefs.theme_color, 3);
        assert!(!prefs.dark_mode);
        assert_eq!(prefs.list_view_type, ListViewType::Grid);

        let on_disk = fs::read_to_string(dir.path().join("settings.toml")).unwrap();
        assert!(on_disk.contains("theme_color = 3"));
        assert!(on_disk.contains("list_view_type = \"grid\""));
        assert!(!on_disk.contains("dark_mode"));
    }

    #[test]
    fn theme_color_out_of_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path(), DEFAULT_NAMESPACE).unwrap();
        assert!(matches!(
            store.set_theme_color(5),
            Err(PreferenceError::InvalidThemeColor(5))
        ));
        assert_eq!(store.snapshot().theme_color, 0);
    }

    #[test]
    fn list_view_type_parses() {
        assert_eq!("Grid".parse::<ListViewType>().unwrap(), ListViewType::Grid);
        assert!("table".parse::<ListViewType>().is_err());
    }

    #[tokio::test]
    async fn observers_see_their_key_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path(), "prefs").unwrap();
        let mut dark = store.observe_dark_mode();
        let mut theme = store.observe_theme_color();
        assert_eq!(dark.next().await, Some(false));
        assert_eq!(theme.next().await, Some(0));

        store.set_dark_mode(true).unwrap();
        assert_eq!(dark.next().await, Some(true));

        let woke = tokio::time::timeout(Duration::from_millis(50), theme.next()).await;
        assert!(woke.is_err());

        store.set_theme_color(2).unwrap();
        assert_eq!(theme.next().await, Some(2));
        assert_eq!(theme.current(), 2);
    }
}
