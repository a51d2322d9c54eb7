use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    pub fn app_name(&self) -> &'static str {
        match self {
            Profile::Dev => "tasklog-dev",
            Profile::Prod => "tasklog",
        }
    }
}

/// Get the configuration directory path
/// If profile is Dev, uses "tasklog-dev" instead of "tasklog"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "tasklog", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path
/// If profile is Dev, uses "tasklog-dev" instead of "tasklog"
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "tasklog", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a due date given as `YYYY-MM-DD` (midnight UTC) or `YYYY-MM-DD HH:MM`
pub fn parse_due_date(input: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let input = input.trim();
    match NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        Ok(dt) => Ok(dt.and_utc()),
        Err(_) => {
            let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")?;
            Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
        }
    }
}

/// Format a timestamp for terminal output
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

/// Parse an ARGB color written as `#RRGGBB`, `#AARRGGBB` or `0x…`.
/// Six-digit colors get a fully opaque alpha channel.
pub fn parse_argb(input: &str) -> Result<u32, String> {
    let hex = input
        .trim()
        .trim_start_matches('#')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid color '{input}': expected hex digits only"));
    }
    let value = u32::from_str_radix(hex, 16).map_err(|e| format!("invalid color '{input}': {e}"))?;
    match hex.len() {
        6 => Ok(0xFF00_0000 | value),
        8 => Ok(value),
        _ => Err(format!("invalid color '{input}': expected 6 or 8 hex digits")),
    }
}
