//! Persisted operator settings.
//!
//! The settings only decide how each run's item set is built; they are read
//! once per run so changes apply on the next start.

pub mod store;

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

use crate::error::ConfigError;
use crate::items::FilePattern;

pub use store::{CachedStore, EnvOverride, KeyValueStore, KeyValueStoreExt, MemoryStore, TomlFileStore};

/// Application name, used for the settings directory.
pub const APP_NAME: &str = "tidy-monster";
/// Prefix of environment variables overriding settings.
pub const ENV_PREFIX: &str = "TIDY_MONSTER";

pub const TIDY_ALL_USERS: &str = "TidyAllUsers";
pub const SHORTCUT_FILTER: &str = "ShortcutFilter";
pub const MINIMUM_SEVERITY: &str = "MinimumSeverity";
pub const SEARCH_PATTERN: &str = "SearchPattern";
pub const EXTRA_DIRECTORIES: &str = "ExtraDirectories";

/// Every key the application understands.
pub const KNOWN_KEYS: &[&str] = &[
    TIDY_ALL_USERS,
    SHORTCUT_FILTER,
    MINIMUM_SEVERITY,
    SEARCH_PATTERN,
    EXTRA_DIRECTORIES,
];

/// Shortcut pattern watched when none is configured.
#[cfg(windows)]
pub const DEFAULT_SEARCH_PATTERN: &str = "*.lnk";
#[cfg(not(windows))]
pub const DEFAULT_SEARCH_PATTERN: &str = "*.desktop";

/// Which shortcuts get tidied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ShortcutFilter {
    /// Every shortcut matching the search pattern.
    All,
    /// Only shortcuts that launch an application.
    #[default]
    Apps,
}

impl fmt::Display for ShortcutFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortcutFilter::All => write!(f, "all"),
            ShortcutFilter::Apps => write!(f, "apps"),
        }
    }
}

impl FromStr for ShortcutFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ShortcutFilter::All),
            "apps" => Ok(ShortcutFilter::Apps),
            other => Err(format!("unknown shortcut filter: {}", other)),
        }
    }
}

/// Everything needed to build one run's item set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    /// The current user's desktop, or directories given on the command line.
    pub directories: Vec<PathBuf>,
    /// Shared desktops, watched when `tidy_all_users` is set.
    pub shared_directories: Vec<PathBuf>,
    pub tidy_all_users: bool,
    pub filter: ShortcutFilter,
    pub pattern: String,
}

impl WatchSettings {
    /// Read settings, filling gaps with platform defaults.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let directories = dirs::desktop_dir().into_iter().collect();
        let shared_directories = match store.read(EXTRA_DIRECTORIES)? {
            Some(list) => split_directories(&list),
            None => default_shared_desktops(),
        };

        Ok(Self {
            directories,
            shared_directories,
            tidy_all_users: store.read_parsed::<bool>(TIDY_ALL_USERS)?.unwrap_or(true),
            filter: store.read_parsed::<ShortcutFilter>(SHORTCUT_FILTER)?.unwrap_or_default(),
            pattern: store
                .read(SEARCH_PATTERN)?
                .unwrap_or_else(|| DEFAULT_SEARCH_PATTERN.to_string()),
        })
    }

    /// Directories to watch for this run, without duplicates.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut watched: Vec<PathBuf> = Vec::new();
        let shared = if self.tidy_all_users {
            self.shared_directories.as_slice()
        } else {
            &[]
        };
        for dir in self.directories.iter().chain(shared) {
            if !watched.contains(dir) {
                watched.push(dir.clone());
            }
        }
        watched
    }
}

/// Check a value before it is stored under `key`.
pub fn validate(key: &str, value: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    };
    let valid = match key {
        TIDY_ALL_USERS => value.trim().parse::<bool>().is_ok(),
        SHORTCUT_FILTER => value.parse::<ShortcutFilter>().is_ok(),
        MINIMUM_SEVERITY => value.trim().parse::<Level>().is_ok(),
        SEARCH_PATTERN => FilePattern::new(value).is_ok(),
        EXTRA_DIRECTORIES => true,
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Minimum log level from settings, `info` when unset.
pub fn minimum_severity(store: &dyn KeyValueStore) -> Result<Level> {
    Ok(store.read_parsed::<Level>(MINIMUM_SEVERITY)?.unwrap_or(Level::INFO))
}

/// Split a `;`-separated directory list.
pub fn split_directories(list: &str) -> Vec<PathBuf> {
    list.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(windows)]
fn default_shared_desktops() -> Vec<PathBuf> {
    std::env::var_os("PUBLIC")
        .map(|public| vec![PathBuf::from(public).join("Desktop")])
        .unwrap_or_default()
}

#[cfg(not(windows))]
fn default_shared_desktops() -> Vec<PathBuf> {
    Vec::new()
}
