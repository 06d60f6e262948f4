//! Key/value settings stores.
//!
//! Values are strings at this layer; typed access goes through
//! [`KeyValueStoreExt`]. Stores compose: a [`CachedStore`] over an
//! [`EnvOverride`] over a [`TomlFileStore`] is what the binary uses.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::ConfigError;
use crate::items::lock;

/// A small persisted key/value store.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Typed reads on top of any store.
pub trait KeyValueStoreExt {
    /// Read and parse `key`. An unparsable value is an error, not absence.
    fn read_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {
    fn read_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.read(key)? {
            None => Ok(None),
            Some(value) => match value.trim().parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(ConfigError::InvalidSetting {
                    key: key.to_string(),
                    value,
                }
                .into()),
            },
        }
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Settings persisted as a flat TOML table.
#[derive(Debug)]
pub struct TomlFileStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/<app_name>/settings.toml`.
    pub fn default_location(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir().context("No configuration directory on this platform")?;
        Ok(Self::new(config_dir.join(app_name).join("settings.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<toml::Table> {
        match fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse settings file: {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read settings file: {}", self.path.display())),
        }
    }
}

impl KeyValueStore for TomlFileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut table = self.load()?;
        table.insert(key.to_string(), typed_value(value));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string(&table).context("Failed to serialize settings")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write settings file: {}", self.path.display()))?;
        Ok(())
    }
}

/// Keep booleans and integers typed in the file so it stays hand-editable.
fn typed_value(value: &str) -> toml::Value {
    if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Environment variables take precedence over the inner store on read.
///
/// `TidyAllUsers` with prefix `TIDY_MONSTER` is looked up as
/// `TIDY_MONSTER_TIDY_ALL_USERS`.
pub struct EnvOverride<S> {
    prefix: String,
    inner: S,
}

impl<S: KeyValueStore> EnvOverride<S> {
    pub fn new(prefix: &str, inner: S) -> Self {
        Self {
            prefix: prefix.to_string(),
            inner,
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, screaming_snake_case(key))
    }
}

impl<S: KeyValueStore> KeyValueStore for EnvOverride<S> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match std::env::var(self.variable_name(key)) {
            Ok(value) => Ok(Some(value)),
            Err(_) => self.inner.read(key),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.inner.write(key, value)
    }
}

/// `TidyAllUsers` -> `TIDY_ALL_USERS`.
fn screaming_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c.to_ascii_uppercase());
        }
    }
    out
}

/// Read-through, write-through cache over another store.
pub struct CachedStore<S> {
    inner: S,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl<S: KeyValueStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: KeyValueStore> KeyValueStore for CachedStore<S> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        if let Some(cached) = lock(&self.cache).get(key) {
            return Ok(cached.clone());
        }
        let value = self.inner.read(key)?;
        lock(&self.cache).insert(key.to_string(), value.clone());
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.inner.write(key, value)?;
        lock(&self.cache).insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }
}
