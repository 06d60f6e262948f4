//! Directory watch: the leaf item set.
//!
//! Tracks the files directly inside one directory whose names match a
//! [`FilePattern`], using the `notify` crate for change notification.
//!
//! Notifications are treated as hints. For every notified path the watch
//! checks the file system at processing time and emits only the difference
//! against what it has reported so far. A file deleted and recreated before
//! its notifications are processed is therefore a no-op; if the deletion is
//! observed first the subscriber sees `Removed` followed by `Added`. Either
//! way the reported state converges on the directory contents.
//!
//! A write to a file already reported is surfaced as `Changed`, so a shortcut
//! created empty and filled afterwards can be judged again by a filter.

use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, warn};

use super::{lock, EventSink, ItemEvent, ItemSet, SubscriberSlot};
use crate::error::SourceError;
use crate::items::pattern::FilePattern;

/// Watches one directory, non-recursively, for files matching a pattern.
pub struct DirectoryWatch {
    inner: Arc<WatchInner>,
}

struct WatchInner {
    directory: PathBuf,
    pattern: FilePattern,
    state: Mutex<WatchState>,
}

struct WatchState {
    slot: SubscriberSlot<PathBuf>,
    /// Canonical directory path, set by `start`.
    root: Option<PathBuf>,
    present: HashSet<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    lost: bool,
}

impl DirectoryWatch {
    /// Create a watch over `directory` for file names matching `pattern`.
    /// Nothing touches the file system until [`ItemSet::start`].
    pub fn new(directory: impl Into<PathBuf>, pattern: &str) -> Result<Self, SourceError> {
        Ok(Self::with_pattern(directory, FilePattern::new(pattern)?))
    }

    pub fn with_pattern(directory: impl Into<PathBuf>, pattern: FilePattern) -> Self {
        Self {
            inner: Arc::new(WatchInner {
                directory: directory.into(),
                pattern,
                state: Mutex::new(WatchState {
                    slot: SubscriberSlot::default(),
                    root: None,
                    present: HashSet::new(),
                    watcher: None,
                    lost: false,
                }),
            }),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn pattern(&self) -> &FilePattern {
        &self.inner.pattern
    }
}

impl ItemSet<PathBuf> for DirectoryWatch {
    fn subscribe(&self, sink: EventSink<PathBuf>) -> Result<(), SourceError> {
        lock(&self.inner.state).slot.attach(sink)
    }

    fn unsubscribe(&self) {
        lock(&self.inner.state).slot.detach();
    }

    fn start(&self) -> Result<(), SourceError> {
        let inner = &self.inner;
        let root = fs::canonicalize(&inner.directory).map_err(|source| SourceError::Scan {
            path: inner.directory.clone(),
            source,
        })?;

        {
            let mut state = lock(&inner.state);
            state.slot.begin()?;
            state.root = Some(root.clone());
        }

        let weak: Weak<WatchInner> = Arc::downgrade(inner);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_notify(res);
                }
            },
            Config::default(),
        )
        .map_err(|source| SourceError::Watch {
            path: root.clone(),
            source,
        })?;

        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|source| SourceError::Watch {
                path: root.clone(),
                source,
            })?;

        // The watch is installed before the initial scan so nothing created
        // in between is missed. Notifications racing the scan reconcile
        // against the same `present` set and cannot double-report.
        let listing = inner.scan(&root)?;

        let mut state = lock(&inner.state);
        if state.slot.is_disposed() {
            drop(state);
            drop(watcher);
            return Err(SourceError::Disposed);
        }
        state.watcher = Some(watcher);
        for path in listing {
            if state.present.insert(path.clone()) {
                state.slot.emit(ItemEvent::Added(path));
            }
        }
        debug!(
            directory = %root.display(),
            pattern = %inner.pattern,
            files = state.present.len(),
            "directory watch started"
        );
        Ok(())
    }

    fn current_items(&self) -> HashSet<PathBuf> {
        lock(&self.inner.state).present.clone()
    }

    fn dispose(&self) {
        let watcher = {
            let mut state = lock(&self.inner.state);
            state.slot.close();
            state.present.clear();
            state.watcher.take()
        };
        // Dropped outside the lock: the notify thread may be waiting on it.
        drop(watcher);
    }

    fn is_disposed(&self) -> bool {
        lock(&self.inner.state).slot.is_disposed()
    }
}

impl Drop for DirectoryWatch {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl WatchInner {
    /// Matching files currently in `root`.
    fn scan(&self, root: &Path) -> Result<HashSet<PathBuf>, SourceError> {
        let read_dir = fs::read_dir(root).map_err(|source| SourceError::Scan {
            path: root.to_path_buf(),
            source,
        })?;

        let mut found = HashSet::new();
        for entry in read_dir {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if self.pattern.matches_path(&path) && is_file(&path) {
                found.insert(path);
            }
        }
        Ok(found)
    }

    fn handle_notify(&self, res: Result<Event, notify::Error>) {
        let mut state = lock(&self.state);
        if !state.slot.is_live() || state.lost {
            return;
        }
        let Some(root) = state.root.clone() else {
            return;
        };

        let event = match res {
            Ok(event) => event,
            Err(err) => {
                warn!(directory = %root.display(), error = %err, "watch error, rescanning");
                self.rescan(&mut state, &root);
                return;
            }
        };

        let changed = is_content_change(&event.kind);
        if matches!(event.kind, EventKind::Access(_)) && !changed {
            return;
        }
        if event.need_rescan() {
            self.rescan(&mut state, &root);
            return;
        }

        for path in &event.paths {
            if path == &root {
                if !root.is_dir() {
                    self.mark_lost(&mut state, &root, "directory was removed");
                    return;
                }
                continue;
            }
            if path.parent() != Some(root.as_path()) || !self.pattern.matches_path(path) {
                continue;
            }
            reconcile(&mut state, path, changed);
        }
    }

    fn rescan(&self, state: &mut WatchState, root: &Path) {
        let listing = match self.scan(root) {
            Ok(listing) => listing,
            Err(err) => {
                self.mark_lost(state, root, &err.to_string());
                return;
            }
        };

        let gone: Vec<PathBuf> = state.present.difference(&listing).cloned().collect();
        for path in gone {
            state.present.remove(&path);
            state.slot.emit(ItemEvent::Removed(path));
        }
        for path in listing {
            if state.present.insert(path.clone()) {
                state.slot.emit(ItemEvent::Added(path));
            }
        }
    }

    fn mark_lost(&self, state: &mut WatchState, root: &Path, reason: &str) {
        error!(directory = %root.display(), reason, "lost directory watch");
        state.lost = true;
        state.slot.emit(ItemEvent::Failed(SourceError::Lost {
            path: root.to_path_buf(),
            reason: reason.to_string(),
        }));
    }
}

/// Bring `present` in line with the file system for one path. `changed`
/// marks a write to the path, reported as `Changed` when it is still present.
fn reconcile(state: &mut WatchState, path: &Path, changed: bool) {
    let exists = is_file(path);
    let known = state.present.contains(path);
    match (exists, known) {
        (true, false) => {
            state.present.insert(path.to_path_buf());
            state.slot.emit(ItemEvent::Added(path.to_path_buf()));
        }
        (false, true) => {
            state.present.remove(path);
            state.slot.emit(ItemEvent::Removed(path.to_path_buf()));
        }
        (true, true) if changed => {
            state.slot.emit(ItemEvent::Changed(path.to_path_buf()));
        }
        _ => {}
    }
}

/// Writes and renames onto a path. Opens and reads are not changes.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Anything that is not a directory counts, including dangling symlinks.
fn is_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| !meta.is_dir())
        .unwrap_or(false)
}
