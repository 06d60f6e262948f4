//! Builds each run's item set from the settings.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::SourceError;
use crate::items::{DirectoryWatch, FilePattern, FilteredSet, ItemSet, UnionSet};
use crate::settings::{ShortcutFilter, WatchSettings};
use crate::tidy::orchestrator::{DeleteAction, ItemSetFactory};
use crate::tidy::{delete, shortcut};

/// One directory watch per watched directory, combined with a union when
/// there are several, narrowed to application shortcuts when asked.
pub fn build_item_set(settings: &WatchSettings) -> Result<Box<dyn ItemSet<PathBuf>>, SourceError> {
    let pattern = FilePattern::new(&settings.pattern)?;
    let directories = settings.watched_directories();

    let mut watches: Vec<Box<dyn ItemSet<PathBuf>>> = directories
        .iter()
        .map(|dir| Box::new(DirectoryWatch::with_pattern(dir, pattern.clone())) as Box<dyn ItemSet<PathBuf>>)
        .collect();

    let watched: Box<dyn ItemSet<PathBuf>> = match watches.len() {
        0 => return Err(SourceError::NoDirectories),
        1 => watches.remove(0),
        _ => Box::new(UnionSet::new(watches)),
    };

    info!(
        directories = ?directories,
        pattern = %pattern,
        filter = %settings.filter,
        "built item set"
    );

    Ok(match settings.filter {
        ShortcutFilter::All => watched,
        ShortcutFilter::Apps => {
            let extensions = shortcut::application_extensions();
            Box::new(FilteredSet::new(watched, move |path: &PathBuf| {
                shortcut::is_application_shortcut(path, &extensions)
            }))
        }
    })
}

/// Factory that rebuilds the item set from `settings` on every run.
pub fn settings_factory(settings: WatchSettings) -> ItemSetFactory<PathBuf> {
    Box::new(move || build_item_set(&settings))
}

/// The file delete action.
pub fn file_delete_action() -> DeleteAction<PathBuf> {
    Arc::new(|path: &PathBuf| delete::delete_file(path))
}
