use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Delete one file. A file that is already gone counts as deleted, so a
/// retry racing another deleter does not fail.
pub fn delete_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to delete file: {}", path.display()))
        }
    }
}
