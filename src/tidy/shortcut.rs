//! Recognising application shortcuts.
//!
//! A freedesktop entry (`*.desktop`) is an application shortcut when its
//! `[Desktop Entry]` group says `Type=Application`. Any other shortcut is
//! judged by what it points to: a symlink whose target is executable, or
//! carries one of the executable extensions listed in `PATHEXT`.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Extensions used when `PATHEXT` is not set.
pub const DEFAULT_APPLICATION_EXTENSIONS: &[&str] = &[".com", ".exe", ".bat", ".cmd"];

const DESKTOP_ENTRY_GROUP: &str = "[Desktop Entry]";

/// Executable extensions from `PATHEXT`, lower-cased with a leading dot.
pub fn application_extensions() -> Vec<String> {
    match std::env::var("PATHEXT") {
        Ok(value) if !value.trim().is_empty() => value
            .split(';')
            .map(|ext| ext.trim().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect(),
        _ => DEFAULT_APPLICATION_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
    }
}

/// Does `path` have one of `extensions` (each with a leading dot)?
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .map(|ext| extensions.iter().any(|candidate| *candidate == ext))
        .unwrap_or(false)
}

/// Is the shortcut at `path` one that launches an application?
///
/// Errors when the shortcut cannot be read, e.g. because it was removed
/// before it could be inspected.
pub fn is_application_shortcut(path: &Path, extensions: &[String]) -> Result<bool> {
    let is_desktop_entry = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("desktop"))
        .unwrap_or(false);

    if is_desktop_entry {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read desktop entry: {}", path.display()))?;
        return Ok(desktop_entry_launches_application(&content));
    }

    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to inspect shortcut: {}", path.display()))?;
    if !meta.file_type().is_symlink() {
        return Ok(false);
    }

    let target = fs::read_link(path)
        .with_context(|| format!("Failed to resolve shortcut: {}", path.display()))?;
    if has_extension(&target, extensions) {
        return Ok(true);
    }
    Ok(is_executable(path))
}

/// Parse a desktop entry and check its type.
pub fn desktop_entry_launches_application(content: &str) -> bool {
    let mut in_entry_group = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_entry_group = line == DESKTOP_ENTRY_GROUP;
            continue;
        }
        if !in_entry_group {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "Type" {
                return value.trim() == "Application";
            }
        }
    }
    false
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}
