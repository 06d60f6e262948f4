//! File name pattern matching for directory watches.
//!
//! Patterns are shell globs matched against the file name only. Several
//! globs may be combined with `;`, e.g. `*.desktop;*.lnk`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;

use crate::error::SourceError;

/// Separator between globs in a combined pattern.
pub const PATTERN_SEPARATOR: char = ';';

/// Compiled file name matcher.
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob_set: GlobSet,
    /// Raw pattern text, for display.
    source: String,
}

impl FilePattern {
    /// Compile a pattern. Matching is case-insensitive on Windows, where
    /// the file system is.
    pub fn new(pattern: &str) -> Result<Self, SourceError> {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0;

        for part in pattern.split(PATTERN_SEPARATOR) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(part)
                .case_insensitive(cfg!(windows))
                .literal_separator(true)
                .build()
                .map_err(|source| SourceError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
            count += 1;
        }

        // An empty pattern matches every file, like `*`.
        if count == 0 {
            return Self::new("*");
        }

        let glob_set = builder.build().map_err(|source| SourceError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            glob_set,
            source: pattern.to_string(),
        })
    }

    /// Check a bare file name.
    pub fn matches_name(&self, name: &str) -> bool {
        self.glob_set.is_match(name)
    }

    /// Check the final component of `path`.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.matches_name(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for FilePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
