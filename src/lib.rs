// Library module for tidy-monster
// Re-exports modules for use in integration tests and the `tidy` binary

pub mod error;
pub mod items;
pub mod logging;
pub mod retry;
pub mod settings;
pub mod tidy;

pub use error::{ConfigError, SourceError, TidyError};
pub use items::{DirectoryWatch, FilteredSet, ItemEvent, ItemSet, UnionSet};
pub use retry::{BackoffPolicy, RetryScheduler};
pub use tidy::{RunState, TidyOrchestrator};
