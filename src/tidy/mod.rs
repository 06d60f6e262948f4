//! Tidy service: deletes the shortcuts its item set reports.

pub mod delete;
pub mod factory;
pub mod orchestrator;
pub mod shortcut;

pub use delete::delete_file;
pub use factory::{build_item_set, file_delete_action, settings_factory};
pub use orchestrator::{DeleteAction, ItemSetFactory, RunState, TidyOrchestrator};
