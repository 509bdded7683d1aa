pub mod backlinks;
pub mod config;
pub mod editor;
pub mod error;
pub mod link_parser;
pub mod note;
pub mod render;
pub mod save_scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::EditorConfig;
pub use error::StoreError;
pub use link_parser::LinkFormat;
pub use note::{LastModified, Note};
pub use save_scheduler::{BacklinkMode, SaveScheduler};
pub use store::{DirectoryStore, HttpNoteStore, LocalCache, MemoryStore, NoteStore, NoteStoreAdapter};
