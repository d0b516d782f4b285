//! Persistence adapters: message history, envelope folder sink, profile snapshots.

pub mod folder_sink;
pub mod profile_json;
pub mod sqlite_history;

pub use folder_sink::FolderSink;
pub use profile_json::ProfileJsonStore;
pub use sqlite_history::SqliteHistory;
