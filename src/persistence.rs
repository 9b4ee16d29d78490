//! Persistence for the conversation log and settings
//!
//! Every mutation is written to an authoritative local store and mirrored,
//! best effort, to an optional remote state-sync backend.

mod local;
mod mirror;
mod remote;

pub use local::{LocalStore, MemoryLocalStore, SqliteLocalStore};
pub use mirror::{Hydrated, HydrationSource, PersistenceMirror};
pub use remote::{HttpStateSync, RemoteState, RemoteStore};

use thiserror::Error;

/// Key holding the serialized conversation log.
pub const CHAT_MEMORY_KEY: &str = "chatMemory";

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {0} from state sync backend")]
    Status(u16),
    #[error("Invalid state sync URL: {0}")]
    InvalidUrl(String),
}

pub type PersistResult<T> = Result<T, PersistError>;
