//! Conversation memory
//!
//! The ordered, indexed log of turns. Index, not position, is identity.

mod conversation;
pub mod transcript;
mod turn;

#[cfg(test)]
mod proptests;

pub use conversation::{ConversationLog, RETAINED_AFTER_TRIM};
pub use turn::{Role, Turn};

use crate::persistence::PersistError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Turn not found: {0}")]
    TurnNotFound(u64),
    #[error("Turn {0} is still being generated")]
    Busy(u64),
    #[error("Failed to persist conversation log: {0}")]
    Persist(#[from] PersistError),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
