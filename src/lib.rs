//! Companion chat
//!
//! A streaming chat companion for a locally hosted model: an indexed
//! conversation log mirrored to local and remote stores, a cancellable
//! stream controller, and the turn orchestrator that ties them to a display.

pub mod config;
pub mod expression;
pub mod llm;
pub mod memory;
pub mod persistence;
pub mod prompt;
pub mod render;
pub mod runtime;
pub mod signal;
pub mod state_machine;
pub mod stream;
pub mod sync_api;
