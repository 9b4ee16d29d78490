//! Dual write of state to the local and remote stores

use super::remote::RemoteState;
use super::{LocalStore, PersistResult, RemoteStore, CHAT_MEMORY_KEY};
use crate::memory::Turn;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Where the hydrated log came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationSource {
    Local,
    Remote,
    Empty,
}

/// Result of startup hydration
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub turns: Vec<Turn>,
    pub source: HydrationSource,
    /// Full remote document, empty when the backend is absent or unreachable.
    pub remote_state: RemoteState,
}

enum RemoteOp {
    Patch { field: String, value: Value },
    Flush(oneshot::Sender<()>),
}

/// Write-through mirror
///
/// Local writes are synchronous and their failures are returned. Remote writes
/// are queued to a single background task and applied in submission order;
/// their failures are logged and dropped.
pub struct PersistenceMirror {
    local: Arc<dyn LocalStore>,
    remote: Option<RemoteHandle>,
}

struct RemoteHandle {
    store: Arc<dyn RemoteStore>,
    queue: mpsc::UnboundedSender<RemoteOp>,
}

impl PersistenceMirror {
    /// Local store only.
    pub fn local_only(local: Arc<dyn LocalStore>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Local store mirrored to `remote`. Must be called inside a tokio runtime.
    pub fn with_remote(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_remote_writer(remote.clone(), rx));
        Self {
            local,
            remote: Some(RemoteHandle {
                store: remote,
                queue: tx,
            }),
        }
    }

    /// Persist the full log under `chatMemory`.
    pub fn write_log(&self, turns: &[Turn]) -> PersistResult<()> {
        let value = serde_json::to_value(turns)?;
        self.write_field(CHAT_MEMORY_KEY, value)
    }

    /// Persist an arbitrary field locally and queue it for the remote.
    pub fn write_field(&self, key: &str, value: Value) -> PersistResult<()> {
        self.local.put(key, &value)?;
        self.enqueue(key, value);
        Ok(())
    }

    pub fn read_field(&self, key: &str) -> PersistResult<Option<Value>> {
        self.local.get(key)
    }

    fn enqueue(&self, field: &str, value: Value) {
        if let Some(remote) = &self.remote {
            let op = RemoteOp::Patch {
                field: field.to_string(),
                value,
            };
            if remote.queue.send(op).is_err() {
                tracing::debug!(field = %field, "Remote writer stopped; dropping write");
            }
        }
    }

    /// Wait until every remote write queued so far has been attempted.
    pub async fn flush(&self) {
        if let Some(remote) = &self.remote {
            let (tx, rx) = oneshot::channel();
            if remote.queue.send(RemoteOp::Flush(tx)).is_ok() {
                let _ = rx.await;
            }
        }
    }

    /// Load the log, preferring non-empty local content and seeding local
    /// from the remote otherwise.
    pub async fn hydrate(&self) -> Hydrated {
        let local_turns = match self.local.get(CHAT_MEMORY_KEY) {
            Ok(value) => parse_turns(value, "local"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read local conversation log");
                Vec::new()
            }
        };

        let remote_state = match &self.remote {
            Some(remote) => match remote.store.load_all().await {
                Ok(state) => state,
                Err(e) => {
                    tracing::debug!(error = %e, "Remote state unavailable");
                    RemoteState::new()
                }
            },
            None => RemoteState::new(),
        };

        if !local_turns.is_empty() {
            return Hydrated {
                turns: local_turns,
                source: HydrationSource::Local,
                remote_state,
            };
        }

        let remote_turns = parse_turns(remote_state.get(CHAT_MEMORY_KEY).cloned(), "remote");
        if remote_turns.is_empty() {
            return Hydrated {
                turns: Vec::new(),
                source: HydrationSource::Empty,
                remote_state,
            };
        }

        match serde_json::to_value(&remote_turns) {
            Ok(value) => {
                if let Err(e) = self.local.put(CHAT_MEMORY_KEY, &value) {
                    tracing::warn!(error = %e, "Failed to seed local log from remote");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize remote log"),
        }
        tracing::info!(turns = remote_turns.len(), "Hydrated conversation log from remote");

        Hydrated {
            turns: remote_turns,
            source: HydrationSource::Remote,
            remote_state,
        }
    }
}

fn parse_turns(value: Option<Value>, origin: &str) -> Vec<Turn> {
    let Some(value) = value else {
        return Vec::new();
    };
    let mut turns: Vec<Turn> = match serde_json::from_value(value) {
        Ok(turns) => turns,
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Ignoring unreadable conversation log");
            return Vec::new();
        }
    };
    turns.sort_by_key(|t| t.index);
    turns.dedup_by_key(|t| t.index);
    turns
}

async fn run_remote_writer(remote: Arc<dyn RemoteStore>, mut rx: mpsc::UnboundedReceiver<RemoteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            RemoteOp::Patch { field, value } => {
                if let Err(e) = remote.patch_field(&field, &value).await {
                    tracing::debug!(field = %field, error = %e, "Remote write failed");
                }
            }
            RemoteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
