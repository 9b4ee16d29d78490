//! State-sync backend
//!
//! Serves one JSON document over `/api/data`. The chat client mirrors its
//! keys here so state can be shared between installs.

mod handlers;

pub use handlers::create_router;

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// JSON document on disk
///
/// Reads never fail: a missing, unreadable or non-object file is `{}`.
/// Writes go to a sibling temp file which is then renamed over the target.
#[derive(Clone)]
pub struct JsonFileStore {
    path: Arc<PathBuf>,
    // Serializes read-modify-write cycles.
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Map<String, Value> {
        let bytes = match tokio::fs::read(self.path.as_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "State file unreadable");
                return Map::new();
            }
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "State file corrupt");
                Map::new()
            }
        }
    }

    pub async fn replace(&self, data: Map<String, Value>) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&data).await
    }

    /// Upsert one field and return its stored value.
    pub async fn set_field(&self, field: &str, value: Value) -> std::io::Result<Value> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await;
        data.insert(field.to_string(), value.clone());
        self.write(&data).await?;
        Ok(value)
    }

    async fn write(&self, data: &Map<String, Value>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path.as_path()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}
