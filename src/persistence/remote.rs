//! Client for the optional state-sync backend

use super::{PersistError, PersistResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Whole-state document stored by the backend.
pub type RemoteState = Map<String, Value>;

/// Best-effort remote mirror of local state
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the full state document.
    async fn load_all(&self) -> PersistResult<RemoteState>;

    /// Replace the full state document.
    async fn save_all(&self, state: &RemoteState) -> PersistResult<()>;

    /// Upsert a single field.
    async fn patch_field(&self, field: &str, value: &Value) -> PersistResult<()>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn load_all(&self) -> PersistResult<RemoteState> {
        (**self).load_all().await
    }

    async fn save_all(&self, state: &RemoteState) -> PersistResult<()> {
        (**self).save_all(state).await
    }

    async fn patch_field(&self, field: &str, value: &Value) -> PersistResult<()> {
        (**self).patch_field(field, value).await
    }
}

/// `reqwest` client for `/api/data`
pub struct HttpStateSync {
    client: Client,
    data_url: Url,
}

impl HttpStateSync {
    pub fn new(base_url: impl AsRef<str>) -> PersistResult<Self> {
        let base_url = base_url.as_ref();
        let mut data_url =
            Url::parse(base_url).map_err(|e| PersistError::InvalidUrl(format!("{base_url}: {e}")))?;
        data_url
            .path_segments_mut()
            .map_err(|()| PersistError::InvalidUrl(base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "data"]);

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, data_url })
    }

    /// `/api/data/<field>`, with the field as a single escaped path segment.
    fn field_url(&self, field: &str) -> PersistResult<Url> {
        let mut url = self.data_url.clone();
        url.path_segments_mut()
            .map_err(|()| PersistError::InvalidUrl(self.data_url.to_string()))?
            .push(field);
        Ok(url)
    }

    fn check(response: &reqwest::Response) -> PersistResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PersistError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl RemoteStore for HttpStateSync {
    async fn load_all(&self) -> PersistResult<RemoteState> {
        let response = self.client.get(self.data_url.clone()).send().await?;
        Self::check(&response)?;
        // Anything other than an object reads as empty state.
        match response.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            _ => Ok(RemoteState::new()),
        }
    }

    async fn save_all(&self, state: &RemoteState) -> PersistResult<()> {
        let response = self.client.post(self.data_url.clone()).json(state).send().await?;
        Self::check(&response)
    }

    async fn patch_field(&self, field: &str, value: &Value) -> PersistResult<()> {
        let url = self.field_url(field)?;
        let response = self.client.patch(url).json(value).send().await?;
        Self::check(&response)
    }
}
