use crate::core::io::Storage;
use crate::services::heygen::{Avatar, VideoService, Voice};
use anyhow::Result;
use futures_util::future::try_join;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

const VOICES_FILE: &str = "voices.json";
const AVATARS_FILE: &str = "avatars.json";

/// Voice and avatar lists, cached as JSON so the pickers open instantly.
pub struct Catalog {
    service: Arc<dyn VideoService>,
    storage: Arc<dyn Storage>,
}

impl Catalog {
    pub fn new(service: Arc<dyn VideoService>, storage: Arc<dyn Storage>) -> Self {
        Self { service, storage }
    }

    pub async fn voices(&self, refresh: bool) -> Result<Vec<Voice>> {
        self.cached(VOICES_FILE, refresh, || self.service.list_voices())
            .await
    }

    pub async fn avatars(&self, refresh: bool) -> Result<Vec<Avatar>> {
        self.cached(AVATARS_FILE, refresh, || self.service.list_avatars())
            .await
    }

    pub async fn load_all(&self, refresh: bool) -> Result<(Vec<Voice>, Vec<Avatar>)> {
        try_join(self.voices(refresh), self.avatars(refresh)).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.delete(VOICES_FILE).await?;
        self.storage.delete(AVATARS_FILE).await?;
        Ok(())
    }

    /// Drops both cached lists and fetches them again. A failed fetch leaves
    /// no stale list behind.
    pub async fn refresh(&self) -> Result<(Vec<Voice>, Vec<Avatar>)> {
        self.clear().await?;
        self.load_all(false).await
    }

    async fn cached<T, F, Fut>(&self, file: &str, refresh: bool, fetch: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if !refresh && self.storage.exists(file).await? {
            let bytes = self.storage.read(file).await?;
            match serde_json::from_slice::<Vec<T>>(&bytes) {
                Ok(items) => return Ok(items),
                Err(e) => warn!("Ignoring unreadable cache {}: {}", file, e),
            }
        }

        let items = fetch().await?;
        info!("Fetched {} entries for {}", items.len(), file);
        let content = serde_json::to_vec_pretty(&items)?;
        self.storage.write(file, &content).await?;
        Ok(items)
    }
}

/// Keeps voices whose language starts with `language` (case-insensitive).
/// An empty filter keeps everything.
pub fn filter_voices(voices: &[Voice], language: &str) -> Vec<Voice> {
    let wanted = language.trim().to_lowercase();
    voices
        .iter()
        .filter(|v| {
            wanted.is_empty()
                || v
                    .language
                    .as_deref()
                    .map(|l| l.to_lowercase().starts_with(&wanted))
                    .unwrap_or(false)
        })
        .cloned()
        .collect()
}
