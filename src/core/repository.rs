use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::state::{now_millis, HistoryItem, ImageHistoryItem};

pub const STORY_HISTORY_KEY: &str = "story_history.json";
pub const IMAGE_HISTORY_KEY: &str = "image_history.json";
pub const IMAGE_HISTORY_CAP: usize = 20;

/// Current on-disk schema. Version 1 files are bare JSON arrays.
pub const SCHEMA_VERSION: u32 = 2;

pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn id(&self) -> &str;
}

impl Record for HistoryItem {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ImageHistoryItem {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    items: &'a [T],
}

/// Brings any known schema version up to the current envelope's item list.
pub fn migrate(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            let version = map
                .get("version")
                .and_then(Value::as_u64)
                .context("History envelope has no version")?;
            if version > SCHEMA_VERSION as u64 {
                return Err(anyhow!(
                    "History schema version {} is newer than supported {}",
                    version,
                    SCHEMA_VERSION
                ));
            }
            match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(anyhow!("History envelope has no items array")),
            }
        }
        other => Err(anyhow!("Unexpected history document: {}", other)),
    }
}

/// An ordered collection persisted under one storage key, newest first.
pub struct Repository<T: Record> {
    key: String,
    cap: Option<usize>,
    items: Vec<T>,
    storage: Arc<dyn Storage>,
}

impl<T: Record> Repository<T> {
    /// Loads the collection. A document that cannot be read or migrated is
    /// moved aside to `<key>.corrupt-<millis>` and the repository starts empty.
    pub async fn load(key: &str, cap: Option<usize>, storage: Arc<dyn Storage>) -> Self {
        let items = match Self::read_items(key, storage.as_ref()).await {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to load {}: {:#}", key, e);
                Self::quarantine(key, storage.as_ref()).await;
                Vec::new()
            }
        };
        info!("Loaded {} entries from {}", items.len(), key);

        let mut repo = Self { key: key.to_string(), cap, items, storage };
        repo.enforce_cap();
        repo
    }

    async fn read_items(key: &str, storage: &dyn Storage) -> Result<Vec<T>> {
        if !storage.exists(key).await? {
            return Ok(Vec::new());
        }
        let bytes = storage.read(key).await?;
        let value: Value = serde_json::from_slice(&bytes).context("Malformed JSON")?;
        let items = migrate(value)?;
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).context("Malformed history entry"))
            .collect()
    }

    async fn quarantine(key: &str, storage: &dyn Storage) {
        let backup = format!("{}.corrupt-{}", key, now_millis());
        let moved = async {
            let bytes = storage.read(key).await?;
            storage.write(&backup, &bytes).await?;
            storage.delete(key).await
        };
        match moved.await {
            Ok(()) => warn!("Moved unreadable {} to {}", key, backup),
            Err(e) => warn!("Could not preserve unreadable {}: {:#}", key, e),
        }
    }

    fn enforce_cap(&mut self) {
        if let Some(cap) = self.cap {
            self.items.truncate(cap);
        }
    }

    /// Writes the collection. Failures are logged; the in-memory state stays
    /// authoritative for the session.
    async fn persist(&self) -> bool {
        let envelope = Envelope { version: SCHEMA_VERSION, items: &self.items };
        let result = match serde_json::to_vec_pretty(&envelope) {
            Ok(bytes) => self.storage.write(&self.key, &bytes).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist {}: {:#}", self.key, e);
                false
            }
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Adds `item` at the front, evicting the oldest entries past the cap.
    pub async fn insert(&mut self, item: T) -> bool {
        self.items.insert(0, item);
        self.enforce_cap();
        self.persist().await
    }

    /// Replaces the entry with the same id in place, or inserts it at the front.
    pub async fn upsert(&mut self, item: T) -> bool {
        match self.items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => {
                *existing = item;
                self.persist().await
            }
            None => self.insert(item).await,
        }
    }

    /// Applies `f` to the entry with `id`. Returns false when no entry matched.
    pub async fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                f(item);
                self.persist().await;
                true
            }
            None => false,
        }
    }

    pub async fn delete(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id() != id);
        if self.items.len() == before {
            return false;
        }
        self.persist().await;
        true
    }
}

pub type StoryRepository = Repository<HistoryItem>;
pub type ImageRepository = Repository<ImageHistoryItem>;

impl Repository<HistoryItem> {
    pub async fn stories(storage: Arc<dyn Storage>) -> Self {
        Self::load(STORY_HISTORY_KEY, None, storage).await
    }
}

impl Repository<ImageHistoryItem> {
    pub async fn images(storage: Arc<dyn Storage>) -> Self {
        Self::load(IMAGE_HISTORY_KEY, Some(IMAGE_HISTORY_CAP), storage).await
    }
}
