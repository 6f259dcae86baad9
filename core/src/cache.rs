use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{TrackerError, TrackerResult};

/// Device-local string key/value storage that survives app restarts.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get_item(&self, key: &str) -> TrackerResult<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> TrackerResult<()>;
    async fn remove_item(&self, key: &str) -> TrackerResult<()>;
}

#[derive(Default)]
pub struct MemoryCache {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> TrackerError {
        TrackerError::InvalidInput("local cache lock poisoned".to_string())
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get_item(&self, key: &str) -> TrackerResult<Option<String>> {
        let items = self.items.lock().map_err(|_| Self::poisoned())?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> TrackerResult<()> {
        let mut items = self.items.lock().map_err(|_| Self::poisoned())?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> TrackerResult<()> {
        let mut items = self.items.lock().map_err(|_| Self::poisoned())?;
        items.remove(key);
        Ok(())
    }
}
