//! In-memory `Storage` backend, used by tests and by ephemeral CLI sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Error;
use super::Storage;

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.inner.lock().expect("memory storage poisoned").get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), Error> {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.lock().expect("memory storage poisoned").remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .inner
            .lock()
            .expect("memory storage poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.inner.lock().expect("memory storage poisoned").clear();
        Ok(())
    }
}
