//! Vault Store (C2, §4.2, §5, §6).
//!
//! `Storage` is a minimal capability trait (get/put/remove/list/clear) with
//! a filesystem backend (atomic write-to-temp + rename, `0700`/`0600`
//! permissions on unix) and an in-memory backend for tests — the same shape
//! as the protocol-trait-plus-registry pattern used elsewhere in this crate
//! (see `signing::MpcDriver`/`rpc::ChainRpc`): a small trait at the seam,
//! injected rather than discovered globally (§9 design note).

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::container;
use crate::error::{Error, ErrorContext, StorageErrorKind};
use crate::events::{Event, EventBus};
use crate::vault::{Vault, VaultSummary};

const ACTIVE_KEY: &str = "vaults/active";
const ADDRESS_BOOK_KEY: &str = "addressbook.json";
const SETTINGS_KEY: &str = "settings.json";

fn vault_key(id: &str) -> String {
    format!("vaults/{id}.json")
}

fn ctx(op: &str) -> ErrorContext {
    ErrorContext::new(op)
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), Error>;
    async fn remove(&self, key: &str) -> Result<(), Error>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, Error>;
    async fn clear(&self) -> Result<(), Error>;
}

/// On-disk record for a single vault: summary in clear (for listing without
/// a password) plus the raw `.vult` container bytes, base64-encoded for the
/// JSON envelope (§6: `vaults/{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultRecord {
    summary: VaultSummary,
    container_b64: String,
}

/// Durable, platform-agnostic vault persistence keyed by `vault.id` (§4.2).
pub struct VaultStore {
    storage: Arc<dyn Storage>,
    events: EventBus,
    /// Per-vault exclusion lock for writes; reads may be concurrent (§5).
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VaultStore {
    pub fn new(storage: Arc<dyn Storage>, events: EventBus) -> Self {
        Self {
            storage,
            events,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Decode `container` via C1, persist it, and return the vault.
    /// Duplicate import (same `id`) updates the existing record, making
    /// import idempotent (§3 Lifecycle, §8 "Idempotent import").
    pub async fn add_vault(
        &self,
        container_bytes: &[u8],
        password: Option<&str>,
    ) -> Result<Vault, Error> {
        let vault = container::decode(container_bytes, password)?;
        let id = vault.id().to_string();
        let lock = self.lock_for(&id).await;
        let _guard = lock.lock().await;

        let record = VaultRecord {
            summary: vault.summary(),
            container_b64: container::to_base64(container_bytes),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| Error::Storage {
            kind: StorageErrorKind::Unknown,
            detail: e.to_string(),
            ctx: ctx("add_vault").vault(&id),
        })?;
        self.storage.put(&vault_key(&id), &bytes).await?;
        self.events.emit(Event::VaultAdded { vault_id: id });
        Ok(vault)
    }

    /// Summaries for every stored vault, excluding keyshare material (§4.2).
    pub async fn list_vaults(&self) -> Result<Vec<VaultSummary>, Error> {
        let keys = self.storage.list("vaults/").await?;
        let mut out = Vec::new();
        for key in keys {
            if key == ACTIVE_KEY {
                continue;
            }
            if let Some(bytes) = self.storage.get(&key).await? {
                let record: VaultRecord = serde_json::from_slice(&bytes).map_err(|e| Error::Storage {
                    kind: StorageErrorKind::Unknown,
                    detail: e.to_string(),
                    ctx: ctx("list_vaults"),
                })?;
                out.push(record.summary);
            }
        }
        Ok(out)
    }

    /// Full vault metadata for `id`, with `key_shares` always `None` — callers
    /// unlock keyshare material explicitly through the secret cache (C9).
    pub async fn get_vault(&self, id: &str) -> Result<Option<Vault>, Error> {
        let Some(bytes) = self.storage.get(&vault_key(id)).await? else {
            return Ok(None);
        };
        let record: VaultRecord = serde_json::from_slice(&bytes).map_err(|e| Error::Storage {
            kind: StorageErrorKind::Unknown,
            detail: e.to_string(),
            ctx: ctx("get_vault").vault(id),
        })?;
        let container_bytes = container::from_base64(&record.container_b64)?;
        Ok(Some(container::decode_locked(&container_bytes)?))
    }

    /// The raw `.vult` container bytes for `id`, used by the secret cache
    /// and by export.
    pub async fn get_container(&self, id: &str) -> Result<Option<Vec<u8>>, Error> {
        let Some(bytes) = self.storage.get(&vault_key(id)).await? else {
            return Ok(None);
        };
        let record: VaultRecord = serde_json::from_slice(&bytes).map_err(|e| Error::Storage {
            kind: StorageErrorKind::Unknown,
            detail: e.to_string(),
            ctx: ctx("get_container").vault(id),
        })?;
        Ok(Some(container::from_base64(&record.container_b64)?))
    }

    pub async fn set_active(&self, id: &str) -> Result<(), Error> {
        if self.storage.get(&vault_key(id)).await?.is_none() {
            return Err(Error::Storage {
                kind: StorageErrorKind::NotFound,
                detail: format!("no such vault: {id}"),
                ctx: ctx("set_active").vault(id),
            });
        }
        self.storage.put(ACTIVE_KEY, id.as_bytes()).await
    }

    /// The active vault's metadata, or `None` if no active vault is set or
    /// the pointer refers to a vault that no longer exists (§4.2: "must
    /// reference an extant vault or be cleared").
    pub async fn get_active(&self) -> Result<Option<Vault>, Error> {
        let Some(bytes) = self.storage.get(ACTIVE_KEY).await? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&bytes).to_string();
        match self.get_vault(&id).await? {
            Some(v) => Ok(Some(v)),
            None => {
                self.storage.remove(ACTIVE_KEY).await?;
                Ok(None)
            }
        }
    }

    /// Remove the vault's storage entry. Keyshare-cache purge is the
    /// caller's responsibility (see `secret_cache::SecretCache::lock`),
    /// invoked atomically alongside this by `Core::delete_vault`.
    pub async fn delete_vault(&self, id: &str) -> Result<(), Error> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.storage.remove(&vault_key(id)).await?;
        if let Ok(Some(active_bytes)) = self.storage.get(ACTIVE_KEY).await {
            if active_bytes == id.as_bytes() {
                self.storage.remove(ACTIVE_KEY).await?;
            }
        }
        self.events.emit(Event::VaultRemoved {
            vault_id: id.to_string(),
        });
        Ok(())
    }

    pub async fn load_address_book(&self) -> Result<Vec<crate::vault::AddressBookEntry>, Error> {
        match self.storage.get(ADDRESS_BOOK_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Storage {
                kind: StorageErrorKind::Unknown,
                detail: e.to_string(),
                ctx: ctx("load_address_book"),
            }),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_address_book(
        &self,
        entries: &[crate::vault::AddressBookEntry],
    ) -> Result<(), Error> {
        let bytes = serde_json::to_vec(entries).map_err(|e| Error::Storage {
            kind: StorageErrorKind::Unknown,
            detail: e.to_string(),
            ctx: ctx("save_address_book"),
        })?;
        self.storage.put(ADDRESS_BOOK_KEY, &bytes).await
    }

    pub async fn load_settings(&self) -> Result<crate::vault::Settings, Error> {
        match self.storage.get(SETTINGS_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Storage {
                kind: StorageErrorKind::Unknown,
                detail: e.to_string(),
                ctx: ctx("load_settings"),
            }),
            None => Ok(crate::vault::Settings::default()),
        }
    }

    pub async fn save_settings(&self, settings: &crate::vault::Settings) -> Result<(), Error> {
        let bytes = serde_json::to_vec(settings).map_err(|e| Error::Storage {
            kind: StorageErrorKind::Unknown,
            detail: e.to_string(),
            ctx: ctx("save_settings"),
        })?;
        self.storage.put(SETTINGS_KEY, &bytes).await
    }
}
