//! Secret Cache (C9, §4.9): scoped in-memory decrypted keyshare cache with
//! a renewing TTL, handed out to the signing session via an opaque handle.
//!
//! Cached material lives in `vault::KeyShares`, which is already
//! `zeroize::ZeroizeOnDrop`, generalizing the usual `secrecy::Secret`
//! text-protection pattern from mnemonic text to opaque keyshare bytes.
//! The unlock password itself goes through the cache as a
//! `secrecy::SecretString` so it never sits in an ordinary `String` that
//! could be picked up by an incidental `Debug`/log call on its way in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, ErrorContext};
use crate::store::VaultStore;
use crate::vault::KeyShares;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CachedShare {
    key_shares: KeyShares,
    expires_at: Instant,
    generation: u64,
}

/// Opaque capability presented by a caller to request keyshare material.
/// Invalidated the moment `lock()` is called for its vault, even if the
/// TTL has not elapsed.
#[derive(Debug, Clone)]
pub struct Handle {
    vault_id: String,
    generation: u64,
}

impl Handle {
    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }
}

pub struct SecretCache {
    store: Arc<VaultStore>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedShare>>,
    generation: AtomicU64,
}

impl SecretCache {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<VaultStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Decrypt (if needed) and pin the vault's keyshares for `ttl`, renewing
    /// on every `reveal`. Returns a handle valid until the TTL lapses or
    /// `lock()` is called.
    pub async fn unlock(
        &self,
        vault_id: &str,
        password: Option<&SecretString>,
    ) -> Result<Handle, Error> {
        let container = self
            .store
            .get_container(vault_id)
            .await?
            .ok_or_else(|| Error::Storage {
                kind: crate::error::StorageErrorKind::NotFound,
                detail: format!("no such vault: {vault_id}"),
                ctx: ErrorContext::new("secret_cache::unlock").vault(vault_id),
            })?;
        let vault = crate::container::decode(&container, password.map(|p| p.expose_secret()))?;
        let key_shares = vault.key_shares.ok_or_else(|| Error::KeyshareMissing {
            ctx: ErrorContext::new("secret_cache::unlock").vault(vault_id),
        })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut entries = self.entries.lock().await;
        entries.insert(
            vault_id.to_string(),
            CachedShare {
                key_shares,
                expires_at: Instant::now() + self.ttl,
                generation,
            },
        );
        Ok(Handle {
            vault_id: vault_id.to_string(),
            generation,
        })
    }

    /// Zeroize the cached share immediately and invalidate outstanding handles.
    pub async fn lock(&self, vault_id: &str) {
        self.entries.lock().await.remove(vault_id);
    }

    pub async fn is_unlocked(&self, vault_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        entries.contains_key(vault_id)
    }

    pub async fn remaining(&self, vault_id: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        entries
            .get(vault_id)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Fetch the cached keyshares for a handle, renewing its TTL. Fails if
    /// the handle's vault has been locked, re-unlocked (stale generation),
    /// or the TTL has elapsed.
    pub async fn reveal(&self, handle: &Handle) -> Result<KeyShares, Error> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        let entry = entries
            .get_mut(&handle.vault_id)
            .filter(|e| e.generation == handle.generation)
            .ok_or_else(|| Error::KeyshareMissing {
                ctx: ErrorContext::new("secret_cache::reveal").vault(&handle.vault_id),
            })?;
        entry.expires_at = Instant::now() + self.ttl;
        Ok(entry.key_shares.clone())
    }

    fn purge_expired(&self, entries: &mut HashMap<String, CachedShare>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container;
    use crate::events::EventBus;
    use crate::store::MemoryStorage;
    use crate::vault::{LibType, PublicKeys, Vault};

    fn sample_vault() -> Vault {
        Vault {
            name: "n".into(),
            public_keys: PublicKeys {
                ecdsa: "02secretcache".into(),
                eddsa: "ab".repeat(32),
            },
            hex_chain_code: "00".repeat(32),
            local_party_id: "d1".into(),
            signers: vec!["d1".into()],
            threshold: 1,
            lib_type: LibType::Dkls,
            lib_type_raw: "DKLS".into(),
            created_at: chrono::Utc::now(),
            last_modified: chrono::Utc::now(),
            is_backed_up: false,
            order: 0,
            currency: "USD".into(),
            enabled_chains: vec![],
            tokens: std::collections::HashMap::new(),
            key_shares: Some(KeyShares {
                ecdsa: "ZWNkc2E=".into(),
                eddsa: "ZWRkc2E=".into(),
            }),
            unknown_fields: serde_json::Map::new(),
        }
    }

    async fn store_with_vault() -> (Arc<VaultStore>, String) {
        let store = Arc::new(VaultStore::new(Arc::new(MemoryStorage::new()), EventBus::new()));
        let vault = sample_vault();
        let id = vault.id().to_string();
        let bytes = container::encode(&vault, Some("hunter2")).unwrap();
        store.add_vault(&bytes, Some("hunter2")).await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn unlock_then_lock_invalidates_handle() {
        let (store, id) = store_with_vault().await;
        let cache = SecretCache::new(store);

        let password = SecretString::new("hunter2".to_string());
        let handle = cache.unlock(&id, Some(&password)).await.unwrap();
        assert!(cache.is_unlocked(&id).await);
        assert!(cache.reveal(&handle).await.is_ok());

        cache.lock(&id).await;
        assert!(!cache.is_unlocked(&id).await);
        assert!(cache.reveal(&handle).await.is_err());
    }

    #[tokio::test]
    async fn expired_entry_is_purged() {
        let (store, id) = store_with_vault().await;
        let cache = SecretCache::with_ttl(store, Duration::from_millis(1));
        let password = SecretString::new("hunter2".to_string());
        let _handle = cache.unlock(&id, Some(&password)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.is_unlocked(&id).await);
    }

    #[tokio::test]
    async fn wrong_password_fails_unlock() {
        let (store, id) = store_with_vault().await;
        let cache = SecretCache::new(store);
        let password = SecretString::new("wrong".to_string());
        let err = cache.unlock(&id, Some(&password)).await.unwrap_err();
        assert!(matches!(err, Error::WrongPassword { .. }));
    }
}
