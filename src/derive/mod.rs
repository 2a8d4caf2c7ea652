//! Key Derivation (C3, §4.3): deterministic addresses from
//! `(publicKeys, hexChainCode, chain)`, memoized for the process lifetime.

mod ed25519;
mod encode;
mod secp256k1;

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, ErrorContext};
use crate::registry::{self, Curve};
use crate::vault::{PublicKeys, Vault};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    vault_id: String,
    chain: String,
    index: u32,
}

/// Per-`(vaultId, chain, index)` address memoization (§4.3 cache policy).
/// Invalidated only by removing the vault's entries on deletion — the
/// underlying public keys never change post-creation.
#[derive(Default)]
pub struct DerivationCache {
    entries: RwLock<HashMap<CacheKey, String>>,
}

impl DerivationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(&self, vault: &Vault, chain: &str, index: u32) -> Result<String, Error> {
        let key = CacheKey {
            vault_id: vault.id().to_string(),
            chain: chain.to_string(),
            index,
        };
        if let Some(addr) = self.entries.read().expect("derivation cache poisoned").get(&key) {
            return Ok(addr.clone());
        }

        let addr = derive_address(&vault.public_keys, &vault.hex_chain_code, chain, index)?;
        self.entries
            .write()
            .expect("derivation cache poisoned")
            .insert(key, addr.clone());
        Ok(addr)
    }

    /// Drop every memoized address for `vault_id` (called on vault deletion).
    pub fn invalidate_vault(&self, vault_id: &str) {
        self.entries
            .write()
            .expect("derivation cache poisoned")
            .retain(|k, _| k.vault_id != vault_id);
    }
}

/// Derive the canonical address for `chain` from a vault's public keys and
/// chain code, with no caching (§4.3 steps 1-3).
pub fn derive_address(
    public_keys: &PublicKeys,
    hex_chain_code: &str,
    chain: &str,
    index: u32,
) -> Result<String, Error> {
    let policy = registry::policy(chain)?;
    let chain_code = parse_chain_code(hex_chain_code, chain)?;
    let path = parse_hd_path(policy.hd_path, index, chain)?;

    let child_pubkey = match policy.curve {
        Curve::Ecdsa => {
            let root = hex::decode(&public_keys.ecdsa).map_err(|e| Error::DerivationFailed {
                detail: format!("invalid ecdsa pubkey hex: {e}"),
                ctx: ErrorContext::new("derive::derive_address").chain(chain),
            })?;
            secp256k1::derive_child_pubkey(&root, &chain_code, &path)?
        }
        Curve::Eddsa => {
            let root = hex::decode(&public_keys.eddsa).map_err(|e| Error::DerivationFailed {
                detail: format!("invalid eddsa pubkey hex: {e}"),
                ctx: ErrorContext::new("derive::derive_address").chain(chain),
            })?;
            ed25519::derive_child_pubkey(&root, &chain_code, &path)?
        }
    };

    encode::encode(&policy.address_encoding, &child_pubkey)
}

/// Turn a registry `hd_path` (e.g. `m/84'/0'/0'/0/0`) into the sequence of
/// non-hardened child-derivation steps this vault can actually perform.
///
/// The vault never holds a BIP32 root *private* key, only the MPC-aggregated
/// public key, so a hardened step (which needs a private key) is impossible
/// here regardless of what the registry's path spells out. Each `hd_path`
/// component's numeric value is still used as a non-hardened derivation
/// index — the hardened marker is kept for documentation but does not change
/// how the step is performed — which is what makes chains with distinct
/// `hd_path`s (e.g. bitcoin's `84'/0'` vs ethereum's `44'/60'`) derive
/// distinct child keys instead of all collapsing onto the same one. The
/// final component is always overridden by the caller-supplied address
/// `index`.
fn parse_hd_path(hd_path: &str, index: u32, chain: &str) -> Result<Vec<u32>, Error> {
    let ctx = || ErrorContext::new("derive::parse_hd_path").chain(chain);
    let stripped = hd_path.strip_prefix("m/").ok_or_else(|| Error::DerivationFailed {
        detail: format!("malformed hd_path '{hd_path}'"),
        ctx: ctx(),
    })?;
    let mut components = stripped
        .split('/')
        .map(|segment| {
            segment
                .trim_end_matches('\'')
                .parse::<u32>()
                .map_err(|e| Error::DerivationFailed {
                    detail: format!("invalid hd_path segment '{segment}': {e}"),
                    ctx: ctx(),
                })
        })
        .collect::<Result<Vec<u32>, Error>>()?;
    if let Some(last) = components.last_mut() {
        *last = index;
    }
    Ok(components)
}

fn parse_chain_code(hex_chain_code: &str, chain: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(hex_chain_code).map_err(|e| Error::DerivationFailed {
        detail: format!("invalid chain code hex: {e}"),
        ctx: ErrorContext::new("derive::parse_chain_code").chain(chain),
    })?;
    bytes.try_into().map_err(|v: Vec<u8>| Error::DerivationFailed {
        detail: format!("chain code must be 32 bytes, got {}", v.len()),
        ctx: ErrorContext::new("derive::parse_chain_code").chain(chain),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{LibType, PublicKeys};

    fn fixture_keys() -> (PublicKeys, String) {
        (
            PublicKeys {
                ecdsa: "0217b3c17ec1c9b4b8ab3f1f2d5bd0e3c4c8b1e92f6c3a7b6b1c4d2e3f5a6b7c8d"
                    .to_string(),
                eddsa: "a".repeat(64),
            },
            "b".repeat(64),
        )
    }

    #[test]
    fn unsupported_chain_errors() {
        let (keys, cc) = fixture_keys();
        let err = derive_address(&keys, &cc, "not-a-chain", 0).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain { .. }));
    }

    #[test]
    fn same_inputs_yield_deterministic_address() {
        let (keys, cc) = fixture_keys();
        let a = derive_address(&keys, &cc, "bitcoin", 0).unwrap();
        let b = derive_address(&keys, &cc, "bitcoin", 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_hd_paths_yield_distinct_same_curve_children() {
        let (keys, cc) = fixture_keys();
        // bitcoin (m/84'/0'/.../0) and ripple (m/44'/144'/.../0) are both
        // Ecdsa/Base58-unrelated chains with differing hd_path coin types;
        // compare raw child pubkeys via parse_hd_path + secp256k1 directly
        // since their address encodings differ too.
        let bitcoin_path = parse_hd_path(registry::policy("bitcoin").unwrap().hd_path, 0, "bitcoin").unwrap();
        let ripple_path = parse_hd_path(registry::policy("ripple").unwrap().hd_path, 0, "ripple").unwrap();
        assert_ne!(bitcoin_path, ripple_path);

        let root = hex::decode(&keys.ecdsa).unwrap();
        let chain_code = parse_chain_code(&cc, "bitcoin").unwrap();
        let bitcoin_child = secp256k1::derive_child_pubkey(&root, &chain_code, &bitcoin_path).unwrap();
        let ripple_child = secp256k1::derive_child_pubkey(&root, &chain_code, &ripple_path).unwrap();
        assert_ne!(bitcoin_child, ripple_child);
    }

    #[test]
    fn address_index_overrides_final_path_component() {
        let (keys, cc) = fixture_keys();
        let a0 = derive_address(&keys, &cc, "bitcoin", 0).unwrap();
        let a1 = derive_address(&keys, &cc, "bitcoin", 1).unwrap();
        assert_ne!(a0, a1);
    }

    #[test]
    fn cache_memoizes_and_invalidates() {
        let cache = DerivationCache::new();
        let vault = Vault {
            name: "n".into(),
            public_keys: fixture_keys().0,
            hex_chain_code: fixture_keys().1,
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
            enabled_chains: vec!["bitcoin".into()],
            tokens: std::collections::HashMap::new(),
            key_shares: None,
            unknown_fields: serde_json::Map::new(),
        };

        let a1 = cache.address(&vault, "bitcoin", 0).unwrap();
        assert_eq!(cache.entries.read().unwrap().len(), 1);
        let a2 = cache.address(&vault, "bitcoin", 0).unwrap();
        assert_eq!(a1, a2);

        cache.invalidate_vault(vault.id());
        assert_eq!(cache.entries.read().unwrap().len(), 0);
    }
}
