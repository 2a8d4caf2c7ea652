//! Non-hardened BIP32 public-key-only derivation for secp256k1 (§4.3 step 2).
//!
//! The vault never holds a BIP32 root private key — only the MPC-aggregated
//! public key and its chain code — so derivation here is strictly the
//! "public parent key → public child key" branch of BIP32, the same
//! construction `bip32::XPub` already implements for watch-only wallets.

use bip32::{ChainCode, ChildNumber, ExtendedKeyAttrs, KeyFingerprint, PublicKey as Bip32PublicKey, XPub};

use crate::error::{Error, ErrorContext};

fn ctx() -> ErrorContext {
    ErrorContext::new("derive::secp256k1")
}

/// Derive the non-hardened child public key at the end of `path` from a
/// root secp256k1 public key (SEC1 compressed, 33 bytes) and chain code,
/// walking one non-hardened BIP32 step per `path` entry so that distinct
/// registry `hd_path`s produce distinct children.
pub fn derive_child_pubkey(
    root_pubkey: &[u8],
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<Vec<u8>, Error> {
    let key = k256::PublicKey::from_sec1_bytes(root_pubkey).map_err(|e| Error::DerivationFailed {
        detail: format!("invalid secp256k1 public key: {e}"),
        ctx: ctx(),
    })?;
    let bip32_key = k256::ecdsa::VerifyingKey::from(&key);

    let attrs = ExtendedKeyAttrs {
        depth: 0,
        parent_fingerprint: KeyFingerprint::default(),
        child_number: ChildNumber::new(0, false).expect("0 is a valid non-hardened index"),
        chain_code: ChainCode::from(*chain_code),
    };
    let mut xpub = XPub::new(bip32_key, attrs);

    for &index in path {
        let child_number = ChildNumber::new(index, false).map_err(|e| Error::DerivationFailed {
            detail: e.to_string(),
            ctx: ctx(),
        })?;
        xpub = xpub.derive_child(child_number).map_err(|e| Error::DerivationFailed {
            detail: e.to_string(),
            ctx: ctx(),
        })?;
    }
    Ok(Bip32PublicKey::to_bytes(xpub.public_key()).to_vec())
}
