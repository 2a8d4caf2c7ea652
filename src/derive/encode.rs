//! Per-chain address encoding from a derived child public key (§4.3 step 3).
//!
//! Ethereum's keccak-last-20 scheme is lifted directly from
//! `wallet/mod.rs::ethereum_address`, generalized from a locally-held
//! signing key to an arbitrary derived public key.

use bech32::{ToBase32, Variant};
use bitcoin::hashes::{hash160, Hash};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{Error, ErrorContext};
use crate::registry::AddressEncoding;

fn ctx() -> ErrorContext {
    ErrorContext::new("derive::encode")
}

pub fn encode(encoding: &AddressEncoding, pubkey: &[u8]) -> Result<String, Error> {
    match encoding {
        AddressEncoding::P2wpkh { hrp } => p2wpkh(pubkey, hrp),
        AddressEncoding::P2pkh => p2pkh(pubkey),
        AddressEncoding::Evm => evm(pubkey),
        AddressEncoding::Bech32 { hrp } => cosmos_bech32(pubkey, hrp),
        AddressEncoding::Base58 => Ok(bs58::encode(pubkey).into_string()),
        AddressEncoding::Ss58 => ss58(pubkey),
        AddressEncoding::Cardano => cardano(pubkey),
        AddressEncoding::Ton => ton(pubkey),
    }
}

/// Native segwit v0 P2WPKH, BIP173 (Bitcoin/Litecoin family; `hrp` varies by chain).
fn p2wpkh(compressed_pubkey: &[u8], hrp: &str) -> Result<String, Error> {
    let hash = hash160::Hash::hash(compressed_pubkey);
    let mut data = vec![bech32::u5::try_from_u8(0).expect("0 fits in 5 bits")];
    data.extend(hash.to_byte_array().to_base32());
    bech32::encode(hrp, data, Variant::Bech32).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })
}

fn p2pkh(compressed_pubkey: &[u8]) -> Result<String, Error> {
    let hash = hash160::Hash::hash(compressed_pubkey);
    let mut payload = vec![0x00u8];
    payload.extend_from_slice(hash.to_byte_array().as_slice());
    Ok(bs58::encode(payload).with_check().into_string())
}

/// Keccak-256 of the uncompressed public key (sans `0x04` prefix), last 20
/// bytes, `0x`-prefixed hex — identical to `wallet/mod.rs::ethereum_address`.
fn evm(pubkey: &[u8]) -> Result<String, Error> {
    let uncompressed = if pubkey.len() == 33 {
        let key = k256::PublicKey::from_sec1_bytes(pubkey).map_err(|e| Error::DerivationFailed {
            detail: format!("invalid secp256k1 key: {e}"),
            ctx: ctx(),
        })?;
        key.to_encoded_point(false).as_bytes().to_vec()
    } else {
        pubkey.to_vec()
    };
    if uncompressed.len() != 65 || uncompressed[0] != 0x04 {
        return Err(Error::DerivationFailed {
            detail: "invalid public key format for EVM address derivation".to_string(),
            ctx: ctx(),
        });
    }

    let mut hasher = Keccak::v256();
    hasher.update(&uncompressed[1..]);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

fn cosmos_bech32(compressed_pubkey: &[u8], hrp: &str) -> Result<String, Error> {
    let hash = hash160::Hash::hash(compressed_pubkey);
    let account = cosmrs::AccountId::new(hrp, hash.to_byte_array().as_slice()).map_err(|e| {
        Error::DerivationFailed {
            detail: e.to_string(),
            ctx: ctx(),
        }
    })?;
    Ok(account.to_string())
}

/// SS58 (Polkadot): `prefix || pubkey || blake2b-512-derived checksum[0..cksum_len]`,
/// base58-encoded. Generic (network 0) address format.
fn ss58(pubkey: &[u8]) -> Result<String, Error> {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;

    const PREFIX: u8 = 0;
    const CHECKSUM_LEN: usize = 2;

    let mut payload = vec![PREFIX];
    payload.extend_from_slice(pubkey);

    let mut hasher = Blake2bVar::new(64).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })?;
    hasher.update(b"SS58PRE");
    hasher.update(&payload);
    let mut digest = [0u8; 64];
    hasher.finalize_variable(&mut digest).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })?;

    payload.extend_from_slice(&digest[..CHECKSUM_LEN]);
    Ok(bs58::encode(payload).into_string())
}

/// Shelley enterprise address (no staking credential): header byte `0x61`
/// (payment-key hash, mainnet) + blake2b-224 of the public key, bech32 `addr1`.
fn cardano(pubkey: &[u8]) -> Result<String, Error> {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;

    let mut hasher = Blake2bVar::new(28).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })?;
    hasher.update(pubkey);
    let mut hash = [0u8; 28];
    hasher.finalize_variable(&mut hash).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })?;

    let mut payload = vec![0x61u8];
    payload.extend_from_slice(&hash);
    bech32::encode("addr", payload.to_base32(), Variant::Bech32).map_err(|e| Error::DerivationFailed {
        detail: e.to_string(),
        ctx: ctx(),
    })
}

/// TON raw, non-bounceable address form `{workchain}:{hash}` (workchain 0).
fn ton(pubkey: &[u8]) -> Result<String, Error> {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey);
    Ok(format!("0:{}", hex::encode(hash)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_is_lowercase_hex_with_prefix() {
        let sk = k256::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = sk.public_key();
        let addr = evm(&pk.to_sec1_bytes()).unwrap();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
    }

    #[test]
    fn ss58_encodes_without_panicking() {
        let pubkey = [1u8; 32];
        let addr = ss58(&pubkey).unwrap();
        assert!(!addr.is_empty());
    }

    #[test]
    fn p2wpkh_honors_the_requested_hrp() {
        let pubkey = [2u8; 33];
        let bc = encode(&AddressEncoding::P2wpkh { hrp: "bc" }, &pubkey).unwrap();
        let ltc = encode(&AddressEncoding::P2wpkh { hrp: "ltc" }, &pubkey).unwrap();
        assert!(bc.starts_with("bc1"));
        assert!(ltc.starts_with("ltc1"));
        assert_ne!(bc, ltc);
    }
}
