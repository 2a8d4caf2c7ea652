//! Non-hardened public-key-only child derivation for ed25519 (§4.3 step 2).
//!
//! Standard SLIP-10 only defines *hardened* ed25519 derivation, since scalar
//! clamping breaks the additive homomorphism BIP32 relies on. Threshold
//! wallets that hold only an aggregated ed25519 public key (never a root
//! scalar) instead use the same additive tweak BIP32 uses for secp256k1,
//! applied directly to the edwards25519 group: the child point is the
//! parent point plus `tweak * B`, where `tweak` comes from
//! `HMAC-SHA512(chainCode, parentPubkey || index)`. This is the same
//! construction `derive::secp256k1` performs, generalized to a different
//! curve.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::{Error, ErrorContext};

type HmacSha512 = Hmac<Sha512>;

fn ctx() -> ErrorContext {
    ErrorContext::new("derive::ed25519")
}

/// Derive the non-hardened child public key at the end of `path` from a
/// root ed25519 public key (32 bytes) and chain code, walking one additive
/// tweak step per `path` entry. Each step's `HMAC-SHA512` output is split
/// SLIP-10-style into `IL` (the tweak scalar) and `IR` (the next step's
/// chain code), so chain codes propagate across multiple steps the same
/// way `derive::secp256k1` propagates them through `bip32::XPub`.
pub fn derive_child_pubkey(
    root_pubkey: &[u8],
    chain_code: &[u8; 32],
    path: &[u32],
) -> Result<Vec<u8>, Error> {
    if root_pubkey.len() != 32 {
        return Err(Error::DerivationFailed {
            detail: format!("ed25519 public key must be 32 bytes, got {}", root_pubkey.len()),
            ctx: ctx(),
        });
    }
    let mut parent_bytes = [0u8; 32];
    parent_bytes.copy_from_slice(root_pubkey);
    let mut parent_point = CompressedEdwardsY(parent_bytes)
        .decompress()
        .ok_or_else(|| Error::DerivationFailed {
            detail: "parent ed25519 public key is not a valid curve point".to_string(),
            ctx: ctx(),
        })?;
    let mut parent_compressed = parent_bytes;
    let mut cc = *chain_code;

    for &index in path {
        let mut mac = HmacSha512::new_from_slice(&cc).expect("HMAC accepts any key length");
        mac.update(&[0x00]);
        mac.update(&parent_compressed);
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut il = [0u8; 32];
        il.copy_from_slice(&digest[..32]);
        let mut ir = [0u8; 32];
        ir.copy_from_slice(&digest[32..]);

        let tweak = Scalar::from_bytes_mod_order(il);
        let child_point = parent_point + (&tweak * &ED25519_BASEPOINT_TABLE);

        parent_compressed = child_point.compress().to_bytes();
        parent_point = child_point;
        cc = ir;
    }

    Ok(parent_compressed.to_vec())
}
