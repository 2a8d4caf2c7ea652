//! MPC library traits (external collaborator, §1, §4.7).
//!
//! The real DKLS-family (ECDSA) and FROST-like (EdDSA) threshold protocols
//! are explicitly out of scope (§1); `MpcDriver` is the seam the signing
//! session drives, and `test_support::LocalMpcDriver` is a deterministic
//! single-process stand-in used only by this crate's own test suite.

use async_trait::async_trait;

use crate::error::{Error, ErrorContext};
use crate::registry::Curve;
use crate::vault::{KeyShares, LibType};

/// A produced signature, shaped per curve family (§4.7 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Ecdsa { r: [u8; 32], s: [u8; 32], v: u8 },
    Eddsa { r: [u8; 32], s: [u8; 32] },
}

/// Drives one threshold-signing round for a single digest. Implementations
/// own whatever relay/transport plumbing the real protocol needs; the
/// signing session (C7) only calls `sign` once per digest, in digest order.
/// `curve` selects the DKLS-family-ECDSA vs FROST-like-EdDSA branch;
/// `lib_type` further distinguishes ECDSA sub-families (DKLS vs GG20).
#[async_trait]
pub trait MpcDriver: Send + Sync {
    async fn sign(
        &self,
        key_shares: &KeyShares,
        curve: Curve,
        lib_type: LibType,
        digest: &[u8; 32],
    ) -> Result<Signature, Error>;
}

pub mod test_support {
    use super::*;
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey};
    use sha2::{Digest, Sha256};

    /// Deterministic, single-process signer used only by this crate's own
    /// tests: derives a throwaway scalar from the (opaque) keyshare bytes
    /// instead of running a real threshold protocol. Never construct this
    /// outside `#[cfg(test)]`.
    #[derive(Default)]
    pub struct LocalMpcDriver;

    fn scalar_seed(key_shares: &KeyShares, suffix: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(key_shares.ecdsa.as_bytes());
        hasher.update(key_shares.eddsa.as_bytes());
        hasher.update(suffix.as_bytes());
        hasher.finalize().into()
    }

    #[async_trait]
    impl MpcDriver for LocalMpcDriver {
        async fn sign(
            &self,
            key_shares: &KeyShares,
            curve: Curve,
            _lib_type: LibType,
            digest: &[u8; 32],
        ) -> Result<Signature, Error> {
            match curve {
                Curve::Ecdsa => {
                    let seed = scalar_seed(key_shares, "ecdsa");
                    let signing_key =
                        SigningKey::from_bytes((&seed).into()).map_err(|e| Error::LibraryError {
                            detail: e.to_string(),
                            ctx: ErrorContext::new("mpc::test_support::sign"),
                        })?;
                    let (sig, recid): (K256Signature, RecoveryId) = signing_key
                        .sign_prehash(digest)
                        .map_err(|e| Error::LibraryError {
                            detail: e.to_string(),
                            ctx: ErrorContext::new("mpc::test_support::sign"),
                        })?;
                    let bytes = sig.to_bytes();
                    let mut r = [0u8; 32];
                    let mut s = [0u8; 32];
                    r.copy_from_slice(&bytes[..32]);
                    s.copy_from_slice(&bytes[32..]);
                    Ok(Signature::Ecdsa {
                        r,
                        s,
                        v: recid.to_byte(),
                    })
                }
                Curve::Eddsa => Ok(eddsa_sign(key_shares, digest)),
            }
        }
    }

    /// EdDSA variant of the same throwaway signer, used where `KeysignPayload`
    /// routes through the ed25519 curve (Solana/Sui/Polkadot/Cardano).
    pub fn eddsa_sign(key_shares: &KeyShares, digest: &[u8; 32]) -> Signature {
        use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
        use curve25519_dalek::scalar::Scalar;
        use sha2::Sha512;

        let seed = scalar_seed(key_shares, "eddsa");
        let secret = Scalar::from_bytes_mod_order(seed);
        let public_point = &secret * &ED25519_BASEPOINT_TABLE;

        let mut nonce_hasher = Sha512::new();
        Digest::update(&mut nonce_hasher, seed);
        Digest::update(&mut nonce_hasher, digest);
        let nonce_digest: [u8; 64] = Digest::finalize(nonce_hasher).into();
        let nonce = Scalar::from_bytes_mod_order_wide(&nonce_digest);
        let r_point = &nonce * &ED25519_BASEPOINT_TABLE;

        let mut challenge_hasher = Sha512::new();
        Digest::update(&mut challenge_hasher, r_point.compress().to_bytes());
        Digest::update(&mut challenge_hasher, public_point.compress().to_bytes());
        Digest::update(&mut challenge_hasher, digest);
        let challenge_digest: [u8; 64] = Digest::finalize(challenge_hasher).into();
        let challenge = Scalar::from_bytes_mod_order_wide(&challenge_digest);

        let s = nonce + challenge * secret;
        Signature::Eddsa {
            r: r_point.compress().to_bytes(),
            s: s.to_bytes(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn shares() -> KeyShares {
            KeyShares {
                ecdsa: "ZWNkc2E=".into(),
                eddsa: "ZWRkc2E=".into(),
            }
        }

        #[tokio::test]
        async fn ecdsa_sign_is_deterministic() {
            let driver = LocalMpcDriver;
            let digest = [9u8; 32];
            let a = driver
                .sign(&shares(), Curve::Ecdsa, LibType::Dkls, &digest)
                .await
                .unwrap();
            let b = driver
                .sign(&shares(), Curve::Ecdsa, LibType::Dkls, &digest)
                .await
                .unwrap();
            assert_eq!(a, b);
        }

        #[tokio::test]
        async fn eddsa_sign_is_deterministic() {
            let driver = LocalMpcDriver;
            let digest = [3u8; 32];
            let a = driver
                .sign(&shares(), Curve::Eddsa, LibType::Dkls, &digest)
                .await
                .unwrap();
            let b = driver
                .sign(&shares(), Curve::Eddsa, LibType::Dkls, &digest)
                .await
                .unwrap();
            assert_eq!(a, b);
        }
    }
}
