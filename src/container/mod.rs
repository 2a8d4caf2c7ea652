//! Container Codec (C1, §4.1, §6).
//!
//! A `.vult` file is a small self-describing binary envelope: a magic +
//! version header, a clear JSON section carrying every `Vault` field except
//! `key_shares`, and a key-share section that is either raw JSON (plaintext
//! vault) or an AES-256-GCM ciphertext keyed by an Argon2id-stretched
//! password (encrypted vault). Splitting the envelope this way is what lets
//! `VaultStore::list_vaults`/`get_active` (§4.2) return full vault metadata
//! without ever requiring a password, while still honoring the invariant
//! that keyshare bytes are the only thing a password ever protects.
//!
//! Unknown JSON fields on `Vault` are preserved verbatim via
//! `Vault::unknown_fields` so a forward-incompatible field is never silently
//! dropped on re-encode.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use serde_json::Value;

use crate::error::{Error, ErrorContext};
use crate::vault::Vault;

const MAGIC: &[u8; 4] = b"VLT1";
const VERSION: u32 = 1;

const ARGON_SALT_LEN: usize = 16;
const GCM_NONCE_LEN: usize = 12;

/// Argon2id parameters, persisted inside the envelope so decode is
/// self-describing (§6: memory >= 64 MiB, iterations >= 3, parallelism = 1).
#[derive(Debug, Clone, Copy)]
pub struct ArgonParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for ArgonParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

fn ctx(op: &str) -> ErrorContext {
    ErrorContext::new(op)
}

struct Header {
    encrypted: bool,
    clear: Value,
}

fn parse_header(bytes: &[u8]) -> Result<(Header, usize), Error> {
    if bytes.len() < 9 || &bytes[0..4] != MAGIC {
        return Err(Error::MalformedContainer {
            detail: "unrecognized container header".into(),
            ctx: ctx("decode"),
        });
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(Error::UnsupportedVersion {
            version,
            ctx: ctx("decode"),
        });
    }
    let encrypted = bytes[8] != 0;
    let mut off = 9;
    if bytes.len() < off + 4 {
        return Err(Error::MalformedContainer {
            detail: "truncated envelope".into(),
            ctx: ctx("decode"),
        });
    }
    let clear_len = read_u32(bytes, &mut off) as usize;
    if bytes.len() < off + clear_len {
        return Err(Error::MalformedContainer {
            detail: "truncated clear section".into(),
            ctx: ctx("decode"),
        });
    }
    let clear: Value =
        serde_json::from_slice(&bytes[off..off + clear_len]).map_err(|e| Error::MalformedContainer {
            detail: format!("invalid clear section: {e}"),
            ctx: ctx("decode"),
        })?;
    off += clear_len;

    Ok((Header { encrypted, clear }, off))
}

/// Inspect only the envelope header; never attempts decryption.
pub fn is_encrypted(bytes: &[u8]) -> Result<bool, Error> {
    let (header, _) = parse_header(bytes)?;
    Ok(header.encrypted)
}

/// Decode a `.vult` container, populating `key_shares` only when the data is
/// available: always for a plaintext container, or when `password` is the
/// correct password for an encrypted one.
pub fn decode(bytes: &[u8], password: Option<&str>) -> Result<Vault, Error> {
    let (header, off) = parse_header(bytes)?;
    let body = &bytes[off..];

    let key_shares_value = if header.encrypted {
        let password = password.ok_or_else(|| Error::PasswordRequired { ctx: ctx("decode") })?;
        let bytes = decrypt_body(body, password)?;
        parse_key_shares_bytes(&bytes)?
    } else {
        parse_key_shares_bytes(body)?
    };

    build_vault(header.clear, key_shares_value)
}

/// Decode only the clear section — used by the vault store for listing and
/// "active vault" lookups that must not require a password. `key_shares` is
/// always `None` on the returned `Vault`; callers go through the secret
/// cache (C9) to actually unlock keyshare material.
pub fn decode_locked(bytes: &[u8]) -> Result<Vault, Error> {
    let (header, _) = parse_header(bytes)?;
    build_vault(header.clear, None)
}

fn parse_key_shares_bytes(bytes: &[u8]) -> Result<Option<Value>, Error> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(bytes).map_err(|e| Error::MalformedContainer {
        detail: format!("invalid keyshare section: {e}"),
        ctx: ctx("decode"),
    })?;
    Ok(Some(value))
}

fn build_vault(mut clear: Value, key_shares: Option<Value>) -> Result<Vault, Error> {
    let obj = clear.as_object_mut().ok_or_else(|| Error::MalformedContainer {
        detail: "clear section is not a JSON object".into(),
        ctx: ctx("decode"),
    })?;
    match key_shares {
        Some(v) => {
            obj.insert("key_shares".to_string(), v);
        }
        None => {
            obj.remove("key_shares");
        }
    }
    serde_json::from_value(clear).map_err(|e| Error::MalformedContainer {
        detail: format!("invalid vault payload: {e}"),
        ctx: ctx("decode"),
    })
}

fn decrypt_body(body: &[u8], password: &str) -> Result<Vec<u8>, Error> {
    const HEADER_LEN: usize = 4 + 4 + 4 + ARGON_SALT_LEN + GCM_NONCE_LEN + 4;
    if body.len() < HEADER_LEN {
        return Err(Error::MalformedContainer {
            detail: "truncated encrypted keyshare section".into(),
            ctx: ctx("decrypt_body"),
        });
    }
    let mut off = 0;
    let memory_kib = read_u32(body, &mut off);
    let iterations = read_u32(body, &mut off);
    let parallelism = read_u32(body, &mut off);
    let salt: [u8; ARGON_SALT_LEN] = body[off..off + ARGON_SALT_LEN].try_into().unwrap();
    off += ARGON_SALT_LEN;
    let nonce_bytes: [u8; GCM_NONCE_LEN] = body[off..off + GCM_NONCE_LEN].try_into().unwrap();
    off += GCM_NONCE_LEN;
    let ciphertext_len = read_u32(body, &mut off) as usize;
    if body.len() < off + ciphertext_len {
        return Err(Error::MalformedContainer {
            detail: "truncated ciphertext".into(),
            ctx: ctx("decrypt_body"),
        });
    }
    let ciphertext = &body[off..off + ciphertext_len];

    let params = ArgonParams {
        memory_kib,
        iterations,
        parallelism,
    };
    let key_bytes = derive_key(password, &salt, &params)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::WrongPassword { ctx: ctx("decrypt_body") })
}

/// Re-encode a vault into a `.vult` container. Omitting `password` produces
/// a plaintext container whose keyshare section carries raw bytes.
pub fn encode(vault: &Vault, password: Option<&str>) -> Result<Vec<u8>, Error> {
    let mut value = serde_json::to_value(vault).map_err(|e| Error::MalformedContainer {
        detail: format!("failed to serialize vault: {e}"),
        ctx: ctx("encode"),
    })?;
    let key_shares_value = value
        .as_object_mut()
        .and_then(|obj| obj.remove("key_shares"));
    let clear_bytes = serde_json::to_vec(&value).map_err(|e| Error::MalformedContainer {
        detail: format!("failed to serialize vault: {e}"),
        ctx: ctx("encode"),
    })?;
    let key_shares_bytes = match &key_shares_value {
        Some(v) => serde_json::to_vec(v).unwrap(),
        None => Vec::new(),
    };

    let mut out = Vec::with_capacity(clear_bytes.len() + key_shares_bytes.len() + 64);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());

    match password {
        None => {
            out.push(0);
            out.extend_from_slice(&(clear_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&clear_bytes);
            out.extend_from_slice(&key_shares_bytes);
        }
        Some(password) => {
            out.push(1);
            out.extend_from_slice(&(clear_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&clear_bytes);

            let params = ArgonParams::default();
            let mut salt = [0u8; ARGON_SALT_LEN];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
            let key_bytes = derive_key(password, &salt, &params)?;
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            let ciphertext = cipher
                .encrypt(&nonce, key_shares_bytes.as_slice())
                .map_err(|e| Error::MalformedContainer {
                    detail: format!("encryption failed: {e}"),
                    ctx: ctx("encode"),
                })?;

            out.extend_from_slice(&params.memory_kib.to_le_bytes());
            out.extend_from_slice(&params.iterations.to_le_bytes());
            out.extend_from_slice(&params.parallelism.to_le_bytes());
            out.extend_from_slice(&salt);
            out.extend_from_slice(nonce.as_slice());
            out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
            out.extend_from_slice(&ciphertext);
        }
    }

    Ok(out)
}

fn derive_key(password: &str, salt: &[u8], params: &ArgonParams) -> Result<[u8; 32], Error> {
    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| Error::MalformedContainer {
        detail: format!("invalid argon2 parameters: {e}"),
        ctx: ctx("derive_key"),
    })?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| Error::MalformedContainer {
            detail: format!("key derivation failed: {e}"),
            ctx: ctx("derive_key"),
        })?;
    Ok(key)
}

fn read_u32(buf: &[u8], off: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
    *off += 4;
    v
}

/// Base64 wrapping used when a container travels as text (§6: "base64 when
/// serialized to text").
pub fn to_base64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| Error::MalformedContainer {
            detail: format!("invalid base64: {e}"),
            ctx: ctx("from_base64"),
        })
}
