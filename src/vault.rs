//! Shared data model: `Vault`, token descriptors, address book entries, and
//! the canonical `KeysignPayload` (§3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// ECDSA protocol family a vault's keyshares were generated with (§3, §9 open
/// question). Both spellings are accepted as aliases at parse time and the
/// original spelling is preserved on round-trip by the container codec,
/// which stores the raw string alongside the canonical enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibType {
    Dkls,
    Gg20,
}

impl LibType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DKLS" => Some(LibType::Dkls),
            "GG20" => Some(LibType::Gg20),
            _ => None,
        }
    }

    pub fn canonical_str(self) -> &'static str {
        match self {
            LibType::Dkls => "DKLS",
            LibType::Gg20 => "GG20",
        }
    }
}

/// Aggregated public keys produced by the key-generation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    /// Hex-encoded SEC1 compressed secp256k1 public key. Doubles as `Vault::id`.
    pub ecdsa: String,
    /// Hex-encoded ed25519 public key.
    pub eddsa: String,
}

/// Decrypted keyshare material, present only while unlocked (§3, §4.9).
#[derive(Clone, Serialize, Deserialize, zeroize::ZeroizeOnDrop)]
pub struct KeyShares {
    /// Base64 blob fed to the ECDSA MPC library.
    pub ecdsa: String,
    /// Base64 blob fed to the EdDSA MPC library.
    pub eddsa: String,
}

impl std::fmt::Debug for KeyShares {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyShares").field("ecdsa", &"<redacted>").field("eddsa", &"<redacted>").finish()
    }
}

/// Per-chain token descriptor (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    /// `"<chain>-<contractAddress>"`.
    pub id: String,
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub chain_id: String,
    #[serde(default)]
    pub is_native: bool,
}

/// Source of an address book entry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    Saved,
    Vaults,
}

/// Address book entry. Uniqueness is keyed on `(chain, address)` for
/// `source = Saved` entries (§9 open question: `(chain, address)` is the
/// natural key, not `address` alone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub chain: String,
    pub address: String,
    pub name: String,
    pub source: AddressSource,
    pub date_added: chrono::DateTime<chrono::Utc>,
}

/// The vault record (§3). Invariant fields never change after creation;
/// mutable fields may be updated by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    // --- invariant ---
    pub name: String,
    pub public_keys: PublicKeys,
    pub hex_chain_code: String,
    pub local_party_id: String,
    pub signers: Vec<String>,
    pub threshold: usize,
    pub lib_type: LibType,
    /// Original on-disk spelling of `lib_type` ("DKLS" or "GG20"), preserved
    /// verbatim by the container codec on re-encode.
    pub lib_type_raw: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub is_backed_up: bool,
    pub order: i64,

    // --- mutable ---
    pub currency: String,
    pub enabled_chains: Vec<String>,
    pub tokens: HashMap<String, Vec<TokenDescriptor>>,

    // --- present only while unlocked ---
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_shares: Option<KeyShares>,

    /// Fields not understood by this build, preserved verbatim on re-encode
    /// (container-codec forward-compatibility guarantee, §4.1).
    #[serde(flatten)]
    pub unknown_fields: serde_json::Map<String, serde_json::Value>,
}

impl Vault {
    /// `id = publicKeys.ecdsa`, globally unique and immutable (§3).
    pub fn id(&self) -> &str {
        &self.public_keys.ecdsa
    }

    pub fn is_unlocked(&self) -> bool {
        self.key_shares.is_some()
    }

    /// Project to the subset of fields safe to list without unlocking (§4.2).
    pub fn summary(&self) -> VaultSummary {
        VaultSummary {
            id: self.id().to_string(),
            name: self.name.clone(),
            public_keys: self.public_keys.clone(),
            signers: self.signers.clone(),
            threshold: self.threshold,
            created_at: self.created_at,
            last_modified: self.last_modified,
            is_backed_up: self.is_backed_up,
            order: self.order,
        }
    }
}

/// Keyshare-free view of a vault, safe to list/display (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSummary {
    pub id: String,
    pub name: String,
    pub public_keys: PublicKeys,
    pub signers: Vec<String>,
    pub threshold: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub is_backed_up: bool,
    pub order: i64,
}

/// App-wide settings persisted at `settings.json` (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub default_currency: String,
    pub language: String,
}

/// One leg of a coin reference inside a `KeysignPayload` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinRef {
    pub chain: String,
    pub address: String,
    pub decimals: u8,
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub hex_public_key: String,
}

/// Chain-specific data attached to a `KeysignPayload` (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockchainSpecific {
    Utxo {
        inputs: Vec<UtxoInput>,
        fee_sat_per_vbyte: u64,
    },
    Evm {
        nonce: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_fee_per_gas: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_priority_fee_per_gas: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        gas_price: Option<String>,
        gas_limit: u64,
        chain_id: u64,
    },
    Cosmos {
        account_number: u64,
        sequence: u64,
        gas: u64,
    },
    Solana {
        recent_blockhash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority_fee_price: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        compute_unit_limit: Option<u32>,
    },
}

/// One UTXO selected as a transaction input (§4.5 edge-case policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoInput {
    pub txid: String,
    pub vout: u32,
    pub amount_sats: u64,
    pub derivation_index: u32,
}

/// Cosmos `signAmino` message (§4.5 intent 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AminoMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub value: serde_json::Value,
}

/// Cosmos `signAmino` fee (§4.5 intent 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AminoFee {
    pub amount: Vec<AminoCoin>,
    pub gas: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AminoCoin {
    pub denom: String,
    pub amount: String,
}

/// Non-transaction-building data carried alongside the payload (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignData {
    SignAmino {
        fee: AminoFee,
        msgs: Vec<AminoMsg>,
    },
    SignDirect {
        body_bytes_b64: String,
        auth_info_bytes_b64: String,
        chain_id: String,
        account_number: u64,
    },
}

/// The canonical request object describing a transaction to be signed (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysignPayload {
    pub coin: CoinRef,
    pub to_address: String,
    /// Base-unit amount string; all monetary arithmetic is big-integer, never float.
    pub to_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub vault_local_party_id: String,
    pub vault_public_key_ecdsa: String,
    pub lib_type: LibType,
    pub blockchain_specific: BlockchainSpecific,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_data: Option<SignData>,
}
