//! Chain RPC adapter traits (external collaborator, §1, §6).
//!
//! A chain-family-agnostic trait the transaction builder, pre-sign hasher,
//! and broadcast bridge consult instead of embedding any particular
//! chain's RPC wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// UTXO unspent output, as reported by a UTXO-family RPC adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub amount_sats: u64,
}

/// Chain-specific data a sender needs before building a transaction.
#[derive(Debug, Clone)]
pub enum ChainSpecificData {
    Utxo {
        unspent: Vec<Utxo>,
        fee_sat_per_vbyte: u64,
    },
    Evm {
        nonce: u64,
        chain_id: u64,
        base_fee_per_gas: u128,
        suggested_priority_fee: u128,
        gas_price: Option<u128>,
    },
    Cosmos {
        account_number: u64,
        sequence: u64,
        gas_estimate: u64,
    },
    Solana {
        recent_blockhash: String,
    },
}

/// A chain RPC/broadcast adapter (§4.5, §4.8). One implementation per chain
/// family; selected by `ChainPolicy::broadcast_adapter`.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn fetch_chain_specific(&self, address: &str) -> Result<ChainSpecificData, Error>;
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, Error>;
}
