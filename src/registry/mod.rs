//! Chain Registry (C4, §4.4): the single source of truth for per-chain
//! policy. Every other component (`derive`, `txbuild`, `presign`,
//! `broadcast`) consults this table instead of embedding chain knowledge
//! of its own.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::error::{Error, ErrorContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    Ecdsa,
    Eddsa,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressEncoding {
    P2wpkh { hrp: &'static str },
    P2pkh,
    Evm,
    Bech32 { hrp: &'static str },
    Base58,
    Ss58,
    Cardano,
    Ton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFormat {
    Utxo,
    EvmLegacy,
    Evm1559,
    CosmosAmino,
    CosmosDirect,
    Solana,
    Ton,
    Ripple,
    Tron,
    Sui,
    Polkadot,
    Cardano,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeModel {
    SatPerVbyte,
    GasPriceLimit,
    GasTipCapLimit,
    CosmosGas,
    Fixed,
}

/// Per-chain policy record (§4.4).
#[derive(Debug, Clone)]
pub struct ChainPolicy {
    pub chain: &'static str,
    pub curve: Curve,
    pub hd_path: &'static str,
    pub address_encoding: AddressEncoding,
    pub tx_format: TxFormat,
    pub fee_model: FeeModel,
    pub explorer_tx_template: &'static str,
    pub broadcast_adapter: &'static str,
}

static REGISTRY: Lazy<HashMap<&'static str, ChainPolicy>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut insert = |p: ChainPolicy| {
        m.insert(p.chain, p);
    };

    insert(ChainPolicy {
        chain: "bitcoin",
        curve: Curve::Ecdsa,
        hd_path: "m/84'/0'/0'/0/0",
        address_encoding: AddressEncoding::P2wpkh { hrp: "bc" },
        tx_format: TxFormat::Utxo,
        fee_model: FeeModel::SatPerVbyte,
        explorer_tx_template: "https://mempool.space/tx/{hash}",
        broadcast_adapter: "bitcoin",
    });
    insert(ChainPolicy {
        chain: "litecoin",
        curve: Curve::Ecdsa,
        hd_path: "m/84'/2'/0'/0/0",
        address_encoding: AddressEncoding::P2wpkh { hrp: "ltc" },
        tx_format: TxFormat::Utxo,
        fee_model: FeeModel::SatPerVbyte,
        explorer_tx_template: "https://litecoinspace.org/tx/{hash}",
        broadcast_adapter: "litecoin",
    });
    insert(ChainPolicy {
        chain: "ethereum",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/60'/0'/0/0",
        address_encoding: AddressEncoding::Evm,
        tx_format: TxFormat::Evm1559,
        fee_model: FeeModel::GasTipCapLimit,
        explorer_tx_template: "https://etherscan.io/tx/{hash}",
        broadcast_adapter: "evm",
    });
    insert(ChainPolicy {
        chain: "bsc",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/60'/0'/0/0",
        address_encoding: AddressEncoding::Evm,
        tx_format: TxFormat::EvmLegacy,
        fee_model: FeeModel::GasPriceLimit,
        explorer_tx_template: "https://bscscan.com/tx/{hash}",
        broadcast_adapter: "evm",
    });
    insert(ChainPolicy {
        chain: "cosmos",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/118'/0'/0/0",
        address_encoding: AddressEncoding::Bech32 { hrp: "cosmos" },
        tx_format: TxFormat::CosmosDirect,
        fee_model: FeeModel::CosmosGas,
        explorer_tx_template: "https://www.mintscan.io/cosmos/tx/{hash}",
        broadcast_adapter: "cosmos",
    });
    insert(ChainPolicy {
        chain: "thorchain",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/931'/0'/0/0",
        address_encoding: AddressEncoding::Bech32 { hrp: "thor" },
        tx_format: TxFormat::CosmosAmino,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://thorchain.net/tx/{hash}",
        broadcast_adapter: "thorchain",
    });
    insert(ChainPolicy {
        chain: "mayachain",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/931'/0'/0/0",
        address_encoding: AddressEncoding::Bech32 { hrp: "maya" },
        tx_format: TxFormat::CosmosAmino,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://www.mayascan.org/tx/{hash}",
        broadcast_adapter: "mayachain",
    });
    insert(ChainPolicy {
        chain: "solana",
        curve: Curve::Eddsa,
        hd_path: "m/44'/501'/0'/0'",
        address_encoding: AddressEncoding::Base58,
        tx_format: TxFormat::Solana,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://solscan.io/tx/{hash}",
        broadcast_adapter: "solana",
    });
    insert(ChainPolicy {
        chain: "ripple",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/144'/0'/0/0",
        address_encoding: AddressEncoding::Base58,
        tx_format: TxFormat::Ripple,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://xrpscan.com/tx/{hash}",
        broadcast_adapter: "ripple",
    });
    insert(ChainPolicy {
        chain: "tron",
        curve: Curve::Ecdsa,
        hd_path: "m/44'/195'/0'/0/0",
        address_encoding: AddressEncoding::Base58,
        tx_format: TxFormat::Tron,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://tronscan.org/#/transaction/{hash}",
        broadcast_adapter: "tron",
    });
    insert(ChainPolicy {
        chain: "sui",
        curve: Curve::Eddsa,
        hd_path: "m/44'/784'/0'/0'/0'",
        address_encoding: AddressEncoding::Base58,
        tx_format: TxFormat::Sui,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://suiscan.xyz/mainnet/tx/{hash}",
        broadcast_adapter: "sui",
    });
    insert(ChainPolicy {
        chain: "polkadot",
        curve: Curve::Eddsa,
        hd_path: "m/44'/354'/0'/0'/0'",
        address_encoding: AddressEncoding::Ss58,
        tx_format: TxFormat::Polkadot,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://polkadot.subscan.io/extrinsic/{hash}",
        broadcast_adapter: "polkadot",
    });
    insert(ChainPolicy {
        chain: "cardano",
        curve: Curve::Eddsa,
        hd_path: "m/1852'/1815'/0'/0/0",
        address_encoding: AddressEncoding::Cardano,
        tx_format: TxFormat::Cardano,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://cardanoscan.io/transaction/{hash}",
        broadcast_adapter: "cardano",
    });
    insert(ChainPolicy {
        chain: "ton",
        curve: Curve::Eddsa,
        hd_path: "m/44'/607'/0'",
        address_encoding: AddressEncoding::Ton,
        tx_format: TxFormat::Ton,
        fee_model: FeeModel::Fixed,
        explorer_tx_template: "https://tonscan.org/tx/{hash}",
        broadcast_adapter: "ton",
    });

    m
});

/// Look up a chain's policy, failing with `UnsupportedChain` (§4.3, §4.4).
pub fn policy(chain: &str) -> Result<&'static ChainPolicy, Error> {
    REGISTRY
        .get(chain)
        .ok_or_else(|| Error::UnsupportedChain {
            chain: chain.to_string(),
            ctx: ErrorContext::new("registry::policy"),
        })
}

pub fn is_supported(chain: &str) -> bool {
    REGISTRY.contains_key(chain)
}

pub fn supported_chains() -> Vec<&'static str> {
    let mut v: Vec<&'static str> = REGISTRY.keys().copied().collect();
    v.sort_unstable();
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_resolves() {
        let p = policy("bitcoin").unwrap();
        assert_eq!(p.curve, Curve::Ecdsa);
        assert_eq!(p.tx_format, TxFormat::Utxo);
    }

    #[test]
    fn unknown_chain_is_unsupported_chain_error() {
        let err = policy("does-not-exist").unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain { .. }));
    }

    #[test]
    fn registry_covers_every_tx_format_family() {
        let chains = supported_chains();
        assert!(chains.contains(&"bitcoin"));
        assert!(chains.contains(&"ethereum"));
        assert!(chains.contains(&"cosmos"));
        assert!(chains.contains(&"solana"));
    }
}
