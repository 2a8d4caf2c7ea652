//! Transaction Builder (C5, §4.5): assembles a `KeysignPayload` from a
//! high-level user intent, consulting the chain registry (C4) for
//! everything chain-specific rather than embedding chain knowledge here.

mod evm;
mod utxo;

use cosmwasm_std::Uint128;

use crate::error::{Error, ErrorContext};
use crate::registry::{self, TxFormat};
use crate::rpc::{ChainRpc, ChainSpecificData};
use crate::vault::{
    AminoFee, AminoMsg, BlockchainSpecific, CoinRef, KeysignPayload, LibType, SignData,
};

fn ctx(op: &str, chain: &str) -> ErrorContext {
    ErrorContext::new(op).chain(chain)
}

/// Validate a destination address against the chain's address predicate
/// (§4.5 intent 1). This is a well-formedness check, not a derivation
/// round-trip — it accepts any syntactically valid address for the chain's
/// encoding family.
pub fn validate_address(chain: &str, address: &str) -> Result<(), Error> {
    let policy = registry::policy(chain)?;
    let ok = match policy.address_encoding {
        crate::registry::AddressEncoding::Evm => {
            address.len() == 42 && address.starts_with("0x") && hex::decode(&address[2..]).is_ok()
        }
        crate::registry::AddressEncoding::P2wpkh { hrp } => match bech32::decode(address) {
            Ok((decoded_hrp, _, _)) => decoded_hrp == hrp,
            Err(_) => false,
        },
        crate::registry::AddressEncoding::Cardano => bech32::decode(address).is_ok(),
        crate::registry::AddressEncoding::Bech32 { hrp } => match bech32::decode(address) {
            Ok((decoded_hrp, _, _)) => decoded_hrp == hrp,
            Err(_) => false,
        },
        crate::registry::AddressEncoding::Base58 | crate::registry::AddressEncoding::Ss58 => {
            bs58::decode(address).into_vec().is_ok()
        }
        crate::registry::AddressEncoding::P2pkh => bs58::decode(address).into_vec().is_ok(),
        crate::registry::AddressEncoding::Ton => address.contains(':'),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidAddress {
            detail: format!("'{address}' is not a valid {chain} address"),
            ctx: ctx("txbuild::validate_address", chain),
        })
    }
}

/// Intent 1 (§4.5): send native coin or a token.
pub struct SendIntent {
    pub coin: CoinRef,
    pub receiver: String,
    pub amount: String,
    pub memo: Option<String>,
    pub vault_local_party_id: String,
    pub vault_public_key_ecdsa: String,
    pub lib_type: LibType,
    /// Caller-supplied chain-specific data; skips the RPC fetch when present.
    pub prefetched: Option<ChainSpecificData>,
}

pub async fn build_send(
    intent: SendIntent,
    rpc: &dyn ChainRpc,
) -> Result<KeysignPayload, Error> {
    let chain = intent.coin.chain.as_str();
    let policy = registry::policy(chain)?;
    validate_address(chain, &intent.receiver)?;

    let data = match intent.prefetched {
        Some(d) => d,
        None => rpc.fetch_chain_specific(&intent.coin.address).await?,
    };

    let blockchain_specific = match (policy.tx_format, data) {
        (TxFormat::Utxo, ChainSpecificData::Utxo { unspent, fee_sat_per_vbyte }) => {
            utxo::select_inputs(&unspent, &intent.amount, fee_sat_per_vbyte, chain)?
        }
        (TxFormat::EvmLegacy | TxFormat::Evm1559, ChainSpecificData::Evm {
            nonce,
            chain_id,
            base_fee_per_gas,
            suggested_priority_fee,
            gas_price,
        }) => evm::build_fee_fields(
            policy.tx_format,
            nonce,
            chain_id,
            base_fee_per_gas,
            suggested_priority_fee,
            gas_price,
        ),
        (TxFormat::CosmosAmino | TxFormat::CosmosDirect, ChainSpecificData::Cosmos {
            account_number,
            sequence,
            gas_estimate,
        }) => BlockchainSpecific::Cosmos {
            account_number,
            sequence,
            gas: gas_estimate,
        },
        (TxFormat::Solana, ChainSpecificData::Solana { recent_blockhash }) => {
            BlockchainSpecific::Solana {
                recent_blockhash,
                priority_fee_price: None,
                compute_unit_limit: None,
            }
        }
        _ => {
            return Err(Error::UnsupportedChain {
                chain: chain.to_string(),
                ctx: ctx("txbuild::build_send", chain),
            })
        }
    };

    let mut coin = intent.coin;
    coin.hex_public_key = match policy.curve {
        crate::registry::Curve::Ecdsa => intent.vault_public_key_ecdsa.clone(),
        crate::registry::Curve::Eddsa => coin.hex_public_key,
    };

    Ok(KeysignPayload {
        coin,
        to_address: intent.receiver,
        to_amount: intent.amount,
        memo: intent.memo,
        vault_local_party_id: intent.vault_local_party_id,
        vault_public_key_ecdsa: intent.vault_public_key_ecdsa,
        lib_type: intent.lib_type,
        blockchain_specific,
        sign_data: None,
    })
}

/// Intent 2 (§4.5): Cosmos `signAmino` with custom messages.
pub struct SignAminoIntent {
    pub chain: String,
    pub coin: CoinRef,
    pub msgs: Vec<AminoMsg>,
    pub fee: AminoFee,
    pub memo: Option<String>,
    pub vault_local_party_id: String,
    pub vault_public_key_ecdsa: String,
    pub lib_type: LibType,
    pub skip_chain_specific_fetch: bool,
}

pub async fn build_sign_amino(
    intent: SignAminoIntent,
    rpc: &dyn ChainRpc,
) -> Result<KeysignPayload, Error> {
    let policy = registry::policy(&intent.chain)?;
    if policy.tx_format != TxFormat::CosmosAmino && policy.tx_format != TxFormat::CosmosDirect {
        return Err(Error::InvalidConfig {
            detail: format!("chain '{}' does not support signAmino", intent.chain),
            ctx: ctx("txbuild::build_sign_amino", &intent.chain),
        });
    }

    let (account_number, sequence, gas) = if intent.skip_chain_specific_fetch {
        (0, 0, intent.fee.gas.parse().unwrap_or(0))
    } else {
        match rpc.fetch_chain_specific(&intent.coin.address).await? {
            ChainSpecificData::Cosmos {
                account_number,
                sequence,
                gas_estimate,
            } => (account_number, sequence, gas_estimate),
            _ => {
                return Err(Error::BuildFailed {
                    detail: "rpc adapter returned non-cosmos data".to_string(),
                    ctx: ctx("txbuild::build_sign_amino", &intent.chain),
                })
            }
        }
    };

    Ok(KeysignPayload {
        coin: intent.coin,
        to_address: String::new(),
        to_amount: "0".to_string(),
        memo: intent.memo,
        vault_local_party_id: intent.vault_local_party_id,
        vault_public_key_ecdsa: intent.vault_public_key_ecdsa,
        lib_type: intent.lib_type,
        blockchain_specific: BlockchainSpecific::Cosmos {
            account_number,
            sequence,
            gas,
        },
        sign_data: Some(SignData::SignAmino {
            fee: intent.fee,
            msgs: intent.msgs,
        }),
    })
}

/// Intent 3 (§4.5): Cosmos `signDirect` with pre-encoded protobuf bytes.
pub struct SignDirectIntent {
    pub chain: String,
    pub coin: CoinRef,
    pub body_bytes_b64: String,
    pub auth_info_bytes_b64: String,
    pub chain_id: String,
    pub account_number: u64,
    pub memo: Option<String>,
    pub vault_local_party_id: String,
    pub vault_public_key_ecdsa: String,
    pub lib_type: LibType,
    pub skip_chain_specific_fetch: bool,
}

pub async fn build_sign_direct(
    intent: SignDirectIntent,
    rpc: &dyn ChainRpc,
) -> Result<KeysignPayload, Error> {
    let policy = registry::policy(&intent.chain)?;
    if policy.tx_format != TxFormat::CosmosDirect && policy.tx_format != TxFormat::CosmosAmino {
        return Err(Error::InvalidConfig {
            detail: format!("chain '{}' does not support signDirect", intent.chain),
            ctx: ctx("txbuild::build_sign_direct", &intent.chain),
        });
    }

    let sequence = if intent.skip_chain_specific_fetch {
        0
    } else {
        match rpc.fetch_chain_specific(&intent.coin.address).await? {
            ChainSpecificData::Cosmos { sequence, .. } => sequence,
            _ => {
                return Err(Error::BuildFailed {
                    detail: "rpc adapter returned non-cosmos data".to_string(),
                    ctx: ctx("txbuild::build_sign_direct", &intent.chain),
                })
            }
        }
    };

    Ok(KeysignPayload {
        coin: intent.coin,
        to_address: String::new(),
        to_amount: "0".to_string(),
        memo: intent.memo,
        vault_local_party_id: intent.vault_local_party_id,
        vault_public_key_ecdsa: intent.vault_public_key_ecdsa,
        lib_type: intent.lib_type,
        blockchain_specific: BlockchainSpecific::Cosmos {
            account_number: intent.account_number,
            sequence,
            gas: 0,
        },
        sign_data: Some(SignData::SignDirect {
            body_bytes_b64: intent.body_bytes_b64,
            auth_info_bytes_b64: intent.auth_info_bytes_b64,
            chain_id: intent.chain_id,
            account_number: intent.account_number,
        }),
    })
}

/// Intent 4 (§4.5): CosmWasm `MsgExecuteContract`, a specialization of
/// `signAmino`.
pub struct CosmWasmExecuteIntent {
    pub chain: String,
    pub coin: CoinRef,
    pub sender: String,
    pub contract: String,
    pub msg: serde_json::Value,
    pub funds: Vec<crate::vault::AminoCoin>,
    pub fee: AminoFee,
    pub memo: Option<String>,
    pub vault_local_party_id: String,
    pub vault_public_key_ecdsa: String,
    pub lib_type: LibType,
    pub skip_chain_specific_fetch: bool,
}

pub async fn build_cosmwasm_execute(
    intent: CosmWasmExecuteIntent,
    rpc: &dyn ChainRpc,
) -> Result<KeysignPayload, Error> {
    let value = serde_json::json!({
        "sender": intent.sender,
        "contract": intent.contract,
        "msg": intent.msg,
        "funds": intent.funds,
    });
    let msgs = vec![AminoMsg {
        msg_type: "wasm/MsgExecuteContract".to_string(),
        value,
    }];

    build_sign_amino(
        SignAminoIntent {
            chain: intent.chain,
            coin: intent.coin,
            msgs,
            fee: intent.fee,
            memo: intent.memo,
            vault_local_party_id: intent.vault_local_party_id,
            vault_public_key_ecdsa: intent.vault_public_key_ecdsa,
            lib_type: intent.lib_type,
            skip_chain_specific_fetch: intent.skip_chain_specific_fetch,
        },
        rpc,
    )
    .await
}

pub(crate) fn parse_u128(amount: &str, chain: &str) -> Result<u128, Error> {
    amount
        .parse::<Uint128>()
        .map(|v| v.u128())
        .map_err(|e| Error::BuildFailed {
            detail: format!("invalid amount '{amount}': {e}"),
            ctx: ctx("txbuild::parse_u128", chain),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_evm_address_passes() {
        assert!(validate_address("ethereum", "0x0000000000000000000000000000000000dEaD").is_ok());
    }

    #[test]
    fn malformed_evm_address_fails() {
        let err = validate_address("ethereum", "not-an-address").unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));
    }

    #[test]
    fn bitcoin_bech32_address_passes() {
        assert!(validate_address("bitcoin", "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").is_ok());
    }
}
