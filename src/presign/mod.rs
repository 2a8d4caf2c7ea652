//! Pre-Sign Hasher (C6, §4.6): given a `KeysignPayload`, produce the
//! ordered list of hex digests the signing session must sign, in the same
//! order the broadcast bridge later pairs them with signatures.

use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorContext};
use crate::registry::{self, TxFormat};
use crate::vault::{BlockchainSpecific, KeysignPayload, SignData};

fn ctx(op: &str, chain: &str) -> ErrorContext {
    ErrorContext::new(op).chain(chain)
}

/// Extract the ordered digests to sign for `payload` (§4.6 procedure a-d).
pub fn extract_digests(payload: &KeysignPayload) -> Result<Vec<String>, Error> {
    let chain = payload.coin.chain.as_str();
    let policy = registry::policy(chain)?;

    match (policy.tx_format, &payload.blockchain_specific) {
        (TxFormat::Utxo, BlockchainSpecific::Utxo { inputs, .. }) => utxo_sighashes(payload, inputs),
        (TxFormat::EvmLegacy | TxFormat::Evm1559, BlockchainSpecific::Evm { .. }) => {
            Ok(vec![evm_sighash(payload)?])
        }
        (TxFormat::CosmosAmino, BlockchainSpecific::Cosmos { .. }) => Ok(vec![cosmos_amino_hash(payload)?]),
        (TxFormat::CosmosDirect, BlockchainSpecific::Cosmos { .. }) => Ok(vec![cosmos_direct_hash(payload)?]),
        (TxFormat::Solana, BlockchainSpecific::Solana { .. }) => Ok(vec![solana_hash(payload)?]),
        _ => Err(Error::HashExtractionFailed {
            detail: format!("unsupported payload/chain combination for '{chain}'"),
            ctx: ctx("presign::extract_digests", chain),
        }),
    }
}

fn utxo_sighashes(
    payload: &KeysignPayload,
    inputs: &[crate::vault::UtxoInput],
) -> Result<Vec<String>, Error> {
    use bitcoin::hashes::{hash160, Hash};
    use bitcoin::sighash::{EcdsaSighashType, SighashCache};
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
    use std::str::FromStr;

    let chain = payload.coin.chain.as_str();
    let pubkey_bytes =
        hex::decode(&payload.coin.hex_public_key).map_err(|e| Error::HashExtractionFailed {
            detail: format!("invalid sender public key hex: {e}"),
            ctx: ctx("presign::utxo_sighashes", chain),
        })?;
    let pubkey_hash = hash160::Hash::hash(&pubkey_bytes);
    let script_pubkey = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array(
        *pubkey_hash.as_byte_array(),
    ));

    let tx_ins: Vec<TxIn> = inputs
        .iter()
        .map(|input| -> Result<TxIn, Error> {
            let txid = Txid::from_str(&input.txid).map_err(|e| Error::HashExtractionFailed {
                detail: format!("invalid txid '{}': {e}", input.txid),
                ctx: ctx("presign::utxo_sighashes", chain),
            })?;
            Ok(TxIn {
                previous_output: OutPoint::new(txid, input.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<Result<_, _>>()?;

    let amount: u64 = payload.to_amount.parse().map_err(|e| Error::HashExtractionFailed {
        detail: format!("invalid amount '{}': {e}", payload.to_amount),
        ctx: ctx("presign::utxo_sighashes", chain),
    })?;
    let tx_out = TxOut {
        value: Amount::from_sat(amount),
        script_pubkey: ScriptBuf::new(),
    };

    let unsigned_tx = Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: tx_ins,
        output: vec![tx_out],
    };

    let mut cache = SighashCache::new(&unsigned_tx);
    let mut digests = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        let sighash = cache
            .p2wpkh_signature_hash(
                i,
                &script_pubkey,
                Amount::from_sat(input.amount_sats),
                EcdsaSighashType::All,
            )
            .map_err(|e| Error::HashExtractionFailed {
                detail: e.to_string(),
                ctx: ctx("presign::utxo_sighashes", chain),
            })?;
        digests.push(hex::encode(sighash.to_byte_array()));
    }
    Ok(digests)
}

fn evm_sighash(payload: &KeysignPayload) -> Result<String, Error> {
    use alloy_consensus::{SignableTransaction, TxEip1559, TxLegacy};
    use alloy_eips::eip2930::AccessList;
    use alloy_primitives::{Address, Bytes, TxKind, U256};
    use std::str::FromStr;

    let chain = payload.coin.chain.as_str();
    let BlockchainSpecific::Evm {
        nonce,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        gas_price,
        gas_limit,
        chain_id,
    } = &payload.blockchain_specific
    else {
        unreachable!("caller already matched on Evm variant");
    };

    let to = if payload.to_address.is_empty() {
        TxKind::Create
    } else {
        TxKind::Call(Address::from_str(&payload.to_address).map_err(|e| {
            Error::HashExtractionFailed {
                detail: format!("invalid EVM recipient: {e}"),
                ctx: ctx("presign::evm_sighash", chain),
            }
        })?)
    };
    let value = U256::from_str(&payload.to_amount).map_err(|e| Error::HashExtractionFailed {
        detail: format!("invalid EVM amount: {e}"),
        ctx: ctx("presign::evm_sighash", chain),
    })?;

    let hash = if let Some(gas_price) = gas_price {
        let tx = TxLegacy {
            chain_id: Some(*chain_id),
            nonce: *nonce,
            gas_price: gas_price.parse().map_err(|_| Error::HashExtractionFailed {
                detail: "invalid gas_price".to_string(),
                ctx: ctx("presign::evm_sighash", chain),
            })?,
            gas_limit: *gas_limit,
            to,
            value,
            input: Bytes::new(),
        };
        tx.signature_hash()
    } else {
        let tx = TxEip1559 {
            chain_id: *chain_id,
            nonce: *nonce,
            gas_limit: *gas_limit,
            max_fee_per_gas: max_fee_per_gas
                .as_deref()
                .unwrap_or("0")
                .parse()
                .map_err(|_| Error::HashExtractionFailed {
                    detail: "invalid max_fee_per_gas".to_string(),
                    ctx: ctx("presign::evm_sighash", chain),
                })?,
            max_priority_fee_per_gas: max_priority_fee_per_gas
                .as_deref()
                .unwrap_or("0")
                .parse()
                .map_err(|_| Error::HashExtractionFailed {
                    detail: "invalid max_priority_fee_per_gas".to_string(),
                    ctx: ctx("presign::evm_sighash", chain),
                })?,
            to,
            value,
            access_list: AccessList::default(),
            input: Bytes::new(),
        };
        tx.signature_hash()
    };

    Ok(hex::encode(hash))
}

/// Canonical-JSON (sorted keys) SHA-256 of the Amino sign-doc object.
fn cosmos_amino_hash(payload: &KeysignPayload) -> Result<String, Error> {
    let chain = payload.coin.chain.as_str();
    let BlockchainSpecific::Cosmos {
        account_number,
        sequence,
        gas,
    } = &payload.blockchain_specific
    else {
        unreachable!("caller already matched on Cosmos variant");
    };
    let Some(SignData::SignAmino { fee, msgs }) = &payload.sign_data else {
        return Err(Error::HashExtractionFailed {
            detail: "signAmino payload missing signData".to_string(),
            ctx: ctx("presign::cosmos_amino_hash", chain),
        });
    };

    let doc = serde_json::json!({
        "account_number": account_number.to_string(),
        "chain_id": chain,
        "fee": { "amount": fee.amount, "gas": gas.to_string() },
        "memo": payload.memo.clone().unwrap_or_default(),
        "msgs": msgs,
        "sequence": sequence.to_string(),
    });

    let canonical = canonical_json(&doc);
    Ok(hex::encode(Sha256::digest(canonical)))
}

/// SHA-256 of the `SignDoc` protobuf: `{bodyBytes, authInfoBytes, chainId,
/// accountNumber}`, matching `cosmos_sdk_proto`'s wire layout.
fn cosmos_direct_hash(payload: &KeysignPayload) -> Result<String, Error> {
    use base64::Engine;
    use cosmos_sdk_proto::cosmos::tx::v1beta1::SignDoc;
    use prost::Message;

    let chain = payload.coin.chain.as_str();
    let Some(SignData::SignDirect {
        body_bytes_b64,
        auth_info_bytes_b64,
        chain_id,
        account_number,
    }) = &payload.sign_data
    else {
        return Err(Error::HashExtractionFailed {
            detail: "signDirect payload missing signData".to_string(),
            ctx: ctx("presign::cosmos_direct_hash", chain),
        });
    };

    let engine = base64::engine::general_purpose::STANDARD;
    let body_bytes = engine
        .decode(body_bytes_b64)
        .map_err(|e| Error::HashExtractionFailed {
            detail: format!("invalid bodyBytes base64: {e}"),
            ctx: ctx("presign::cosmos_direct_hash", chain),
        })?;
    let auth_info_bytes =
        engine
            .decode(auth_info_bytes_b64)
            .map_err(|e| Error::HashExtractionFailed {
                detail: format!("invalid authInfoBytes base64: {e}"),
                ctx: ctx("presign::cosmos_direct_hash", chain),
            })?;

    let sign_doc = SignDoc {
        body_bytes,
        auth_info_bytes,
        chain_id: chain_id.clone(),
        account_number: *account_number,
    };
    Ok(hex::encode(Sha256::digest(sign_doc.encode_to_vec())))
}

fn solana_hash(payload: &KeysignPayload) -> Result<String, Error> {
    let BlockchainSpecific::Solana { recent_blockhash, .. } = &payload.blockchain_specific else {
        unreachable!("caller already matched on Solana variant");
    };
    let mut hasher = Sha256::new();
    hasher.update(recent_blockhash.as_bytes());
    hasher.update(payload.to_address.as_bytes());
    hasher.update(payload.to_amount.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Minimal canonical JSON: object keys sorted lexicographically, recursively.
fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted_map = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for k in keys {
                    sorted_map.insert(k.clone(), sorted(&map[k]));
                }
                serde_json::Value::Object(sorted_map)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    serde_json::to_vec(&sorted(value)).expect("canonical json values are always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::CoinRef;

    #[test]
    fn solana_digest_is_deterministic() {
        let payload = KeysignPayload {
            coin: CoinRef {
                chain: "solana".into(),
                address: "sender".into(),
                decimals: 9,
                ticker: "SOL".into(),
                token_id: None,
                hex_public_key: "ab".repeat(32),
            },
            to_address: "receiver".into(),
            to_amount: "1000".into(),
            memo: None,
            vault_local_party_id: "d1".into(),
            vault_public_key_ecdsa: "02".to_string() + &"a".repeat(64),
            lib_type: crate::vault::LibType::Dkls,
            blockchain_specific: BlockchainSpecific::Solana {
                recent_blockhash: "hash123".into(),
                priority_fee_price: None,
                compute_unit_limit: None,
            },
            sign_data: None,
        };
        let a = solana_hash(&payload).unwrap();
        let b = solana_hash(&payload).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": 2});
        let bytes = canonical_json(&value);
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1}"#);
    }
}
