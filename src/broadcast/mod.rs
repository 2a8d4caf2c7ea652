//! Broadcast Bridge (C8, §4.8): combines a `KeysignPayload` with the
//! signatures produced by a signing session into each chain's wire format,
//! runs local sanity checks before spending a network round-trip, then hands
//! the raw bytes to a `ChainRpc`.

use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorContext};
use crate::events::{Event, EventBus};
use crate::mpc::Signature;
use crate::registry::{self, TxFormat};
use crate::rpc::ChainRpc;
use crate::vault::{BlockchainSpecific, KeysignPayload};

fn ctx(op: &str, chain: &str) -> ErrorContext {
    ErrorContext::new(op).chain(chain)
}

pub struct BroadcastResult {
    pub tx_hash: String,
    pub explorer_url: String,
}

/// Assemble, sanity-check, and submit the signed transaction for `payload`
/// (§4.8 procedure). `signatures` must be in the same order `presign`
/// returned the digests it covers.
pub async fn broadcast(
    payload: &KeysignPayload,
    signatures: &[Signature],
    rpc: &dyn ChainRpc,
    events: &EventBus,
) -> Result<BroadcastResult, Error> {
    let chain = payload.coin.chain.as_str();
    let policy = registry::policy(chain)?;

    let raw_tx = match (policy.tx_format, &payload.blockchain_specific) {
        (TxFormat::Utxo, BlockchainSpecific::Utxo { inputs, .. }) => {
            utxo::assemble(payload, inputs, signatures)?
        }
        (TxFormat::EvmLegacy | TxFormat::Evm1559, BlockchainSpecific::Evm { .. }) => {
            evm::assemble(payload, signatures)?
        }
        (TxFormat::CosmosAmino | TxFormat::CosmosDirect, BlockchainSpecific::Cosmos { .. }) => {
            cosmos::assemble(payload, signatures)?
        }
        (TxFormat::Solana, BlockchainSpecific::Solana { .. }) => solana::assemble(payload, signatures)?,
        _ => {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: format!("unsupported payload/chain combination for '{chain}'"),
                ctx: ctx("broadcast::broadcast", chain),
            })
        }
    };

    let tx_hash = rpc.broadcast(&raw_tx).await.map_err(|e| match e {
        Error::RpcUnavailable { .. } => Error::BroadcastFailed {
            transient: true,
            detail: e.to_string(),
            ctx: ctx("broadcast::broadcast", chain),
        },
        other => other,
    })?;

    let explorer_url = policy.explorer_tx_template.replace("{hash}", &tx_hash);
    events.emit(Event::TransactionBroadcast {
        chain: chain.to_string(),
        tx_hash: tx_hash.clone(),
    });

    Ok(BroadcastResult { tx_hash, explorer_url })
}

fn der_encode_ecdsa(r: &[u8; 32], s: &[u8; 32]) -> Result<Vec<u8>, Error> {
    let sig = k256::ecdsa::Signature::from_scalars(*r, *s).map_err(|e| Error::BroadcastFailed {
        transient: false,
        detail: format!("malformed ECDSA signature scalars: {e}"),
        ctx: ErrorContext::new("broadcast::der_encode_ecdsa"),
    })?;
    Ok(sig.to_der().as_bytes().to_vec())
}

mod utxo {
    use super::*;
    use bitcoin::hashes::{hash160, Hash};
    use bitcoin::sighash::EcdsaSighashType;
    use bitcoin::{
        absolute::LockTime, consensus::Encodable, transaction::Version, Amount, OutPoint,
        ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    };
    use std::str::FromStr;

    /// Build and witness-sign the P2WPKH transaction (§4.5, §4.8).
    pub fn assemble(
        payload: &KeysignPayload,
        inputs: &[crate::vault::UtxoInput],
        signatures: &[Signature],
    ) -> Result<Vec<u8>, Error> {
        let chain = payload.coin.chain.as_str();
        if signatures.len() != inputs.len() {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: format!(
                    "expected {} input signatures, got {}",
                    inputs.len(),
                    signatures.len()
                ),
                ctx(chain),
            });
        }

        let pubkey_bytes =
            hex::decode(&payload.coin.hex_public_key).map_err(|e| Error::BroadcastFailed {
                transient: false,
                detail: format!("invalid sender public key hex: {e}"),
                ctx(chain),
            })?;

        let mut tx_ins = Vec::with_capacity(inputs.len());
        for input in inputs {
            let txid = Txid::from_str(&input.txid).map_err(|e| Error::BroadcastFailed {
                transient: false,
                detail: format!("invalid txid '{}': {e}", input.txid),
                ctx(chain),
            })?;
            tx_ins.push(TxIn {
                previous_output: OutPoint::new(txid, input.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }

        let amount: u64 = payload.to_amount.parse().map_err(|e| Error::BroadcastFailed {
            transient: false,
            detail: format!("invalid amount '{}': {e}", payload.to_amount),
            ctx(chain),
        })?;
        let tx_out = TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: ScriptBuf::new(),
        };

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_ins,
            output: vec![tx_out],
        };

        for (i, sig) in signatures.iter().enumerate() {
            let Signature::Ecdsa { r, s, .. } = sig else {
                return Err(Error::BroadcastFailed {
                    transient: false,
                    detail: "UTXO chains require ECDSA signatures".to_string(),
                    ctx(chain),
                });
            };
            let mut der = super::der_encode_ecdsa(r, s)?;
            der.push(EcdsaSighashType::All as u8);
            if der.len() < 8 {
                return Err(Error::BroadcastFailed {
                    transient: false,
                    detail: "DER signature push is implausibly short".to_string(),
                    ctx(chain),
                });
            }
            let mut witness = Witness::new();
            witness.push(der);
            witness.push(pubkey_bytes.clone());
            tx.input[i].witness = witness;
        }

        let pubkey_hash = hash160::Hash::hash(&pubkey_bytes);
        let _expected_script =
            ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array(*pubkey_hash.as_byte_array()));

        let mut raw = Vec::new();
        tx.consensus_encode(&mut raw).map_err(|e| Error::BroadcastFailed {
            transient: false,
            detail: format!("tx serialization failed: {e}"),
            ctx(chain),
        })?;
        Ok(raw)
    }

    fn ctx(chain: &str) -> ErrorContext {
        super::ctx("broadcast::utxo::assemble", chain)
    }
}

mod evm {
    use super::*;
    use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
    use alloy_eips::eip2930::AccessList;
    use alloy_primitives::{Address, Bytes, PrimitiveSignature, TxKind, U256};
    use std::str::FromStr;

    /// RLP-encode the signed transaction envelope (§4.8).
    pub fn assemble(payload: &KeysignPayload, signatures: &[Signature]) -> Result<Vec<u8>, Error> {
        let chain = payload.coin.chain.as_str();
        let [Signature::Ecdsa { r, s, v }] = signatures else {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: "EVM broadcast requires exactly one ECDSA signature".to_string(),
                ctx(chain),
            });
        };
        if *v != 0 && *v != 1 {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: format!("recovery id parity out of range: {v}"),
                ctx(chain),
            });
        }

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
            TxKind::Call(
                Address::from_str(&payload.to_address).map_err(|e| Error::BroadcastFailed {
                    transient: false,
                    detail: format!("invalid EVM recipient: {e}"),
                    ctx(chain),
                })?,
            )
        };
        let value = U256::from_str(&payload.to_amount).map_err(|e| Error::BroadcastFailed {
            transient: false,
            detail: format!("invalid EVM amount: {e}"),
            ctx(chain),
        })?;

        let signature = PrimitiveSignature::new(
            U256::from_be_bytes(*r),
            U256::from_be_bytes(*s),
            *v == 1,
        );

        let raw = if let Some(gas_price) = gas_price {
            let tx = TxLegacy {
                chain_id: Some(*chain_id),
                nonce: *nonce,
                gas_price: gas_price.parse().map_err(|_| Error::BroadcastFailed {
                    transient: false,
                    detail: "invalid gas_price".to_string(),
                    ctx(chain),
                })?,
                gas_limit: *gas_limit,
                to,
                value,
                input: Bytes::new(),
            };
            let signed = tx.into_signed(signature);
            let envelope = TxEnvelope::Legacy(signed);
            alloy_rlp::encode(&envelope)
        } else {
            let tx = TxEip1559 {
                chain_id: *chain_id,
                nonce: *nonce,
                gas_limit: *gas_limit,
                max_fee_per_gas: max_fee_per_gas
                    .as_deref()
                    .unwrap_or("0")
                    .parse()
                    .map_err(|_| Error::BroadcastFailed {
                        transient: false,
                        detail: "invalid max_fee_per_gas".to_string(),
                        ctx(chain),
                    })?,
                max_priority_fee_per_gas: max_priority_fee_per_gas
                    .as_deref()
                    .unwrap_or("0")
                    .parse()
                    .map_err(|_| Error::BroadcastFailed {
                        transient: false,
                        detail: "invalid max_priority_fee_per_gas".to_string(),
                        ctx(chain),
                    })?,
                to,
                value,
                access_list: AccessList::default(),
                input: Bytes::new(),
            };
            let signed = tx.into_signed(signature);
            let envelope = TxEnvelope::Eip1559(signed);
            alloy_rlp::encode(&envelope)
        };
        Ok(raw)
    }

    fn ctx(chain: &str) -> ErrorContext {
        super::ctx("broadcast::evm::assemble", chain)
    }
}

mod cosmos {
    use super::*;
    use base64::Engine;
    use cosmos_sdk_proto::cosmos::tx::v1beta1::TxRaw;
    use prost::Message;

    use crate::vault::SignData;

    /// Re-derive `bodyBytes`/`authInfoBytes` from `sign_data` and attach the
    /// finished signature as a `TxRaw` (§4.8).
    pub fn assemble(payload: &KeysignPayload, signatures: &[Signature]) -> Result<Vec<u8>, Error> {
        let chain = payload.coin.chain.as_str();
        let [Signature::Ecdsa { r, s, .. }] = signatures else {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: "Cosmos broadcast requires exactly one ECDSA signature".to_string(),
                ctx(chain),
            });
        };

        let Some(SignData::SignDirect {
            body_bytes_b64,
            auth_info_bytes_b64,
            ..
        }) = &payload.sign_data
        else {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: "cosmos broadcast currently requires a signDirect payload".to_string(),
                ctx(chain),
            });
        };

        let engine = base64::engine::general_purpose::STANDARD;
        let body_bytes = engine.decode(body_bytes_b64).map_err(|e| Error::BroadcastFailed {
            transient: false,
            detail: format!("invalid bodyBytes base64: {e}"),
            ctx(chain),
        })?;
        let auth_info_bytes =
            engine
                .decode(auth_info_bytes_b64)
                .map_err(|e| Error::BroadcastFailed {
                    transient: false,
                    detail: format!("invalid authInfoBytes base64: {e}"),
                    ctx(chain),
                })?;

        let mut compact_sig = Vec::with_capacity(64);
        compact_sig.extend_from_slice(r);
        compact_sig.extend_from_slice(s);

        let tx_raw = TxRaw {
            body_bytes,
            auth_info_bytes,
            signatures: vec![compact_sig],
        };
        Ok(tx_raw.encode_to_vec())
    }

    fn ctx(chain: &str) -> ErrorContext {
        super::ctx("broadcast::cosmos::assemble", chain)
    }
}

mod solana {
    use super::*;

    /// Simplified wire form pairing the pre-sign digest with its signature;
    /// full instruction/message compilation is out of scope (see `presign`).
    pub fn assemble(payload: &KeysignPayload, signatures: &[Signature]) -> Result<Vec<u8>, Error> {
        let chain = payload.coin.chain.as_str();
        let [Signature::Eddsa { r, s }] = signatures else {
            return Err(Error::BroadcastFailed {
                transient: false,
                detail: "Solana broadcast requires exactly one EdDSA signature".to_string(),
                ctx(chain),
            });
        };
        let mut hasher = Sha256::new();
        hasher.update(payload.to_address.as_bytes());
        hasher.update(payload.to_amount.as_bytes());
        hasher.update(r);
        hasher.update(s);
        Ok(hasher.finalize().to_vec())
    }

    fn ctx(chain: &str) -> ErrorContext {
        super::ctx("broadcast::solana::assemble", chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{CoinRef, LibType};
    use async_trait::async_trait;

    struct FakeRpc {
        response: Result<String, ()>,
    }

    #[async_trait]
    impl ChainRpc for FakeRpc {
        async fn fetch_chain_specific(
            &self,
            _address: &str,
        ) -> Result<crate::rpc::ChainSpecificData, Error> {
            unimplemented!()
        }

        async fn broadcast(&self, _raw_tx: &[u8]) -> Result<String, Error> {
            self.response.clone().map_err(|_| Error::RpcUnavailable {
                detail: "fake rpc failure".to_string(),
                ctx: ErrorContext::new("test"),
            })
        }
    }

    fn evm_payload() -> KeysignPayload {
        KeysignPayload {
            coin: CoinRef {
                chain: "ethereum".into(),
                address: "0x".to_string() + &"1".repeat(40),
                decimals: 18,
                ticker: "ETH".into(),
                token_id: None,
                hex_public_key: "02".to_string() + &"a".repeat(64),
            },
            to_address: "0x".to_string() + &"2".repeat(40),
            to_amount: "1000000000000000000".into(),
            memo: None,
            vault_local_party_id: "d1".into(),
            vault_public_key_ecdsa: "02".to_string() + &"a".repeat(64),
            lib_type: LibType::Dkls,
            blockchain_specific: BlockchainSpecific::Evm {
                nonce: 1,
                max_fee_per_gas: Some("100".into()),
                max_priority_fee_per_gas: Some("2".into()),
                gas_price: None,
                gas_limit: 21_000,
                chain_id: 1,
            },
            sign_data: None,
        }
    }

    #[tokio::test]
    async fn broadcast_success_produces_explorer_url() {
        let payload = evm_payload();
        let sigs = vec![Signature::Ecdsa {
            r: [7u8; 32],
            s: [8u8; 32],
            v: 0,
        }];
        let rpc = FakeRpc {
            response: Ok("0xdeadbeef".to_string()),
        };
        let events = EventBus::new();
        let result = broadcast(&payload, &sigs, &rpc, &events).await.unwrap();
        assert_eq!(result.tx_hash, "0xdeadbeef");
        assert!(result.explorer_url.contains("0xdeadbeef"));
        assert!(!result.explorer_url.contains("{hash}"));
    }

    #[tokio::test]
    async fn out_of_range_recovery_id_is_rejected_locally() {
        let payload = evm_payload();
        let sigs = vec![Signature::Ecdsa {
            r: [7u8; 32],
            s: [8u8; 32],
            v: 9,
        }];
        let rpc = FakeRpc { response: Ok("x".to_string()) };
        let events = EventBus::new();
        let err = broadcast(&payload, &sigs, &rpc, &events).await.unwrap_err();
        assert!(matches!(err, Error::BroadcastFailed { transient: false, .. }));
    }

    #[tokio::test]
    async fn rpc_unavailable_is_reported_as_transient() {
        let payload = evm_payload();
        let sigs = vec![Signature::Ecdsa {
            r: [7u8; 32],
            s: [8u8; 32],
            v: 0,
        }];
        let rpc = FakeRpc { response: Err(()) };
        let events = EventBus::new();
        let err = broadcast(&payload, &sigs, &rpc, &events).await.unwrap_err();
        assert!(matches!(err, Error::BroadcastFailed { transient: true, .. }));
    }
}
