//! EVM fee field defaulting (§4.5 edge-case policy): `gasTipCap` from the
//! chain's suggestion, `gasFeeCap = baseFee*2 + gasTipCap`; legacy chains
//! (no EIP-1559 support) fall back to a flat `gasPrice`.

use crate::registry::TxFormat;
use crate::vault::BlockchainSpecific;

pub fn build_fee_fields(
    tx_format: TxFormat,
    nonce: u64,
    chain_id: u64,
    base_fee_per_gas: u128,
    suggested_priority_fee: u128,
    gas_price: Option<u128>,
) -> BlockchainSpecific {
    match tx_format {
        TxFormat::EvmLegacy => BlockchainSpecific::Evm {
            nonce,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: Some(gas_price.unwrap_or(base_fee_per_gas).to_string()),
            gas_limit: 21_000,
            chain_id,
        },
        _ => {
            let tip = suggested_priority_fee;
            let cap = base_fee_per_gas.saturating_mul(2).saturating_add(tip);
            BlockchainSpecific::Evm {
                nonce,
                max_fee_per_gas: Some(cap.to_string()),
                max_priority_fee_per_gas: Some(tip.to_string()),
                gas_price: None,
                gas_limit: 21_000,
                chain_id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eip1559_defaults_use_basefee_times_two_plus_tip() {
        let result = build_fee_fields(TxFormat::Evm1559, 4, 1, 100, 2, None);
        match result {
            BlockchainSpecific::Evm {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                gas_price,
                ..
            } => {
                assert_eq!(max_fee_per_gas.as_deref(), Some("202"));
                assert_eq!(max_priority_fee_per_gas.as_deref(), Some("2"));
                assert!(gas_price.is_none());
            }
            _ => panic!("expected evm variant"),
        }
    }

    #[test]
    fn legacy_chain_uses_flat_gas_price() {
        let result = build_fee_fields(TxFormat::EvmLegacy, 4, 56, 100, 2, Some(5_000_000_000));
        match result {
            BlockchainSpecific::Evm { gas_price, max_fee_per_gas, .. } => {
                assert_eq!(gas_price.as_deref(), Some("5000000000"));
                assert!(max_fee_per_gas.is_none());
            }
            _ => panic!("expected evm variant"),
        }
    }
}
